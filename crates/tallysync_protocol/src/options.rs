//! Per-invocation sync options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which way data flows during a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Pull server changes and push local changes.
    #[default]
    Bidirectional,
    /// Only pull server changes.
    Pull,
    /// Only push local changes.
    Push,
}

/// Policy for settling a disagreement between server and client values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Server value wins.
    #[default]
    Server,
    /// Client value wins.
    Client,
    /// Values are merged with [`merge_values`](crate::merge_values).
    Merge,
}

impl ConflictPolicy {
    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Server => "server",
            ConflictPolicy::Client => "client",
            ConflictPolicy::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(ConflictPolicy::Server),
            "client" => Ok(ConflictPolicy::Client),
            "merge" => Ok(ConflictPolicy::Merge),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

/// Options for one sync call. Never mutated while the call is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// Data flow direction.
    pub direction: SyncDirection,
    /// Whether the server should validate incoming data.
    pub validate_data: bool,
    /// How conflicts are settled.
    pub conflict_resolution: ConflictPolicy,
    /// Whether this sync was requested explicitly, bypassing the interval.
    pub force_sync: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Bidirectional,
            validate_data: true,
            conflict_resolution: ConflictPolicy::Server,
            force_sync: false,
        }
    }
}

impl SyncOptions {
    /// Sets the direction.
    #[must_use]
    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Sets the conflict policy.
    #[must_use]
    pub fn with_conflict_resolution(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_resolution = policy;
        self
    }

    /// Sets whether data is validated.
    #[must_use]
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_data = validate;
        self
    }

    /// Returns a copy marked as forced.
    #[must_use]
    pub fn forced(mut self) -> Self {
        self.force_sync = true;
        self
    }
}
