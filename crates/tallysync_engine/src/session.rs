//! Composition root wiring every component around one transport and cache.

use crate::cache::LocalCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{MutationConfig, RealTimeSyncConfig};
use crate::conflict::ConflictManager;
use crate::consistency::{ConsistencyChecker, ConsistencyRules, FieldRules};
use crate::error::{EngineResult, SyncError};
use crate::monitor::{PerformanceMetrics, PerformanceMonitor};
use crate::mutation::{Mutation, MutationCoordinator, MutationOutcome};
use crate::scheduler::{SchedulerContext, SyncScheduler};
use crate::state::{Liveness, SyncAttempt, SyncStatus};
use crate::transport::Transport;
use std::sync::Arc;
use tallysync_protocol::{
    ConflictPolicy, ConsistencyReport, Issue, Record, RecordId, RepairResult, RepairStrategy,
    SyncOptions,
};
use tracing::info;

/// Builder for [`SyncSession`].
pub struct SyncSessionBuilder<T: Transport + 'static, C: LocalCache + 'static> {
    transport: Arc<T>,
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    rules: Arc<dyn ConsistencyRules>,
    mutation_config: MutationConfig,
    repair_policy: ConflictPolicy,
}

impl<T: Transport + 'static, C: LocalCache + 'static> SyncSessionBuilder<T, C> {
    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the audit rules.
    #[must_use]
    pub fn with_rules(mut self, rules: Arc<dyn ConsistencyRules>) -> Self {
        self.rules = rules;
        self
    }

    /// Sets the collection the mutations and audits work on.
    #[must_use]
    pub fn with_mutation_config(mut self, config: MutationConfig) -> Self {
        self.mutation_config = config;
        self
    }

    /// Sets the policy used to repair mismatches.
    #[must_use]
    pub fn with_repair_policy(mut self, policy: ConflictPolicy) -> Self {
        self.repair_policy = policy;
        self
    }

    /// Wires the components together.
    pub fn build(self) -> SyncSession<T, C> {
        let liveness = Liveness::new();
        let conflicts = Arc::new(ConflictManager::new(Arc::clone(&self.clock)));
        let monitor = Arc::new(PerformanceMonitor::new());
        let checker = Arc::new(
            ConsistencyChecker::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.cache),
                self.rules,
                Arc::clone(&self.clock),
                self.mutation_config.root.clone(),
                liveness.clone(),
            )
            .with_policy(self.repair_policy),
        );
        let mutations = MutationCoordinator::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.cache),
            Arc::clone(&self.clock),
            self.mutation_config,
            liveness.clone(),
        );
        let scheduler = SyncScheduler::new(SchedulerContext {
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
            conflicts: Arc::clone(&conflicts),
            monitor: Arc::clone(&monitor),
            checker: Some(Arc::clone(&checker)),
            pending_mutations: mutations.pending_counter(),
            clock: self.clock,
            liveness: liveness.clone(),
        });

        SyncSession {
            transport: self.transport,
            cache: self.cache,
            mutations,
            conflicts,
            checker,
            monitor,
            scheduler,
            liveness,
        }
    }
}

/// One client's sync engine.
///
/// All components share the injected transport and cache and one liveness
/// flag; [`shutdown`](Self::shutdown) or dropping the session stops timers
/// and makes in-flight work discard its results.
pub struct SyncSession<T: Transport + 'static, C: LocalCache + 'static> {
    transport: Arc<T>,
    cache: Arc<C>,
    mutations: MutationCoordinator<T, C>,
    conflicts: Arc<ConflictManager>,
    checker: Arc<ConsistencyChecker<T, C>>,
    monitor: Arc<PerformanceMonitor>,
    scheduler: SyncScheduler<T, C>,
    liveness: Liveness,
}

impl<T: Transport + 'static, C: LocalCache + 'static> SyncSession<T, C> {
    /// Starts building a session.
    pub fn builder(transport: Arc<T>, cache: Arc<C>) -> SyncSessionBuilder<T, C> {
        SyncSessionBuilder {
            transport,
            cache,
            clock: Arc::new(SystemClock),
            rules: Arc::new(FieldRules::new()),
            mutation_config: MutationConfig::default(),
            repair_policy: ConflictPolicy::Server,
        }
    }

    /// Builds a session with default components.
    pub fn new(transport: Arc<T>, cache: Arc<C>) -> Self {
        Self::builder(transport, cache).build()
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// The mutation coordinator.
    pub fn mutations(&self) -> &MutationCoordinator<T, C> {
        &self.mutations
    }

    /// The conflict manager.
    pub fn conflicts(&self) -> &ConflictManager {
        &self.conflicts
    }

    /// The consistency checker.
    pub fn checker(&self) -> &ConsistencyChecker<T, C> {
        &self.checker
    }

    /// The performance monitor.
    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &SyncScheduler<T, C> {
        &self.scheduler
    }

    /// Starts the scheduler.
    pub async fn start_sync(&self, config: RealTimeSyncConfig) -> SyncStatus {
        self.scheduler.start_sync(config).await
    }

    /// Stops the scheduler.
    pub fn stop_sync(&self) -> SyncStatus {
        self.scheduler.stop_sync()
    }

    /// Runs a forced sync.
    pub async fn force_sync(&self, options: SyncOptions) -> SyncAttempt {
        self.scheduler.force_sync(options).await
    }

    /// Clears the scheduler's error and retry count.
    pub fn reset_sync(&self) -> SyncStatus {
        self.scheduler.reset_sync()
    }

    /// Current scheduler status.
    pub fn status(&self) -> SyncStatus {
        self.scheduler.status()
    }

    /// Runs an optimistic mutation.
    pub async fn perform_mutation(&self, mutation: Mutation) -> EngineResult<MutationOutcome> {
        self.mutations.perform_mutation(mutation).await
    }

    /// Audits the cache against the server.
    pub async fn perform_consistency_check(&self) -> EngineResult<ConsistencyReport> {
        self.checker.perform_consistency_check().await
    }

    /// Repairs audit issues.
    pub async fn repair_consistency_issues(
        &self,
        issues: &[Issue],
        strategy: &RepairStrategy,
    ) -> EngineResult<RepairResult> {
        self.checker.repair_consistency_issues(issues, strategy).await
    }

    /// Applies a recorded conflict decision through the mutation coordinator.
    ///
    /// This is the second phase of conflict resolution; the conflict must have
    /// been resolved with [`ConflictManager::resolve_conflict`] first.
    pub async fn apply_resolution(&self, record_id: &RecordId, field: &str) -> EngineResult<Record> {
        let patch = self
            .conflicts
            .resolution_patch(record_id, field)
            .ok_or_else(|| {
                SyncError::Validation(format!("no resolved conflict for {record_id}.{field}"))
            })?;
        self.mutations.update(record_id.clone(), patch).await
    }

    /// Snapshot of the sync metrics.
    pub fn metrics(&self) -> PerformanceMetrics {
        self.monitor.metrics()
    }

    /// Returns false once the session has been shut down.
    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Stops every timer and makes in-flight work discard its results.
    pub fn shutdown(&self) {
        if self.liveness.is_alive() {
            info!("sync session shutting down");
        }
        self.scheduler.shutdown();
    }
}
