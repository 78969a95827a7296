//! Local cache seam and an in-memory implementation.
//!
//! The cache stores record lists under [`CacheKey`]s. A root list holds every
//! record of a collection; scoped lists are derived subsets (for example one
//! month of transcript counts) and summary keys name derived aggregates that
//! the presentation layer recomputes when invalidated.
//!
//! Every write replaces a whole list with a new `Arc`, so readers holding the
//! previous list never observe a partial update.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tallysync_protocol::{Record, RecordId};

/// An immutable, shareable list of records.
pub type RecordList = Arc<Vec<Record>>;

/// Kind of view a key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ViewKind {
    /// A list of records.
    List,
    /// A derived aggregate.
    Summary,
}

/// Key of a cached view.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    root: String,
    scope: Option<String>,
    kind: ViewKind,
}

impl CacheKey {
    /// Key of the canonical list of a collection.
    pub fn list(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            scope: None,
            kind: ViewKind::List,
        }
    }

    /// Key of a derived list within the same collection.
    #[must_use]
    pub fn scoped(&self, scope: impl Into<String>) -> Self {
        Self {
            root: self.root.clone(),
            scope: Some(scope.into()),
            kind: ViewKind::List,
        }
    }

    /// Key of the summary view of this key's collection and scope.
    #[must_use]
    pub fn summary(&self) -> Self {
        Self {
            root: self.root.clone(),
            scope: self.scope.clone(),
            kind: ViewKind::Summary,
        }
    }

    /// Collection name.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Scope, if this is a derived view.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// View kind.
    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Returns true for the canonical list of a collection.
    pub fn is_root_list(&self) -> bool {
        self.scope.is_none() && self.kind == ViewKind::List
    }

    /// Returns true if both keys belong to the same collection.
    pub fn same_root(&self, other: &CacheKey) -> bool {
        self.root == other.root
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        if let Some(scope) = &self.scope {
            write!(f, "?{scope}")?;
        }
        if self.kind == ViewKind::Summary {
            f.write_str("#summary")?;
        }
        Ok(())
    }
}

/// The cache operations the engine relies on.
///
/// Implementations must apply `set_patch` atomically with respect to other
/// readers and writers. Updaters must not call back into the cache.
pub trait LocalCache: Send + Sync {
    /// Returns the list stored under `key`.
    fn get(&self, key: &CacheKey) -> Option<RecordList>;

    /// Replaces the list under `key` with the updater's result.
    ///
    /// The updater receives the current list and returns the new one; `None`
    /// removes the entry.
    fn set_patch(
        &self,
        key: &CacheKey,
        updater: &mut dyn FnMut(Option<RecordList>) -> Option<RecordList>,
    );

    /// Marks views as stale so derived data is recomputed.
    fn invalidate(&self, keys: &[CacheKey]);

    /// Returns every list view of `key`'s collection, ordered by key.
    fn list_snapshot(&self, key: &CacheKey) -> Vec<(CacheKey, RecordList)>;
}

/// A thread-safe in-memory cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    views: RwLock<BTreeMap<CacheKey, RecordList>>,
    stale: RwLock<BTreeSet<CacheKey>>,
    invalidations: AtomicU64,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a list wholesale and marks it fresh.
    pub fn replace(&self, key: CacheKey, records: Vec<Record>) {
        self.stale.write().remove(&key);
        self.views.write().insert(key, Arc::new(records));
    }

    /// Returns a copy of the records under `key`.
    pub fn records(&self, key: &CacheKey) -> Vec<Record> {
        self.get(key).map(|list| list.to_vec()).unwrap_or_default()
    }

    /// Returns true if `key` has been invalidated since it was last refreshed.
    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.stale.read().contains(key)
    }

    /// Returns every stale key.
    pub fn stale_keys(&self) -> Vec<CacheKey> {
        self.stale.read().iter().cloned().collect()
    }

    /// Clears the stale mark of `key`.
    pub fn mark_fresh(&self, key: &CacheKey) {
        self.stale.write().remove(key);
    }

    /// Number of `invalidate` calls so far.
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<RecordList> {
        self.views.read().get(key).cloned()
    }

    fn set_patch(
        &self,
        key: &CacheKey,
        updater: &mut dyn FnMut(Option<RecordList>) -> Option<RecordList>,
    ) {
        let mut views = self.views.write();
        let current = views.get(key).cloned();
        match updater(current) {
            Some(next) => {
                views.insert(key.clone(), next);
            }
            None => {
                views.remove(key);
            }
        }
    }

    fn invalidate(&self, keys: &[CacheKey]) {
        self.stale.write().extend(keys.iter().cloned());
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn list_snapshot(&self, key: &CacheKey) -> Vec<(CacheKey, RecordList)> {
        self.views
            .read()
            .iter()
            .filter(|(k, _)| k.same_root(key) && k.kind() == ViewKind::List)
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }
}

/// Record-level write primitives shared by mutations and repairs.
///
/// Each function performs one `set_patch` on one view and builds a new list,
/// leaving the previous list untouched for concurrent readers.
pub mod patch {
    use super::{CacheKey, LocalCache, RecordList};
    use std::sync::Arc;
    use tallysync_protocol::{Record, RecordId};

    /// Returns the position and a copy of the record with `id`.
    pub fn find_record<C: LocalCache + ?Sized>(
        cache: &C,
        key: &CacheKey,
        id: &RecordId,
    ) -> Option<(usize, Record)> {
        let list = cache.get(key)?;
        list.iter()
            .position(|r| &r.id == id)
            .map(|index| (index, list[index].clone()))
    }

    /// Appends `record`, or replaces the entry with the same id.
    pub fn upsert_record<C: LocalCache + ?Sized>(cache: &C, key: &CacheKey, record: Record) {
        cache.set_patch(key, &mut |current: Option<RecordList>| {
            let mut next = current.map(|list| list.to_vec()).unwrap_or_default();
            match next.iter().position(|r| r.id == record.id) {
                Some(index) => next[index] = record.clone(),
                None => next.push(record.clone()),
            }
            Some(Arc::new(next))
        });
    }

    /// Replaces the entry with id `id` by `record`. Returns false if absent.
    pub fn replace_record<C: LocalCache + ?Sized>(
        cache: &C,
        key: &CacheKey,
        id: &RecordId,
        record: Record,
    ) -> bool {
        let mut replaced = false;
        cache.set_patch(key, &mut |current: Option<RecordList>| {
            let list = current?;
            let Some(index) = list.iter().position(|r| &r.id == id) else {
                return Some(list);
            };
            let mut next = list.to_vec();
            next[index] = record.clone();
            replaced = true;
            Some(Arc::new(next))
        });
        replaced
    }

    /// Removes the entry with id `id`, returning its position and value.
    pub fn remove_record<C: LocalCache + ?Sized>(
        cache: &C,
        key: &CacheKey,
        id: &RecordId,
    ) -> Option<(usize, Record)> {
        let mut removed = None;
        cache.set_patch(key, &mut |current: Option<RecordList>| {
            let list = current?;
            let Some(index) = list.iter().position(|r| &r.id == id) else {
                return Some(list);
            };
            let mut next = list.to_vec();
            removed = Some((index, next.remove(index)));
            Some(Arc::new(next))
        });
        removed
    }

    /// Removes the entry `select` picks from the current list, returning its
    /// position and value.
    pub fn remove_selected<C: LocalCache + ?Sized>(
        cache: &C,
        key: &CacheKey,
        select: &dyn Fn(&[Record]) -> Option<usize>,
    ) -> Option<(usize, Record)> {
        let mut removed = None;
        cache.set_patch(key, &mut |current: Option<RecordList>| {
            let list = current?;
            let Some(index) = select(&list).filter(|i| *i < list.len()) else {
                return Some(list);
            };
            let mut next = list.to_vec();
            removed = Some((index, next.remove(index)));
            Some(Arc::new(next))
        });
        removed
    }

    /// Reinserts `record` at `index` (clamped), unless its id is present.
    pub fn restore_record<C: LocalCache + ?Sized>(
        cache: &C,
        key: &CacheKey,
        index: usize,
        record: Record,
    ) {
        cache.set_patch(key, &mut |current: Option<RecordList>| {
            let mut next = current.map(|list| list.to_vec()).unwrap_or_default();
            if next.iter().any(|r| r.id == record.id) {
                return Some(Arc::new(next));
            }
            let at = index.min(next.len());
            next.insert(at, record.clone());
            Some(Arc::new(next))
        });
    }
}

/// Returns the ids of every record under `key`.
pub fn record_ids<C: LocalCache + ?Sized>(cache: &C, key: &CacheKey) -> Vec<RecordId> {
    cache
        .get(key)
        .map(|list| list.iter().map(|r| r.id.clone()).collect())
        .unwrap_or_default()
}
