//! Sync scheduler state machine.
//!
//! ```text
//!            start_sync             sync begins
//! Inactive ------------> Active ---------------> Syncing
//!    ^                    |  ^                      |
//!    | stop / offline     |  +------ finished ------+
//!    +--------------------+        (retry armed on failure)
//!    +-- online (sync_on_online) restarts with retry_count = 0
//! ```
//!
//! The observable [`SyncStatus`] lives in a `watch` channel. The single-flight
//! guard is a check-and-set of `is_syncing` inside one `send_if_modified`, so
//! a trigger that arrives while a sync is in flight is dropped, not queued.
//! Timer tasks only hold weak references to the scheduler and are aborted on
//! stop and teardown.

use crate::cache::LocalCache;
use crate::clock::Clock;
use crate::config::RealTimeSyncConfig;
use crate::conflict::ConflictManager;
use crate::consistency::ConsistencyChecker;
use crate::error::SyncError;
use crate::monitor::PerformanceMonitor;
use crate::state::{EnvironmentSignal, Liveness, SyncAttempt, SyncStatus};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tallysync_protocol::{ConsistencyReport, SyncOptions, SyncResult};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Collaborators the scheduler drives.
pub struct SchedulerContext<T: Transport, C: LocalCache> {
    /// Remote store.
    pub transport: Arc<T>,
    /// Shared local cache.
    pub cache: Arc<C>,
    /// Receives conflicts reported by syncs.
    pub conflicts: Arc<ConflictManager>,
    /// Receives sync outcomes.
    pub monitor: Arc<PerformanceMonitor>,
    /// Runs the post-sync audit, if configured.
    pub checker: Option<Arc<ConsistencyChecker<T, C>>>,
    /// Number of mutations in flight, reported as the queue length.
    pub pending_mutations: Arc<AtomicUsize>,
    /// Timestamp source.
    pub clock: Arc<dyn Clock>,
    /// Shared teardown flag.
    pub liveness: Liveness,
}

#[derive(Default)]
struct Timers {
    interval: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    signals: Option<JoinHandle<()>>,
}

impl Timers {
    fn cancel_sync_timers(&mut self) {
        if let Some(handle) = self.interval.take() {
            handle.abort();
        }
        if let Some(handle) = self.retry.take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel_sync_timers();
        if let Some(handle) = self.signals.take() {
            handle.abort();
        }
    }
}

/// Holds `is_syncing` for one attempt and clears it on drop, including when
/// the attempt is abandoned mid-flight.
struct InFlight<'a> {
    status: &'a watch::Sender<SyncStatus>,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(status: &'a watch::Sender<SyncStatus>) -> Self {
        Self {
            status,
            armed: true,
        }
    }

    /// Hands the flag over to a caller that clears it itself.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.status.send_if_modified(|status| {
            let was_syncing = status.is_syncing;
            status.is_syncing = false;
            was_syncing
        });
    }
}

struct Inner<T: Transport, C: LocalCache> {
    ctx: SchedulerContext<T, C>,
    status: watch::Sender<SyncStatus>,
    config: RwLock<RealTimeSyncConfig>,
    last_options: RwLock<SyncOptions>,
    last_report: RwLock<Option<Arc<ConsistencyReport>>>,
    timers: Mutex<Timers>,
    suspended_offline: AtomicBool,
}

/// Drives periodic and event-triggered syncs.
///
/// Dropping the scheduler shuts it down.
pub struct SyncScheduler<T: Transport + 'static, C: LocalCache + 'static> {
    inner: Arc<Inner<T, C>>,
}

impl<T: Transport + 'static, C: LocalCache + 'static> SyncScheduler<T, C> {
    /// Creates an inactive scheduler with the default configuration.
    pub fn new(ctx: SchedulerContext<T, C>) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            inner: Arc::new(Inner {
                ctx,
                status,
                config: RwLock::new(RealTimeSyncConfig::default()),
                last_options: RwLock::new(SyncOptions::default()),
                last_report: RwLock::new(None),
                timers: Mutex::new(Timers::default()),
                suspended_offline: AtomicBool::new(false),
            }),
        }
    }

    /// Activates the scheduler with `config`.
    ///
    /// Arms the repeating timer and runs one sync immediately. A disabled
    /// configuration is stored but leaves the scheduler inactive.
    pub async fn start_sync(&self, config: RealTimeSyncConfig) -> SyncStatus {
        self.inner.start(config).await;
        self.status()
    }

    /// Deactivates the scheduler and cancels its timers.
    ///
    /// A sync started by a timer is abandoned; its result is discarded.
    pub fn stop_sync(&self) -> SyncStatus {
        self.inner.suspended_offline.store(false, Ordering::SeqCst);
        self.inner.stop();
        self.status()
    }

    /// Runs one sync now with `options` marked as forced.
    ///
    /// Ignores the timer and the retry budget, but not the single-flight
    /// guard.
    pub async fn force_sync(&self, options: SyncOptions) -> SyncAttempt {
        self.inner.run_sync(options.forced()).await
    }

    /// Clears the error and the retry count and cancels a pending retry.
    pub fn reset_sync(&self) -> SyncStatus {
        self.inner.reset();
        self.status()
    }

    /// Reacts to an environment signal.
    pub async fn handle_signal(&self, signal: EnvironmentSignal) -> SyncAttempt {
        self.inner.handle_signal(signal).await
    }

    /// Feeds signals from `signals` into the scheduler until the channel
    /// closes or the scheduler shuts down.
    pub fn attach_signals(&self, mut signals: mpsc::Receiver<EnvironmentSignal>) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.handle_signal(signal).await;
            }
        });
        if let Some(old) = self.inner.timers.lock().signals.replace(handle) {
            old.abort();
        }
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.inner.snapshot()
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Active configuration.
    pub fn config(&self) -> RealTimeSyncConfig {
        self.inner.config.read().clone()
    }

    /// Report of the last post-sync consistency check.
    pub fn last_consistency_report(&self) -> Option<Arc<ConsistencyReport>> {
        self.inner.last_report.read().clone()
    }

    /// Tears the scheduler down. In-flight work is discarded.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl<T: Transport + 'static, C: LocalCache + 'static> Drop for SyncScheduler<T, C> {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl<T: Transport + 'static, C: LocalCache + 'static> Inner<T, C> {
    fn snapshot(&self) -> SyncStatus {
        let mut status = self.status.borrow().clone();
        status.queue_length = self.ctx.pending_mutations.load(Ordering::SeqCst);
        status
    }

    fn next_sync_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = self.config.read().sync_interval;
        chrono::Duration::from_std(interval).ok().map(|d| now + d)
    }

    async fn start(self: &Arc<Self>, config: RealTimeSyncConfig) {
        if !self.ctx.liveness.is_alive() {
            return;
        }
        let enabled = config.enabled;
        let options = config.default_options();
        *self.config.write() = config;
        if !enabled {
            info!("sync disabled by configuration");
            return;
        }

        self.timers.lock().cancel_sync_timers();
        let next_sync = self.next_sync_after(self.ctx.clock.now());
        self.status.send_modify(|status| {
            status.is_active = true;
            status.next_sync = next_sync;
        });
        self.arm_interval();
        info!("sync started");

        self.run_sync(options).await;
    }

    fn stop(&self) {
        self.timers.lock().cancel_sync_timers();
        let stopped = self.status.send_if_modified(|status| {
            let was_active = status.is_active;
            status.is_active = false;
            status.next_sync = None;
            was_active
        });
        if stopped {
            info!("sync stopped");
        }
    }

    fn reset(&self) {
        if let Some(handle) = self.timers.lock().retry.take() {
            handle.abort();
        }
        self.status.send_modify(|status| {
            status.retry_count = 0;
            status.error = None;
            status.error_category = None;
        });
        debug!("sync status reset");
    }

    fn shutdown(&self) {
        self.ctx.liveness.shut_down();
        self.timers.lock().cancel_all();
        self.status.send_modify(|status| {
            status.is_active = false;
            status.is_syncing = false;
            status.next_sync = None;
        });
    }

    async fn handle_signal(self: &Arc<Self>, signal: EnvironmentSignal) -> SyncAttempt {
        if !self.ctx.liveness.is_alive() {
            return SyncAttempt::Skipped;
        }
        let (enabled, sync_on_online, sync_on_focus) = {
            let config = self.config.read();
            (config.enabled, config.sync_on_online, config.sync_on_focus)
        };
        let is_active = self.status.borrow().is_active;

        match signal {
            EnvironmentSignal::Offline => {
                if is_active {
                    self.suspended_offline.store(true, Ordering::SeqCst);
                    self.stop();
                    info!("offline, sync paused");
                }
                SyncAttempt::Skipped
            }
            EnvironmentSignal::Online => {
                let suspended = self.suspended_offline.swap(false, Ordering::SeqCst);
                if !(suspended && enabled && sync_on_online) {
                    return SyncAttempt::Skipped;
                }
                info!("online, resuming sync");
                self.reset();
                let config = self.config.read().clone();
                let options = config.default_options();
                self.timers.lock().cancel_sync_timers();
                let next_sync = self.next_sync_after(self.ctx.clock.now());
                self.status.send_modify(|status| {
                    status.is_active = true;
                    status.next_sync = next_sync;
                });
                self.arm_interval();
                self.run_sync(options).await
            }
            EnvironmentSignal::FocusGained if is_active && sync_on_focus => {
                debug!("focus regained");
                let options = self.config.read().default_options();
                self.run_sync(options).await
            }
            EnvironmentSignal::FocusGained | EnvironmentSignal::FocusLost => SyncAttempt::Skipped,
        }
    }

    fn arm_interval(self: &Arc<Self>) {
        let period = self.config.read().sync_interval;
        let weak: Weak<Self> = Arc::downgrade(self);
        let first_tick = Instant::now() + period;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.on_interval().await;
            }
        });
        if let Some(old) = self.timers.lock().interval.replace(handle) {
            old.abort();
        }
    }

    async fn on_interval(self: &Arc<Self>) {
        let (max_retries, options) = {
            let config = self.config.read();
            (config.max_retries, config.default_options())
        };
        let exhausted = self.status.borrow().retries_exhausted(max_retries);
        if exhausted {
            debug!("retries exhausted, skipping scheduled sync");
            let next_sync = self.next_sync_after(self.ctx.clock.now());
            self.status.send_modify(|status| status.next_sync = next_sync);
            return;
        }
        self.run_sync(options).await;
    }

    fn arm_retry(self: &Arc<Self>, delay: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let deadline = Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.on_retry().await;
        });
        if let Some(old) = self.timers.lock().retry.replace(handle) {
            old.abort();
        }
    }

    async fn on_retry(self: &Arc<Self>) {
        // Detach the handle so a retry armed from here does not abort this task.
        drop(self.timers.lock().retry.take());

        let (is_active, has_error, attempt) = {
            let status = self.status.borrow();
            (status.is_active, status.error.is_some(), status.retry_count)
        };
        if !is_active || !has_error {
            return;
        }
        info!(attempt, "retrying sync");
        let options = self.last_options.read().clone();
        self.run_sync(options).await;
    }

    async fn run_sync(self: &Arc<Self>, options: SyncOptions) -> SyncAttempt {
        if !self.ctx.liveness.is_alive() {
            return SyncAttempt::Skipped;
        }
        let queue_length = self.ctx.pending_mutations.load(Ordering::SeqCst);
        let started = self.status.send_if_modified(|status| {
            if !status.can_start_sync() {
                return false;
            }
            status.is_syncing = true;
            status.queue_length = queue_length;
            true
        });
        if !started {
            debug!("sync already in flight, trigger dropped");
            return SyncAttempt::Skipped;
        }
        let in_flight = InFlight::new(&self.status);

        *self.last_options.write() = options.clone();
        debug!(direction = ?options.direction, forced = options.force_sync, "sync begin");
        let started_at = Instant::now();
        let outcome = self.ctx.transport.bidirectional_sync(&options).await;
        if !self.ctx.liveness.is_alive() {
            return SyncAttempt::Skipped;
        }
        let duration = started_at.elapsed();

        let outcome = match outcome {
            Ok(result) if !result.success => Err(SyncError::ServerError(
                result
                    .error_message()
                    .unwrap_or_else(|| "sync rejected by server".into()),
            )),
            other => other,
        };

        match outcome {
            Ok(result) => {
                self.complete(&result, duration);
                // The post-sync audit still counts as in flight.
                self.after_success(&result).await;
                drop(in_flight);
                SyncAttempt::Completed(result)
            }
            Err(error) => {
                in_flight.disarm();
                self.fail(error, duration)
            }
        }
    }

    fn complete(&self, result: &SyncResult, duration: Duration) {
        self.ctx.monitor.record_sync_result(true, duration);
        for entry in &result.conflicts {
            self.ctx.conflicts.add_conflict(entry.clone());
        }
        if result.changed_data() {
            let keys = self.config.read().invalidation_keys.clone();
            self.ctx.cache.invalidate(&keys);
        }

        let now = self.ctx.clock.now();
        let next_sync = self.next_sync_after(now);
        let queue_length = self.ctx.pending_mutations.load(Ordering::SeqCst);
        self.status.send_modify(|status| {
            status.last_sync = Some(now);
            status.next_sync = if status.is_active { next_sync } else { None };
            status.error = None;
            status.error_category = None;
            status.retry_count = 0;
            status.queue_length = queue_length;
        });
        info!(
            processed = result.records_processed,
            added = result.records_added,
            updated = result.records_updated,
            conflicts = result.conflicts.len(),
            elapsed = ?duration,
            "sync completed"
        );
    }

    async fn after_success(&self, result: &SyncResult) {
        let threshold = self.config.read().consistency_check_threshold;
        let (Some(threshold), Some(checker)) = (threshold, self.ctx.checker.as_ref()) else {
            return;
        };
        if result.records_processed < threshold {
            return;
        }
        match checker.perform_consistency_check().await {
            Ok(_) if !self.ctx.liveness.is_alive() => {}
            Ok(report) => {
                if !report.is_consistent {
                    warn!(issues = report.issues.len(), "consistency check found issues");
                }
                *self.last_report.write() = Some(Arc::new(report));
            }
            Err(error) => warn!(%error, "consistency check failed"),
        }
    }

    fn fail(self: &Arc<Self>, error: SyncError, duration: Duration) -> SyncAttempt {
        self.ctx.monitor.record_sync_result(false, duration);

        let message = error.to_string();
        let category = error.category();
        let now = self.ctx.clock.now();
        let queue_length = self.ctx.pending_mutations.load(Ordering::SeqCst);
        let (max_retries, retry_interval) = {
            let config = self.config.read();
            (config.max_retries, config.retry_interval)
        };

        let mut snapshot = SyncStatus::default();
        self.status.send_modify(|status| {
            status.is_syncing = false;
            status.last_sync = Some(now);
            status.error = Some(message.clone());
            status.error_category = Some(category);
            status.retry_count = status.retry_count.saturating_add(1);
            status.queue_length = queue_length;
            snapshot = status.clone();
        });

        if !snapshot.is_active {
            warn!(%error, "sync failed");
        } else if error.is_retryable() && !snapshot.retries_exhausted(max_retries) {
            warn!(%error, retry_count = snapshot.retry_count, "sync failed, retry armed");
            self.arm_retry(retry_interval);
        } else {
            warn!(%error, retry_count = snapshot.retry_count, "sync failed, no retry scheduled");
        }
        SyncAttempt::Failed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, MemoryCache};
    use crate::clock::SystemClock;
    use crate::consistency::FieldRules;
    use crate::transport::MockTransport;
    use tallysync_protocol::{ConflictEntry, ConflictPolicy};

    struct Fixture {
        transport: Arc<MockTransport>,
        cache: Arc<MemoryCache>,
        conflicts: Arc<ConflictManager>,
        monitor: Arc<PerformanceMonitor>,
        scheduler: Arc<SyncScheduler<MockTransport, MemoryCache>>,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let cache = Arc::new(MemoryCache::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let liveness = Liveness::new();
        let conflicts = Arc::new(ConflictManager::new(clock.clone()));
        let monitor = Arc::new(PerformanceMonitor::new());
        let checker = Arc::new(ConsistencyChecker::new(
            transport.clone(),
            cache.clone(),
            Arc::new(FieldRules::new()),
            clock.clone(),
            CacheKey::list("records"),
            liveness.clone(),
        ));
        let scheduler = SyncScheduler::new(SchedulerContext {
            transport: transport.clone(),
            cache: cache.clone(),
            conflicts: conflicts.clone(),
            monitor: monitor.clone(),
            checker: Some(checker),
            pending_mutations: Arc::new(AtomicUsize::new(0)),
            clock,
            liveness,
        });
        Fixture {
            transport,
            cache,
            conflicts,
            monitor,
            scheduler: Arc::new(scheduler),
        }
    }

    fn config() -> RealTimeSyncConfig {
        RealTimeSyncConfig::new()
            .with_sync_interval(Duration::from_secs(300))
            .with_retry_interval(Duration::from_secs(30))
    }

    fn failure(message: &str) -> SyncResult {
        SyncResult::failure(Utc::now(), vec![message.to_string()])
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_immediately_then_on_interval() {
        let f = fixture();
        let status = f.scheduler.start_sync(config()).await;

        assert!(status.is_active);
        assert!(!status.is_syncing);
        assert!(status.last_sync.is_some());
        assert!(status.next_sync.is_some());
        assert_eq!(f.transport.sync_calls(), 1);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(f.transport.sync_calls(), 2);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(f.transport.sync_calls(), 3);
        assert_eq!(f.monitor.metrics().total_syncs, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_config_stays_inactive() {
        let f = fixture();
        let status = f.scheduler.start_sync(config().with_enabled(false)).await;

        assert!(!status.is_active);
        tokio::time::sleep(Duration::from_secs(1000)).await;
        assert_eq!(f.transport.sync_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn force_sync_is_single_flight() {
        let f = fixture();
        f.transport.set_sync_delay(Duration::from_secs(10));

        let scheduler = f.scheduler.clone();
        let first = tokio::spawn(async move { scheduler.force_sync(SyncOptions::default()).await });
        tokio::task::yield_now().await;
        assert!(f.scheduler.status().is_syncing);

        let second = f.scheduler.force_sync(SyncOptions::default()).await;
        assert_eq!(second, SyncAttempt::Skipped);
        assert_eq!(f.transport.sync_calls(), 1);

        assert!(first.await.unwrap().is_completed());
        assert!(!f.scheduler.status().is_syncing);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_sync_retries_after_interval() {
        let f = fixture();
        f.transport.set_fallback_response(failure("Rate limit exceeded"));

        let status = f.scheduler.start_sync(config()).await;
        assert_eq!(status.retry_count, 1);
        assert_eq!(f.transport.sync_calls(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;

        let status = f.scheduler.status();
        assert_eq!(f.transport.sync_calls(), 2);
        assert!(status.error.as_ref().unwrap().contains("Rate limit exceeded"));
        assert_eq!(status.retry_count, 2);
        assert!(status.recovery_suggestion().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_the_bound() {
        let f = fixture();
        f.transport.set_fallback_error("connection refused");

        f.scheduler
            .start_sync(config().with_max_retries(2).with_retry_interval(Duration::from_secs(10)))
            .await;
        tokio::time::sleep(Duration::from_secs(1000)).await;

        // One attempt plus two retries; interval ticks are skipped.
        assert_eq!(f.transport.sync_calls(), 3);
        assert_eq!(f.scheduler.status().retry_count, 3);

        f.transport
            .set_fallback_response(SyncResult::success(Utc::now()));
        let status = f.scheduler.reset_sync();
        assert_eq!(status.retry_count, 0);
        assert!(status.error.is_none());

        // Next interval tick is at 1200s.
        tokio::time::sleep(Duration::from_secs(250)).await;
        assert_eq!(f.transport.sync_calls(), 4);
        assert!(f.scheduler.status().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn force_sync_ignores_exhausted_retries() {
        let f = fixture();
        f.transport.set_fallback_error("down");
        f.scheduler
            .start_sync(config().with_max_retries(0))
            .await;
        assert_eq!(f.scheduler.status().retry_count, 1);

        f.transport
            .set_fallback_response(SyncResult::success(Utc::now()));
        let attempt = f.scheduler.force_sync(SyncOptions::default()).await;

        assert!(attempt.is_completed());
        assert_eq!(f.scheduler.status().retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_pauses_until_online() {
        let f = fixture();
        f.scheduler.start_sync(config()).await;

        f.scheduler.handle_signal(EnvironmentSignal::Offline).await;
        assert!(!f.scheduler.status().is_active);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(f.transport.sync_calls(), 1);

        let attempt = f.scheduler.handle_signal(EnvironmentSignal::Online).await;
        assert!(attempt.is_completed());
        assert!(f.scheduler.status().is_active);
        assert_eq!(f.transport.sync_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn online_does_not_restart_a_manual_stop() {
        let f = fixture();
        f.scheduler.start_sync(config()).await;
        f.scheduler.stop_sync();

        let attempt = f.scheduler.handle_signal(EnvironmentSignal::Online).await;
        assert_eq!(attempt, SyncAttempt::Skipped);
        assert!(!f.scheduler.status().is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_triggers_sync_only_when_active() {
        let f = fixture();
        let attempt = f.scheduler.handle_signal(EnvironmentSignal::FocusGained).await;
        assert_eq!(attempt, SyncAttempt::Skipped);

        f.scheduler.start_sync(config()).await;
        let attempt = f.scheduler.handle_signal(EnvironmentSignal::FocusGained).await;
        assert!(attempt.is_completed());
        assert_eq!(f.transport.sync_calls(), 2);

        f.scheduler.start_sync(config().with_sync_on_focus(false)).await;
        let attempt = f.scheduler.handle_signal(EnvironmentSignal::FocusGained).await;
        assert_eq!(attempt, SyncAttempt::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn attached_signals_are_handled() {
        let f = fixture();
        f.scheduler.start_sync(config()).await;

        let (tx, rx) = mpsc::channel(4);
        f.scheduler.attach_signals(rx);
        tx.send(EnvironmentSignal::Offline).await.unwrap();

        let mut status = f.scheduler.subscribe();
        status.wait_for(|s| !s.is_active).await.unwrap();
        assert!(!f.scheduler.status().is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_results_feed_conflicts_and_invalidation() {
        let f = fixture();
        f.transport.push_sync_response(
            SyncResult::success(Utc::now())
                .with_counts(3, 1, 1, 1)
                .with_conflict(ConflictEntry::new("1", "count", 100, 150)),
        );

        let attempt = f.scheduler.force_sync(SyncOptions::default()).await;

        assert!(attempt.is_completed());
        assert!(f.conflicts.has_unresolved_conflicts());
        assert!(f.cache.is_stale(&CacheKey::list("records").summary()));
    }

    #[tokio::test(start_paused = true)]
    async fn large_syncs_run_a_consistency_check() {
        let f = fixture();
        f.transport
            .set_fallback_response(SyncResult::success(Utc::now()).with_counts(10, 0, 0, 10));

        f.scheduler
            .start_sync(
                config()
                    .with_consistency_check_threshold(5)
                    .with_conflict_resolution(ConflictPolicy::Client),
            )
            .await;

        let report = f.scheduler.last_consistency_report().unwrap();
        assert!(report.is_consistent);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let f = fixture();
        f.scheduler.start_sync(config()).await;
        f.scheduler.shutdown();

        assert!(!f.scheduler.status().is_active);
        let attempt = f.scheduler.force_sync(SyncOptions::default()).await;
        assert_eq!(attempt, SyncAttempt::Skipped);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(f.transport.sync_calls(), 1);
    }
}
