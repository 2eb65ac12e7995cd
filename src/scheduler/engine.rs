use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{DetectionConfig, SchedulerConfig};
use crate::detection::{DetectionPipeline, EngineState, TickReport};
use crate::geolocation::{enrich_entries, GeoResolver};
use crate::models::LogEntry;
use crate::scheduler::{
    AlertSnapshot, Clock, SchedulerError, SchedulerState, SystemClock, TickTrigger,
};

enum Command {
    Run(TickTrigger),
    Stop,
}

/// State shared between the scheduler task and its handles
struct Shared {
    config: RwLock<DetectionConfig>,
    entries: RwLock<Arc<Vec<LogEntry>>>,
    ticking: AtomicBool,
    max_entries: usize,
}

impl Shared {
    fn config(&self) -> DetectionConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn entries(&self) -> Arc<Vec<LogEntry>> {
        Arc::clone(&self.entries.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn replace_entries(&self, mut entries: Vec<LogEntry>) {
        Self::truncate_oldest(&mut entries, self.max_entries);
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(entries);
    }

    fn append_entries(&self, new_entries: Vec<LogEntry>) {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entries = Arc::make_mut(&mut guard);
        entries.extend(new_entries);
        Self::truncate_oldest(entries, self.max_entries);
    }

    fn truncate_oldest(entries: &mut Vec<LogEntry>, max_entries: usize) {
        if entries.len() > max_entries {
            let excess = entries.len() - max_entries;
            entries.drain(..excess);
            log::debug!("Dropped {} oldest entries (limit {})", excess, max_entries);
        }
    }
}

/// Resets the ticking flag when a tick ends, however it ends
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the alert state and driver of the detection pipeline
///
/// Build one, then [`spawn`](Scheduler::spawn) it onto the tokio runtime.
pub struct Scheduler {
    pipeline: DetectionPipeline,
    shared: Arc<Shared>,
    resolver: Option<Arc<dyn GeoResolver>>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    state: EngineState,
    generation: u64,
    published: watch::Sender<Arc<AlertSnapshot>>,
}

impl Scheduler {
    pub fn new(detection: DetectionConfig, config: &SchedulerConfig) -> Self {
        let (published, _) = watch::channel(Arc::new(AlertSnapshot::default()));
        Scheduler {
            pipeline: DetectionPipeline::new(),
            shared: Arc::new(Shared {
                config: RwLock::new(detection),
                entries: RwLock::new(Arc::new(Vec::new())),
                ticking: AtomicBool::new(false),
                max_entries: config.max_entries.max(1),
            }),
            resolver: None,
            clock: Arc::new(SystemClock),
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
            state: EngineState::default(),
            generation: 0,
            published,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn GeoResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_pipeline(mut self, pipeline: DetectionPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Seed the entry collection before the first tick
    pub fn with_entries(self, entries: Vec<LogEntry>) -> Self {
        self.shared.replace_entries(entries);
        self
    }

    /// Start the scheduler task
    ///
    /// The first timer tick fires immediately.
    pub fn spawn(self) -> RunningScheduler {
        let (tx, rx) = mpsc::channel(16);
        let handle = SchedulerHandle {
            shared: Arc::clone(&self.shared),
            commands: tx,
            snapshots: self.published.subscribe(),
        };
        let join = tokio::spawn(self.run(rx));
        RunningScheduler { handle, join }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> EngineState {
        log::info!(
            "Scheduler started (tick interval {:?})",
            self.tick_interval
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(TickTrigger::Timer).await;
                }
                command = commands.recv() => match command {
                    Some(Command::Run(trigger)) => {
                        self.tick(trigger).await;
                    }
                    Some(Command::Stop) | None => break,
                },
            }
        }

        log::info!(
            "Scheduler stopped after {} tick(s), {} active alert(s)",
            self.state.ticks,
            self.state.alerts.len()
        );
        self.state
    }

    /// Run the pipeline once unless a tick is already in progress
    async fn tick(&mut self, trigger: TickTrigger) {
        if self
            .shared
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Tick ({}) skipped, previous tick still running", trigger);
            return;
        }
        let shared = Arc::clone(&self.shared);
        let _guard = TickGuard(&shared.ticking);

        let config = self.shared.config();
        let entries = self.located_entries().await;
        let now = self.clock.now();

        let (next, report) = self.pipeline.run(&self.state, &entries, &config, now);
        self.state = next;
        self.publish(trigger, &report);

        if report.published.is_empty() {
            log::debug!(
                "Tick {} ({}): {} entries, {} candidates, nothing new",
                self.state.ticks,
                trigger,
                entries.len(),
                report.candidates
            );
        } else {
            log::info!(
                "Tick {} ({}): {} new alert(s), {} suppressed, {} evicted, {} active",
                self.state.ticks,
                trigger,
                report.published.len(),
                report.suppressed,
                report.evicted,
                self.state.alerts.len()
            );
        }
    }

    /// Current entries with unknown countries filled in by the resolver
    async fn located_entries(&self) -> Arc<Vec<LogEntry>> {
        let entries = self.shared.entries();
        let resolver = match &self.resolver {
            Some(resolver) => Arc::clone(resolver),
            None => return entries,
        };
        if !entries.iter().any(LogEntry::needs_location) {
            return entries;
        }

        let pending = Arc::clone(&entries);
        match tokio::task::spawn_blocking(move || enrich_entries(&pending, &*resolver))
            .await
        {
            Ok(located) => Arc::new(located),
            Err(e) => {
                log::warn!("Geo resolution failed, continuing without it: {}", e);
                entries
            }
        }
    }

    fn publish(&mut self, trigger: TickTrigger, report: &TickReport) {
        self.generation += 1;
        let snapshot = AlertSnapshot {
            generation: self.generation,
            trigger: Some(trigger),
            taken_at: report.at,
            alerts: self.state.alerts.clone(),
            newly_published: report.published.clone(),
            failed_rules: report.failed_rules.iter().map(|e| e.rule()).collect(),
        };
        self.published.send_replace(Arc::new(snapshot));
    }
}

/// Cloneable control surface for a running scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<AlertSnapshot>>,
}

impl SchedulerHandle {
    /// Replace the whole entry collection and evaluate it immediately
    pub async fn import_entries(&self, entries: Vec<LogEntry>) -> Result<(), SchedulerError> {
        log::info!("Bulk import of {} entries", entries.len());
        self.shared.replace_entries(entries);
        self.trigger(TickTrigger::BulkImport).await
    }

    /// Add newly ingested entries; they are picked up by the next tick
    pub fn append_entries(&self, entries: Vec<LogEntry>) {
        if !entries.is_empty() {
            self.shared.append_entries(entries);
        }
    }

    /// Replace the detection configuration; applies from the next tick
    pub fn update_config(&self, config: DetectionConfig) {
        *self
            .shared
            .config
            .write()
            .unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn config(&self) -> DetectionConfig {
        self.shared.config()
    }

    /// Request an out-of-band tick
    pub async fn trigger(&self, trigger: TickTrigger) -> Result<(), SchedulerError> {
        self.commands
            .send(Command::Run(trigger))
            .await
            .map_err(|_| SchedulerError::Stopped)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<AlertSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Receiver notified after every published tick
    pub fn subscribe(&self) -> watch::Receiver<Arc<AlertSnapshot>> {
        self.snapshots.clone()
    }

    pub fn state(&self) -> SchedulerState {
        if self.shared.ticking.load(Ordering::Acquire) {
            SchedulerState::Ticking
        } else {
            SchedulerState::Idle
        }
    }

    pub fn entry_count(&self) -> usize {
        self.shared.entries().len()
    }
}

/// A spawned scheduler task
pub struct RunningScheduler {
    handle: SchedulerHandle,
    join: JoinHandle<EngineState>,
}

impl RunningScheduler {
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop the timer, let any in-flight tick finish, and return the final state
    pub async fn stop(self) -> Result<EngineState, SchedulerError> {
        // Already stopped if the task has exited
        let _ = self.handle.commands.send(Command::Stop).await;
        Ok(self.join.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeoFencePolicy;
    use crate::geolocation::StaticGeoResolver;
    use crate::models::{Outcome, RuleType};
    use crate::scheduler::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};

    const WAIT: Duration = Duration::from_secs(5);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn attack(ip: &str) -> Vec<LogEntry> {
        ["alice", "bob", "carol", "dave", "erin", "frank"]
            .iter()
            .enumerate()
            .map(|(i, user)| {
                LogEntry::new(
                    t0() - chrono::Duration::minutes((i % 5) as i64),
                    ip,
                    *user,
                    Outcome::Failed,
                    22,
                )
            })
            .collect()
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(DetectionConfig::default(), &SchedulerConfig::default())
            .with_clock(Arc::new(FixedClock::new(t0())))
            .with_tick_interval(Duration::from_secs(3600))
    }

    async fn wait_for_generation(
        rx: &mut watch::Receiver<Arc<AlertSnapshot>>,
        generation: u64,
    ) -> Arc<AlertSnapshot> {
        let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| s.generation >= generation))
            .await
            .expect("timed out waiting for tick")
            .expect("scheduler dropped");
        Arc::clone(&snapshot)
    }

    #[tokio::test]
    async fn test_bulk_import_matches_timer_tick() {
        let running = scheduler().spawn();
        let handle = running.handle();
        let mut rx = handle.subscribe();

        // Initial timer tick over an empty collection
        let first = wait_for_generation(&mut rx, 1).await;
        assert!(first.alerts.is_empty());
        assert_eq!(first.trigger, Some(TickTrigger::Timer));

        tokio_test::assert_ok!(handle.import_entries(attack("10.0.0.5")).await);
        let imported = wait_for_generation(&mut rx, 2).await;
        assert_eq!(imported.trigger, Some(TickTrigger::BulkImport));

        let (expected, _) = DetectionPipeline::new().run(
            &EngineState::default(),
            &attack("10.0.0.5"),
            &DetectionConfig::default(),
            t0(),
        );
        assert_eq!(imported.alerts, expected.alerts);
        assert!(imported.alerts_for(RuleType::BruteForce).count() == 1);
        assert!(imported.alerts_for(RuleType::CredentialStuffing).count() == 1);
        assert_eq!(imported.newly_published.len(), imported.alerts.len());

        let final_state = running.stop().await.unwrap();
        assert_eq!(final_state.alerts, expected.alerts);
        assert_eq!(final_state.ticks, 2);
    }

    #[tokio::test]
    async fn test_repeated_triggers_converge() {
        let running = scheduler().with_entries(attack("10.0.0.5")).spawn();
        let handle = running.handle();
        let mut rx = handle.subscribe();

        let first = wait_for_generation(&mut rx, 1).await;
        handle.trigger(TickTrigger::Manual).await.unwrap();
        let second = wait_for_generation(&mut rx, 2).await;

        assert!(!first.alerts.is_empty());
        assert_eq!(first.alerts, second.alerts);
        assert!(second.newly_published.is_empty());

        running.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_alerts_expire_as_clock_advances() {
        let clock = Arc::new(FixedClock::new(t0()));
        let running = scheduler()
            .with_clock(clock.clone())
            .with_entries(attack("10.0.0.5"))
            .spawn();
        let handle = running.handle();
        let mut rx = handle.subscribe();

        let first = wait_for_generation(&mut rx, 1).await;
        assert!(!first.alerts.is_empty());

        clock.advance(chrono::Duration::minutes(61));
        handle.trigger(TickTrigger::Manual).await.unwrap();
        let second = wait_for_generation(&mut rx, 2).await;
        assert!(second.alerts.is_empty());
        assert_eq!(second.taken_at, Some(t0() + chrono::Duration::minutes(61)));

        running.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_extreme_minutes_do_not_stop_scheduler() {
        let config = DetectionConfig {
            time_window_minutes: i64::MAX,
            alert_retention_minutes: i64::MAX,
            ..DetectionConfig::default()
        };
        let running = Scheduler::new(config, &SchedulerConfig::default())
            .with_clock(Arc::new(FixedClock::new(t0())))
            .with_tick_interval(Duration::from_secs(3600))
            .with_entries(attack("10.0.0.5"))
            .spawn();
        let handle = running.handle();
        let mut rx = handle.subscribe();

        let first = wait_for_generation(&mut rx, 1).await;
        assert_eq!(first.alerts_for(RuleType::BruteForce).count(), 1);
        tokio_test::assert_ok!(handle.trigger(TickTrigger::Manual).await);
        wait_for_generation(&mut rx, 2).await;

        let state = tokio_test::assert_ok!(running.stop().await);
        assert_eq!(state.ticks, 2);
    }

    #[tokio::test]
    async fn test_config_change_applies_next_tick() {
        let strict = DetectionConfig {
            brute_force_threshold: 100,
            enable_credential_stuffing: false,
            enable_anomaly_rate: false,
            ..DetectionConfig::default()
        };
        let running = Scheduler::new(strict.clone(), &SchedulerConfig::default())
            .with_clock(Arc::new(FixedClock::new(t0())))
            .with_tick_interval(Duration::from_secs(3600))
            .with_entries(attack("10.0.0.5"))
            .spawn();
        let handle = running.handle();
        let mut rx = handle.subscribe();

        let first = wait_for_generation(&mut rx, 1).await;
        assert!(first.alerts.is_empty());

        handle.update_config(DetectionConfig {
            brute_force_threshold: 5,
            ..strict
        });
        assert_eq!(handle.config().brute_force_threshold, 5);
        handle.trigger(TickTrigger::Manual).await.unwrap();
        let second = wait_for_generation(&mut rx, 2).await;
        assert_eq!(second.alerts_for(RuleType::BruteForce).count(), 1);

        running.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_timer_picks_up_appended_entries() {
        let running = scheduler()
            .with_tick_interval(Duration::from_millis(20))
            .spawn();
        let handle = running.handle();
        let mut rx = handle.subscribe();

        handle.append_entries(attack("10.0.0.7"));
        let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| !s.alerts.is_empty()))
            .await
            .expect("timed out waiting for alerts")
            .expect("scheduler dropped")
            .clone();
        assert_eq!(snapshot.trigger, Some(TickTrigger::Timer));
        assert_eq!(handle.entry_count(), 6);

        running.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_geo_enrichment_feeds_geo_fence() {
        let mut resolver = StaticGeoResolver::new();
        resolver.insert("5.6.7.8", "Germany");
        let config = DetectionConfig {
            geo_fence: Some(GeoFencePolicy::allow(["United States"])),
            ..DetectionConfig::default()
        };
        let entry = LogEntry::new(t0(), "5.6.7.8", "alice", Outcome::Success, 22);

        let running = Scheduler::new(config, &SchedulerConfig::default())
            .with_clock(Arc::new(FixedClock::new(t0())))
            .with_tick_interval(Duration::from_secs(3600))
            .with_resolver(Arc::new(resolver))
            .with_entries(vec![entry])
            .spawn();
        let handle = running.handle();
        let mut rx = handle.subscribe();

        let snapshot = wait_for_generation(&mut rx, 1).await;
        let geo: Vec<_> = snapshot.alerts_for(RuleType::GeoFence).collect();
        assert_eq!(geo.len(), 1);
        assert!(geo[0].key().starts_with("alice|Germany|"));

        running.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_rejects_further_commands() {
        let running = scheduler().spawn();
        let handle = running.handle();
        let mut rx = handle.subscribe();
        wait_for_generation(&mut rx, 1).await;

        running.stop().await.unwrap();
        assert_eq!(handle.state(), SchedulerState::Idle);
        assert_eq!(handle.snapshot().generation, 1);
        assert!(matches!(
            handle.trigger(TickTrigger::Manual).await,
            Err(SchedulerError::Stopped)
        ));
    }

    #[test]
    fn test_entry_limit_drops_oldest() {
        let scheduler = Scheduler::new(
            DetectionConfig::default(),
            &SchedulerConfig {
                tick_interval_secs: 10,
                max_entries: 4,
            },
        )
        .with_entries(attack("10.0.0.5"));

        let entries = scheduler.shared.entries();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].account, "carol");

        scheduler.shared.append_entries(attack("10.0.0.6"));
        let entries = scheduler.shared.entries();
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| e.source_address == "10.0.0.6"));
    }
}
