// Thu Jan 15 2026 - Alex

use crate::cache::CacheStore;
use crate::config::CacheConfig;
use crate::controller::scheduler::{validate_interval, Scheduler, TimerCallback};
use crate::datasource::SessionFactory;
use crate::error::{panic_message, CacheError, CacheResult};
use crate::events::CacheEvent;
use crate::update::{RebuildReport, RebuildSummary, UpdateStepPipeline};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// How a trigger behaves when a rebuild is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Wait for the running rebuild and return without starting another.
    Coalesce,
    /// Wait for the running rebuild, then run once more.
    RunAfterCurrent,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Completed(RebuildReport),
    Coalesced,
}

impl UpdateOutcome {
    pub fn report(&self) -> Option<&RebuildReport> {
        match self {
            UpdateOutcome::Completed(report) => Some(report),
            UpdateOutcome::Coalesced => None,
        }
    }

    pub fn is_coalesced(&self) -> bool {
        matches!(self, UpdateOutcome::Coalesced)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheHealth {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for CacheHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheHealth::Unknown => "unknown",
            CacheHealth::Healthy => "healthy",
            CacheHealth::Degraded => "degraded",
            CacheHealth::Unhealthy => "unhealthy",
        };
        write!(f, "{}", name)
    }
}

/// Entry points the change-event bridge drives after a committed mutation.
pub trait CacheUpdateHooks: Send + Sync {
    fn update_after_sensor_insertion(&self) -> CacheResult<()>;
    fn update_after_sensor_deletion(&self) -> CacheResult<()>;
    fn update_after_observation_insertion(&self) -> CacheResult<()>;
    fn update_after_observation_deletion(&self) -> CacheResult<()>;
    fn update_after_result_template_insertion(&self) -> CacheResult<()>;

    fn update_after(&self, event: &CacheEvent) -> CacheResult<()> {
        match event {
            CacheEvent::SensorInsertion { .. } => self.update_after_sensor_insertion(),
            CacheEvent::SensorDeletion { .. } => self.update_after_sensor_deletion(),
            CacheEvent::ObservationInsertion { .. } => self.update_after_observation_insertion(),
            CacheEvent::ObservationDeletion { .. } => self.update_after_observation_deletion(),
            CacheEvent::ResultTemplateInsertion { .. } => self.update_after_result_template_insertion(),
        }
    }
}

struct UpdateState {
    update_free: bool,
    started: bool,
    shutting_down: bool,
    initialized: bool,
    health: CacheHealth,
    last_report: Option<RebuildSummary>,
    completed_runs: u64,
}

/// Cache controller: runs at most one rebuild at a time and keeps the
/// scheduler armed between runs.
pub struct UpdateCoordinator {
    factory: Arc<dyn SessionFactory>,
    cache: Arc<CacheStore>,
    pipeline: UpdateStepPipeline,
    scheduler: Scheduler,
    state: Mutex<UpdateState>,
    idle: Condvar,
}

impl UpdateCoordinator {
    pub fn new(factory: Arc<dyn SessionFactory>, cache: Arc<CacheStore>, config: &CacheConfig) -> CacheResult<Arc<Self>> {
        config.validate()?;
        let pipeline = UpdateStepPipeline::standard(config.worker_threads)?;
        Self::with_pipeline(factory, cache, pipeline, config.update_interval())
    }

    pub fn with_pipeline(
        factory: Arc<dyn SessionFactory>,
        cache: Arc<CacheStore>,
        pipeline: UpdateStepPipeline,
        interval: Duration,
    ) -> CacheResult<Arc<Self>> {
        validate_interval(interval)?;

        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let callback: TimerCallback = Arc::new(move || {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.scheduled_update();
                }
            });

            Self {
                factory,
                cache,
                pipeline,
                scheduler: Scheduler::from_validated(interval, callback),
                state: Mutex::new(UpdateState {
                    update_free: true,
                    started: false,
                    shutting_down: false,
                    initialized: false,
                    health: CacheHealth::Unknown,
                    last_report: None,
                    completed_runs: 0,
                }),
                idle: Condvar::new(),
            }
        }))
    }

    /// Arms the first scheduled rebuild, which fires right away. Later calls
    /// leave the pending trigger alone.
    pub fn start(&self) -> CacheResult<()> {
        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return Err(CacheError::ShuttingDown);
            }
            if state.started {
                log::debug!("Capabilities cache controller already started");
                return Ok(());
            }
            state.started = true;
        }
        log::info!(
            "Starting capabilities cache controller ({} steps, interval {:.0}s)",
            self.pipeline.len(),
            self.scheduler.interval().as_secs_f64()
        );
        let armed = self.scheduler.schedule();
        if armed.is_err() {
            self.state.lock().started = false;
        }
        armed
    }

    /// Rebuilds now, after any rebuild that is already running.
    pub fn trigger_update(&self) -> CacheResult<UpdateOutcome> {
        self.trigger(TriggerMode::RunAfterCurrent)
    }

    pub fn trigger(&self, mode: TriggerMode) -> CacheResult<UpdateOutcome> {
        let mut state = self.state.lock();
        if state.shutting_down {
            return Err(CacheError::ShuttingDown);
        }

        if !state.update_free {
            log::debug!("Cache rebuild already running, waiting ({:?})", mode);
            while !state.update_free {
                self.idle.wait(&mut state);
            }
            if mode == TriggerMode::Coalesce {
                return Ok(UpdateOutcome::Coalesced);
            }
            if state.shutting_down {
                return Err(CacheError::ShuttingDown);
            }
        }

        self.run_exclusive(state)
    }

    fn scheduled_update(&self) {
        match self.trigger(TriggerMode::Coalesce) {
            Ok(UpdateOutcome::Completed(report)) => {
                log::debug!("Scheduled cache rebuild finished in {:.2}s", report.duration.as_secs_f64())
            }
            Ok(UpdateOutcome::Coalesced) => log::debug!("Scheduled cache rebuild coalesced"),
            Err(CacheError::ShuttingDown) => log::debug!("Scheduled cache rebuild skipped during shutdown"),
            Err(e) => log::error!("Scheduled cache rebuild failed: {}", e),
        }
    }

    fn run_exclusive(&self, mut state: MutexGuard<'_, UpdateState>) -> CacheResult<UpdateOutcome> {
        state.update_free = false;
        let first_run = !state.initialized;
        drop(state);

        log::info!("Cache rebuild started{}", if first_run { " (initial)" } else { "" });
        let started = Instant::now();
        let result = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline.run(&self.factory, &self.cache, first_run)
        })) {
            Ok(result) => result,
            Err(payload) => Err(CacheError::PipelineFailed(panic_message(payload))),
        };

        let mut state = self.state.lock();
        state.update_free = true;
        state.completed_runs += 1;
        match &result {
            Ok(report) => {
                state.initialized = true;
                state.health = if report.is_degraded() {
                    CacheHealth::Degraded
                } else {
                    CacheHealth::Healthy
                };
                state.last_report = Some(report.summary());
                log::info!(
                    "Cache rebuild finished in {:.2}s: {} procedures, {} offerings, {} error(s)",
                    started.elapsed().as_secs_f64(),
                    report.procedures,
                    report.offerings,
                    report.error_count()
                );
            }
            Err(e) => {
                state.health = if state.initialized && !matches!(e, CacheError::RebuildFatal(_)) {
                    CacheHealth::Degraded
                } else {
                    CacheHealth::Unhealthy
                };
                log::error!("Cache rebuild failed: {}", e);
            }
        }
        let shutting_down = state.shutting_down;
        drop(state);
        self.idle.notify_all();

        if !shutting_down {
            if let Err(e) = self.scheduler.schedule_interval() {
                log::warn!("Could not re-arm cache update timer: {}", e);
            }
        }

        result.map(UpdateOutcome::Completed)
    }

    /// Blocks until no rebuild is running.
    pub fn wait_for_update(&self) {
        let mut state = self.state.lock();
        while !state.update_free {
            self.idle.wait(&mut state);
        }
    }

    /// Like `wait_for_update`, giving up after `timeout`. Returns whether the
    /// coordinator was idle on return.
    pub fn wait_for_update_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.update_free {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.update_free;
            }
        }
        true
    }

    pub fn set_update_interval(&self, minutes: u64) -> CacheResult<()> {
        if minutes == 0 {
            return Err(CacheError::Configuration(
                "update interval must be greater than 0 minutes".to_string(),
            ));
        }
        self.set_update_interval_duration(Duration::from_secs(minutes.saturating_mul(60)))
    }

    /// Changes the interval used from the next arming on; a running rebuild
    /// is not affected.
    pub fn set_update_interval_duration(&self, interval: Duration) -> CacheResult<()> {
        self.scheduler.set_interval(interval)
    }

    /// Stops scheduling and waits for any running rebuild to finish.
    /// Safe to call more than once.
    pub fn cleanup(&self) {
        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        log::info!("Shutting down capabilities cache controller");

        self.scheduler.cleanup();
        self.wait_for_update();
        self.idle.notify_all();
    }

    pub fn is_updating(&self) -> bool {
        !self.state.lock().update_free
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    pub fn health(&self) -> CacheHealth {
        self.state.lock().health
    }

    pub fn last_report(&self) -> Option<RebuildSummary> {
        self.state.lock().last_report.clone()
    }

    pub fn completed_runs(&self) -> u64 {
        self.state.lock().completed_runs
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn pipeline(&self) -> &UpdateStepPipeline {
        &self.pipeline
    }
}

impl CacheUpdateHooks for UpdateCoordinator {
    fn update_after_sensor_insertion(&self) -> CacheResult<()> {
        self.trigger_update().map(|_| ())
    }

    fn update_after_sensor_deletion(&self) -> CacheResult<()> {
        self.trigger_update().map(|_| ())
    }

    fn update_after_observation_insertion(&self) -> CacheResult<()> {
        self.trigger_update().map(|_| ())
    }

    fn update_after_observation_deletion(&self) -> CacheResult<()> {
        self.trigger_update().map(|_| ())
    }

    fn update_after_result_template_insertion(&self) -> CacheResult<()> {
        self.trigger_update().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IdSet;
    use crate::datasource::{InMemoryDatasource, SensorRecord};
    use crate::update::{UpdateContext, UpdateStep};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const LONG: Duration = Duration::from_secs(3600);

    struct SlowStep {
        delay: Duration,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        runs: Arc<AtomicUsize>,
    }

    impl UpdateStep for SlowStep {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            ctx.cache.set_procedures(std::iter::once("p".to_string()).collect::<IdSet>());
            ctx.cache.set_offerings(std::iter::once("o".to_string()).collect::<IdSet>());
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RunTrace {
        max_active: Arc<AtomicUsize>,
        runs: Arc<AtomicUsize>,
    }

    fn slow_coordinator(delay: Duration, interval: Duration) -> (Arc<UpdateCoordinator>, RunTrace) {
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let pipeline = UpdateStepPipeline::new().with_step(Box::new(SlowStep {
            delay,
            active,
            max_active: max_active.clone(),
            runs: runs.clone(),
        }));
        let factory: Arc<dyn SessionFactory> = Arc::new(InMemoryDatasource::new());
        let coordinator =
            UpdateCoordinator::with_pipeline(factory, Arc::new(CacheStore::new()), pipeline, interval).unwrap();
        (coordinator, RunTrace { max_active, runs })
    }

    #[test]
    fn test_concurrent_coalesced_triggers_do_not_overlap() {
        let (coordinator, trace) = slow_coordinator(Duration::from_millis(150), LONG);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                thread::spawn(move || coordinator.trigger(TriggerMode::Coalesce).unwrap().is_coalesced())
            })
            .collect();
        let coalesced = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|coalesced| *coalesced)
            .count();

        assert_eq!(trace.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(trace.runs.load(Ordering::SeqCst) + coalesced, 4);
        coordinator.cleanup();
    }

    #[test]
    fn test_run_after_current_serializes_runs() {
        let (coordinator, trace) = slow_coordinator(Duration::from_millis(50), LONG);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = coordinator.clone();
                thread::spawn(move || coordinator.trigger_update().unwrap())
            })
            .collect();
        for handle in handles {
            assert!(!handle.join().unwrap().is_coalesced());
        }

        assert_eq!(trace.runs.load(Ordering::SeqCst), 3);
        assert_eq!(trace.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.completed_runs(), 3);
        coordinator.cleanup();
    }

    #[test]
    fn test_first_empty_run_is_unhealthy() {
        let factory: Arc<dyn SessionFactory> = Arc::new(InMemoryDatasource::new());
        let coordinator =
            UpdateCoordinator::new(factory, Arc::new(CacheStore::new()), &CacheConfig::default()).unwrap();

        let result = coordinator.trigger_update();

        assert!(matches!(result, Err(CacheError::RebuildFatal(_))));
        assert_eq!(coordinator.health(), CacheHealth::Unhealthy);
        assert!(!coordinator.is_initialized());
        assert!(!coordinator.is_updating());
        coordinator.cleanup();
    }

    #[test]
    fn test_successful_run_records_report() {
        let ds = Arc::new(InMemoryDatasource::new());
        ds.insert_sensor(SensorRecord::new("urn:proc:1", "sensorML").with_offering("urn:off:1"));
        let factory: Arc<dyn SessionFactory> = ds.clone();
        let coordinator =
            UpdateCoordinator::new(factory, Arc::new(CacheStore::new()), &CacheConfig::default()).unwrap();

        let outcome = coordinator.trigger_update().unwrap();

        assert_eq!(outcome.report().map(|r| r.procedures), Some(1));
        assert_eq!(coordinator.health(), CacheHealth::Healthy);
        assert!(coordinator.is_initialized());
        assert_eq!(coordinator.last_report().map(|r| r.offerings), Some(1));
        assert!(coordinator.scheduler().next_fire_in().unwrap() > Duration::from_secs(3600));
        coordinator.cleanup();
    }

    #[test]
    fn test_zero_interval_rejected() {
        let (coordinator, _trace) = slow_coordinator(Duration::ZERO, LONG);

        assert!(matches!(coordinator.set_update_interval(0), Err(CacheError::Configuration(_))));
        assert!(coordinator.set_update_interval(5).is_ok());
        assert_eq!(coordinator.scheduler().interval(), Duration::from_secs(300));
        coordinator.cleanup();
    }

    #[test]
    fn test_oversized_interval_is_a_configuration_error() {
        let (coordinator, _trace) = slow_coordinator(Duration::ZERO, LONG);
        coordinator.trigger_update().unwrap();
        assert!(coordinator.scheduler().is_armed());

        assert!(matches!(
            coordinator.set_update_interval(u64::MAX / 60),
            Err(CacheError::Configuration(_))
        ));
        assert_eq!(coordinator.scheduler().interval(), LONG);

        assert!(!coordinator.trigger_update().unwrap().is_coalesced());
        assert_eq!(coordinator.completed_runs(), 2);
        coordinator.cleanup();
    }

    #[test]
    fn test_repeated_start_keeps_immediate_first_fire() {
        let (coordinator, trace) = slow_coordinator(Duration::from_millis(10), LONG);

        coordinator.start().unwrap();
        coordinator.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !(coordinator.completed_runs() == 1 && coordinator.scheduler().is_armed()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(coordinator.completed_runs(), 1);
        assert_eq!(trace.runs.load(Ordering::SeqCst), 1);

        coordinator.start().unwrap();
        assert!(coordinator.scheduler().next_fire_in().unwrap() > Duration::from_secs(3500));
        coordinator.cleanup();
    }

    #[test]
    fn test_cleanup_waits_and_blocks_new_triggers() {
        let (coordinator, trace) = slow_coordinator(Duration::from_millis(100), LONG);
        coordinator.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !coordinator.is_updating() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }

        coordinator.cleanup();
        coordinator.cleanup();

        assert!(!coordinator.is_updating());
        assert_eq!(trace.runs.load(Ordering::SeqCst), 1);
        assert!(matches!(coordinator.trigger_update(), Err(CacheError::ShuttingDown)));
        assert!(coordinator.scheduler().is_shut_down());
    }
}
