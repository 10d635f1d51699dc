// Thu Jan 15 2026 - Alex

use crate::config::MAX_UPDATE_INTERVAL_MINUTES;
use crate::error::{panic_message, CacheError, CacheResult};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

const TIMER_THREAD_NAME: &str = "cache-update-timer";

pub const MAX_INTERVAL: Duration = Duration::from_secs(MAX_UPDATE_INTERVAL_MINUTES * 60);

struct TimerState {
    interval: Duration,
    deadline: Option<Instant>,
    initialized: bool,
    shutdown: bool,
    fired: u64,
}

struct TimerShared {
    state: Mutex<TimerState>,
    signal: Condvar,
}

/// One-shot delayed trigger that is re-armed after every firing.
///
/// The first `schedule()` after construction fires immediately, later calls
/// fire one interval from the moment they are made. Arming replaces any
/// pending deadline, so there is never more than one trigger outstanding.
pub struct Scheduler {
    shared: Arc<TimerShared>,
    callback: TimerCallback,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(interval: Duration, callback: TimerCallback) -> CacheResult<Self> {
        validate_interval(interval)?;
        Ok(Self::from_validated(interval, callback))
    }

    /// Builds a scheduler whose interval has already passed `validate_interval`.
    pub(crate) fn from_validated(interval: Duration, callback: TimerCallback) -> Self {
        Self {
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState {
                    interval,
                    deadline: None,
                    initialized: false,
                    shutdown: false,
                    fired: 0,
                }),
                signal: Condvar::new(),
            }),
            callback,
            handle: Mutex::new(None),
        }
    }

    /// Starts the timer thread if it is not running yet.
    pub fn start(&self) -> CacheResult<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        if self.shared.state.lock().shutdown {
            return Err(CacheError::ShuttingDown);
        }

        let shared = self.shared.clone();
        let callback = self.callback.clone();
        let spawned = thread::Builder::new()
            .name(TIMER_THREAD_NAME.to_string())
            .spawn(move || timer_loop(shared, callback))
            .map_err(|e| CacheError::PipelineFailed(format!("could not start timer thread: {}", e)))?;

        *handle = Some(spawned);
        log::debug!("Update timer thread started");
        Ok(())
    }

    /// Arms the next trigger, replacing any pending one.
    pub fn schedule(&self) -> CacheResult<()> {
        self.arm(false)
    }

    /// Arms the next trigger one full interval from now, even on first use.
    pub fn schedule_interval(&self) -> CacheResult<()> {
        self.arm(true)
    }

    fn arm(&self, full_interval: bool) -> CacheResult<()> {
        self.start()?;

        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(CacheError::ShuttingDown);
        }

        let delay = if state.initialized || full_interval {
            state.interval
        } else {
            Duration::ZERO
        };
        let deadline = Instant::now().checked_add(delay).ok_or_else(|| {
            CacheError::Configuration(format!("update interval {:?} is out of range", delay))
        })?;
        state.initialized = true;
        state.deadline = Some(deadline);
        drop(state);

        self.shared.signal.notify_all();
        log::debug!("Next cache update in {:.1}s", delay.as_secs_f64());
        Ok(())
    }

    /// Changes the interval; a pending trigger is re-armed with the new value.
    pub fn set_interval(&self, interval: Duration) -> CacheResult<()> {
        validate_interval(interval)?;

        let pending = {
            let mut state = self.shared.state.lock();
            if state.interval == interval {
                return Ok(());
            }
            log::info!(
                "Cache update interval changed from {:.1}s to {:.1}s",
                state.interval.as_secs_f64(),
                interval.as_secs_f64()
            );
            state.interval = interval;
            state.deadline.is_some()
        };

        if pending {
            self.cancel();
            self.schedule()?;
        }
        Ok(())
    }

    /// Drops the pending trigger without stopping the timer thread.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        if state.deadline.take().is_some() {
            log::debug!("Pending cache update cancelled");
        }
        drop(state);
        self.shared.signal.notify_all();
    }

    /// Cancels the pending trigger and stops the timer thread. Idempotent.
    ///
    /// When called from the timer thread itself the thread is left to exit on
    /// its own once the current callback returns.
    pub fn cleanup(&self) {
        {
            let mut state = self.shared.state.lock();
            state.deadline = None;
            state.shutdown = true;
        }
        self.shared.signal.notify_all();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Update timer thread terminated abnormally");
            }
            log::debug!("Update timer thread stopped");
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.state.lock().interval
    }

    /// Time until the pending trigger fires, or `None` when nothing is armed.
    pub fn next_fire_in(&self) -> Option<Duration> {
        self.shared
            .state
            .lock()
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    pub fn fired_count(&self) -> u64 {
        self.shared.state.lock().fired
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shutdown
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cleanup();
    }
}

pub(crate) fn validate_interval(interval: Duration) -> CacheResult<()> {
    if interval.is_zero() {
        return Err(CacheError::Configuration(
            "update interval must be greater than 0".to_string(),
        ));
    }
    if interval > MAX_INTERVAL {
        return Err(CacheError::Configuration(format!(
            "update interval must be at most {} minutes",
            MAX_UPDATE_INTERVAL_MINUTES
        )));
    }
    Ok(())
}

fn timer_loop(shared: Arc<TimerShared>, callback: TimerCallback) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        match state.deadline {
            None => shared.signal.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                state.fired += 1;
                fire(&mut state, &callback);
            }
            Some(deadline) => {
                shared.signal.wait_until(&mut state, deadline);
            }
        }
    }
}

fn fire(state: &mut MutexGuard<'_, TimerState>, callback: &TimerCallback) {
    MutexGuard::unlocked(state, || {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
            log::error!("Scheduled cache update panicked: {}", panic_message(payload));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> TimerCallback {
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn wait_for(counter: &AtomicUsize, expected: usize, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if counter.load(Ordering::SeqCst) >= expected {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        counter.load(Ordering::SeqCst) >= expected
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = Scheduler::new(Duration::ZERO, Arc::new(|| {}));
        assert!(matches!(result, Err(CacheError::Configuration(_))));

        let scheduler = Scheduler::new(Duration::from_secs(1), Arc::new(|| {})).unwrap();
        assert!(matches!(
            scheduler.set_interval(Duration::ZERO),
            Err(CacheError::Configuration(_))
        ));
        assert_eq!(scheduler.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_oversized_interval_rejected_without_changing_timer() {
        let scheduler = Scheduler::new(Duration::from_secs(3600), Arc::new(|| {})).unwrap();
        scheduler.schedule_interval().unwrap();

        let huge = Duration::from_secs(u64::MAX);
        assert!(matches!(scheduler.set_interval(huge), Err(CacheError::Configuration(_))));
        assert!(matches!(Scheduler::new(huge, Arc::new(|| {})), Err(CacheError::Configuration(_))));
        assert_eq!(scheduler.interval(), Duration::from_secs(3600));

        scheduler.set_interval(MAX_INTERVAL).unwrap();
        assert!(scheduler.next_fire_in().unwrap() > Duration::from_secs(3600));
        scheduler.schedule_interval().unwrap();
    }

    #[test]
    fn test_first_schedule_fires_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(3600), counting(counter.clone())).unwrap();

        let started = Instant::now();
        scheduler.schedule().unwrap();
        assert!(wait_for(&counter, 1, Duration::from_secs(2)));
        assert!(started.elapsed() < Duration::from_secs(1));

        scheduler.schedule().unwrap();
        let next = scheduler.next_fire_in().unwrap();
        assert!(next > Duration::from_secs(3500));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_interval_rearms_pending_trigger() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(3600), counting(counter.clone())).unwrap();
        scheduler.schedule().unwrap();
        assert!(wait_for(&counter, 1, Duration::from_secs(2)));

        scheduler.schedule().unwrap();
        scheduler.set_interval(Duration::from_millis(50)).unwrap();

        assert!(wait_for(&counter, 2, Duration::from_secs(2)));
        assert_eq!(scheduler.interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_cancel_drops_pending_trigger() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(Duration::from_millis(100), counting(counter.clone())).unwrap();
        scheduler.schedule().unwrap();
        assert!(wait_for(&counter, 1, Duration::from_secs(2)));

        scheduler.schedule().unwrap();
        assert!(scheduler.is_armed());
        scheduler.cancel();
        assert!(scheduler.next_fire_in().is_none());

        thread::sleep(Duration::from_millis(250));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schedule_interval_skips_immediate_fire() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(3600), counting(counter.clone())).unwrap();

        scheduler.schedule_interval().unwrap();
        assert!(scheduler.next_fire_in().unwrap() > Duration::from_secs(3500));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let scheduler = Scheduler::new(Duration::from_millis(10), Arc::new(|| {})).unwrap();
        scheduler.schedule().unwrap();

        scheduler.cleanup();
        scheduler.cleanup();

        assert!(scheduler.is_shut_down());
        assert!(matches!(scheduler.schedule(), Err(CacheError::ShuttingDown)));
    }

    #[test]
    fn test_panicking_callback_keeps_timer_alive() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = counter.clone();
        let scheduler = Scheduler::new(
            Duration::from_millis(20),
            Arc::new(move || {
                if inner.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first tick fails");
                }
            }),
        )
        .unwrap();

        scheduler.schedule().unwrap();
        assert!(wait_for(&counter, 1, Duration::from_secs(2)));
        scheduler.schedule().unwrap();
        assert!(wait_for(&counter, 2, Duration::from_secs(2)));
        assert_eq!(scheduler.fired_count(), 2);
    }
}
