// Wed Jan 14 2026 - Alex

use crate::cache::CacheStore;
use crate::datasource::{DatasourceError, DatasourceSession, SessionFactory, SessionGuard};
use crate::error::{panic_message, CacheError, CacheResult};
use crate::update::collector::ErrorCollector;
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_WORKER_THREADS: usize = 5;

pub struct CountDownLatch {
    remaining: Mutex<usize>,
    zero: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                self.zero.notify_all();
            }
        }
    }

    pub fn count(&self) -> usize {
        *self.remaining.lock()
    }

    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.zero.wait(&mut remaining);
        }
    }

    /// Returns `false` if the timeout elapsed before the count reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            if self.zero.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }
}

struct CountDownOnDrop(Arc<CountDownLatch>);

impl Drop for CountDownOnDrop {
    fn drop(&mut self) {
        self.0.count_down();
    }
}

/// Per-procedure work run by the executor with a worker-owned session.
pub trait ProcedureWork: Send + Sync + 'static {
    fn process(&self, session: &dyn DatasourceSession, procedure: &str, cache: &CacheStore) -> Result<(), DatasourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelRunStats {
    pub procedures: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Fans one work item per procedure out over a fixed-size worker pool.
///
/// Each item opens its own session, writes only its own procedure's keys and
/// reports failures to the shared collector tagged with the procedure id. A
/// failed item never stops its siblings; the call returns once every item has
/// counted down.
pub struct ParallelStepExecutor {
    threads: usize,
    pool: rayon::ThreadPool,
}

impl ParallelStepExecutor {
    pub fn new(threads: usize) -> CacheResult<Self> {
        if threads == 0 {
            return Err(CacheError::Configuration(
                "worker thread count must be greater than 0".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("cache-procedure-worker-{}", i))
            .build()
            .map_err(|e| CacheError::PipelineFailed(format!("could not start worker pool: {}", e)))?;
        Ok(Self { threads, pool })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn execute(
        &self,
        procedures: Vec<String>,
        factory: Arc<dyn SessionFactory>,
        cache: Arc<CacheStore>,
        errors: ErrorCollector,
        work: Arc<dyn ProcedureWork>,
    ) -> CacheResult<ParallelRunStats> {
        let started = Instant::now();
        let total = procedures.len();
        if total == 0 {
            return Ok(ParallelRunStats {
                procedures: 0,
                succeeded: 0,
                failed: 0,
                elapsed: started.elapsed(),
            });
        }

        let latch = Arc::new(CountDownLatch::new(total));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        for procedure in procedures {
            let latch = latch.clone();
            let factory = factory.clone();
            let cache = cache.clone();
            let errors = errors.clone();
            let work = work.clone();
            let succeeded = succeeded.clone();
            let failed = failed.clone();

            self.pool.spawn(move || {
                let _countdown = CountDownOnDrop(latch);

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), DatasourceError> {
                    let session = SessionGuard::open(factory.as_ref())?;
                    work.process(&*session, &procedure, &cache)
                }));

                match outcome {
                    Ok(Ok(())) => {
                        succeeded.fetch_add(1, Ordering::SeqCst);
                        log::trace!("Procedure {} cached", procedure);
                    }
                    Ok(Err(source)) => {
                        failed.fetch_add(1, Ordering::SeqCst);
                        errors.push(CacheError::Worker { procedure, source });
                    }
                    Err(payload) => {
                        failed.fetch_add(1, Ordering::SeqCst);
                        errors.push(CacheError::WorkerPanicked {
                            procedure,
                            message: panic_message(payload),
                        });
                    }
                }
            });
        }

        latch.wait();

        let stats = ParallelRunStats {
            procedures: total,
            succeeded: succeeded.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };
        log::debug!(
            "Procedure fan-out finished: {}/{} ok on {} threads in {:.2}ms",
            stats.succeeded,
            stats.procedures,
            self.threads.min(total),
            stats.elapsed.as_secs_f64() * 1000.0
        );
        Ok(stats)
    }
}
