// Wed Jan 14 2026 - Alex

use crate::cache::CacheStore;
use crate::datasource::{SessionFactory, SessionGuard};
use crate::error::{panic_message, CacheError, CacheResult};
use crate::update::collector::ErrorCollector;
use crate::update::step::{UpdateContext, UpdateStep};
use crate::update::steps::standard_steps;
use crate::utils::logging::scoped_timer;
use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTiming {
    pub step: &'static str,
    pub duration: Duration,
    pub failed: bool,
}

#[derive(Debug)]
pub struct RebuildReport {
    pub duration: Duration,
    pub steps: Vec<StepTiming>,
    pub errors: Vec<CacheError>,
    pub procedures: usize,
    pub offerings: usize,
}

impl RebuildReport {
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn failed_steps(&self) -> Vec<&'static str> {
        self.steps.iter().filter(|s| s.failed).map(|s| s.step).collect()
    }

    pub fn summary(&self) -> RebuildSummary {
        RebuildSummary {
            finished_at: Utc::now(),
            duration: self.duration,
            procedures: self.procedures,
            offerings: self.offerings,
            errors: self.errors.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Cloneable digest of a finished rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct RebuildSummary {
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub procedures: usize,
    pub offerings: usize,
    pub errors: Vec<String>,
}

impl RebuildSummary {
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Ordered list of rebuild steps sharing one session per run.
pub struct UpdateStepPipeline {
    steps: Vec<Box<dyn UpdateStep>>,
}

impl UpdateStepPipeline {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn standard(worker_threads: usize) -> CacheResult<Self> {
        Ok(Self {
            steps: standard_steps(worker_threads)?,
        })
    }

    pub fn add_step(&mut self, step: Box<dyn UpdateStep>) {
        self.steps.push(step);
    }

    pub fn with_step(mut self, step: Box<dyn UpdateStep>) -> Self {
        self.add_step(step);
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step once against a freshly opened session.
    ///
    /// Step failures, including panics, are collected and never stop the
    /// remaining steps. Only a session that cannot be opened, or an empty
    /// procedure/offering set on the first run, fails the whole call.
    pub fn run(&self, factory: &Arc<dyn SessionFactory>, cache: &Arc<CacheStore>, first_run: bool) -> CacheResult<RebuildReport> {
        let started = Instant::now();
        let errors = ErrorCollector::new();
        let mut timings = Vec::with_capacity(self.steps.len());

        {
            let session = SessionGuard::open(factory.as_ref())?;
            let ctx = UpdateContext {
                session: &*session,
                cache,
                errors: &errors,
                factory,
            };

            for step in &self.steps {
                let _timer = scoped_timer(step.name());
                let step_started = Instant::now();

                let failure = match panic::catch_unwind(AssertUnwindSafe(|| step.execute(&ctx))) {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(CacheError::step(step.name(), e)),
                    Err(payload) => Some(CacheError::StepPanicked {
                        step: step.name(),
                        message: panic_message(payload),
                    }),
                };

                let failed = failure.is_some();
                if let Some(error) = failure {
                    log::warn!("{}", error);
                    errors.push(error);
                }
                timings.push(StepTiming {
                    step: step.name(),
                    duration: step_started.elapsed(),
                    failed,
                });
            }
        }

        let report = RebuildReport {
            duration: started.elapsed(),
            steps: timings,
            errors: errors.drain(),
            procedures: cache.procedures().len(),
            offerings: cache.offerings().len(),
        };

        if first_run && (report.procedures == 0 || report.offerings == 0) {
            let reason = format!(
                "{} procedure(s), {} offering(s) after {} error(s)",
                report.procedures,
                report.offerings,
                report.error_count()
            );
            log::error!("Initial cache rebuild is unusable: {}", reason);
            return Err(CacheError::RebuildFatal(reason));
        }

        if report.is_degraded() {
            log::warn!(
                "{}; failed steps: {:?}",
                CacheError::RebuildDegraded {
                    errors: report.error_count()
                },
                report.failed_steps()
            );
        }

        Ok(report)
    }
}

impl Default for UpdateStepPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IdSet;
    use crate::datasource::{DatasourceError, InMemoryDatasource};

    type Writer = fn(&CacheStore);

    struct WriteStep {
        name: &'static str,
        write: Writer,
    }

    impl UpdateStep for WriteStep {
        fn name(&self) -> &'static str {
            self.name
        }

        fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
            (self.write)(ctx.cache);
            Ok(())
        }
    }

    struct FailingStep;

    impl UpdateStep for FailingStep {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn execute(&self, _ctx: &UpdateContext<'_>) -> CacheResult<()> {
            Err(DatasourceError::query("malformed_row", "bad geometry").into())
        }
    }

    struct PanickingStep;

    impl UpdateStep for PanickingStep {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn execute(&self, _ctx: &UpdateContext<'_>) -> CacheResult<()> {
            panic!("unexpected null");
        }
    }

    fn one(id: &str) -> IdSet {
        std::iter::once(id.to_string()).collect()
    }

    fn write(name: &'static str, write: Writer) -> Box<dyn UpdateStep> {
        Box::new(WriteStep { name, write })
    }

    fn factory() -> (Arc<InMemoryDatasource>, Arc<dyn SessionFactory>) {
        let ds = Arc::new(InMemoryDatasource::new());
        let factory: Arc<dyn SessionFactory> = ds.clone();
        (ds, factory)
    }

    #[test]
    fn test_step_failure_is_isolated() {
        let (ds, factory) = factory();
        let cache = Arc::new(CacheStore::new());
        let pipeline = UpdateStepPipeline::new()
            .with_step(write("procedures", |c| c.set_procedures(one("p"))))
            .with_step(Box::new(FailingStep))
            .with_step(write("offerings", |c| c.set_offerings(one("o"))))
            .with_step(write("properties", |c| c.set_observable_properties(one("temp"))))
            .with_step(write("templates", |c| c.set_result_templates(one("t"))));

        let report = pipeline.run(&factory, &cache, false).unwrap();

        assert_eq!(report.error_count(), 1);
        assert_eq!(report.errors[0].step_name(), Some("failing"));
        assert_eq!(report.failed_steps(), vec!["failing"]);
        assert!(cache.has_procedure("p"));
        assert!(cache.has_offering("o"));
        assert!(cache.observable_properties().contains("temp"));
        assert!(cache.result_templates().contains("t"));
        assert_eq!(ds.open_sessions(), 0);
        assert_eq!(ds.sessions_opened(), 1);
    }

    #[test]
    fn test_panicking_step_is_collected() {
        let (_ds, factory) = factory();
        let cache = Arc::new(CacheStore::new());
        let pipeline = UpdateStepPipeline::new()
            .with_step(Box::new(PanickingStep))
            .with_step(write("procedures", |c| c.set_procedures(one("p"))))
            .with_step(write("offerings", |c| c.set_offerings(one("o"))));

        let report = pipeline.run(&factory, &cache, true).unwrap();

        assert!(report.is_degraded());
        assert!(matches!(report.errors[0], CacheError::StepPanicked { step: "panicking", .. }));
        assert!(cache.has_procedure("p"));
    }

    #[test]
    fn test_first_run_with_empty_cache_is_fatal() {
        let (_ds, factory) = factory();
        let cache = Arc::new(CacheStore::new());
        let pipeline = UpdateStepPipeline::new().with_step(write("procedures", |c| c.set_procedures(one("p"))));

        let first = pipeline.run(&factory, &cache, true);
        assert!(matches!(first, Err(CacheError::RebuildFatal(_))));

        let later = pipeline.run(&factory, &cache, false).unwrap();
        assert_eq!(later.offerings, 0);
    }

    #[test]
    fn test_unopenable_session_fails_run() {
        let (ds, factory) = factory();
        ds.fail_open(true);
        let cache = Arc::new(CacheStore::new());

        let result = UpdateStepPipeline::new().run(&factory, &cache, false);
        assert!(matches!(result, Err(CacheError::Datasource(DatasourceError::Connection(_)))));
    }

    #[test]
    fn test_summary_carries_error_text() {
        let (_ds, factory) = factory();
        let cache = Arc::new(CacheStore::new());
        let report = UpdateStepPipeline::new()
            .with_step(Box::new(FailingStep))
            .run(&factory, &cache, false)
            .unwrap();

        let summary = report.summary();
        assert!(summary.is_degraded());
        assert!(summary.errors[0].contains("malformed_row"));
    }
}
