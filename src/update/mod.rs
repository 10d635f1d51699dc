// Wed Jan 14 2026 - Alex

pub mod collector;
pub mod parallel;
pub mod pipeline;
pub mod step;
pub mod steps;

pub use collector::ErrorCollector;
pub use parallel::{CountDownLatch, ParallelRunStats, ParallelStepExecutor, ProcedureWork, DEFAULT_WORKER_THREADS};
pub use pipeline::{RebuildReport, RebuildSummary, StepTiming, UpdateStepPipeline};
pub use step::{UpdateContext, UpdateStep};
pub use steps::standard_steps;
