// Thu Jan 15 2026 - Alex

pub mod coordinator;
pub mod scheduler;

pub use coordinator::{CacheHealth, CacheUpdateHooks, TriggerMode, UpdateCoordinator, UpdateOutcome};
pub use scheduler::{Scheduler, TimerCallback};
