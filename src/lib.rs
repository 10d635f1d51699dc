// Thu Jan 15 2026 - Alex

pub mod cache;
pub mod config;
pub mod controller;
pub mod datasource;
pub mod error;
pub mod events;
pub mod update;
pub mod utils;

pub use cache::{CacheSnapshot, CacheStore};
pub use config::{CacheConfig, ConfigError};
pub use controller::{CacheHealth, CacheUpdateHooks, Scheduler, TriggerMode, UpdateCoordinator, UpdateOutcome};
pub use datasource::{DatasourceError, DatasourceSession, InMemoryDatasource, SessionFactory};
pub use error::{CacheError, CacheResult};
pub use events::{CacheEvent, ChangeEventBridge, EventBus, EventKinds};
pub use update::{RebuildReport, UpdateStepPipeline};
