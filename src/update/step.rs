// Wed Jan 14 2026 - Alex

use crate::cache::CacheStore;
use crate::datasource::{DatasourceSession, SessionFactory};
use crate::error::CacheResult;
use crate::update::collector::ErrorCollector;
use std::sync::Arc;

/// What a step sees while it runs: the rebuild's shared session, the live
/// cache, the run's error collector and the factory for extra sessions.
pub struct UpdateContext<'a> {
    pub session: &'a dyn DatasourceSession,
    pub cache: &'a Arc<CacheStore>,
    pub errors: &'a ErrorCollector,
    pub factory: &'a Arc<dyn SessionFactory>,
}

/// Stateless unit of a rebuild that refreshes the categories it owns.
///
/// Steps never read each other's cache writes within one rebuild.
pub trait UpdateStep: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()>;
}
