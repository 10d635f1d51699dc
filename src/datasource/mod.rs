// Tue Jan 13 2026 - Alex

pub mod error;
pub mod memory;
pub mod session;
pub mod traits;

pub use error::DatasourceError;
pub use memory::{FeatureRecord, InMemoryDatasource, ObservationRecord, SensorRecord};
pub use session::SessionGuard;
pub use traits::{
    CompositePhenomenonRecord, DatasourceSession, QueryResult, RelatedFeatureRecord, ResultTemplateRecord,
    SessionFactory,
};
