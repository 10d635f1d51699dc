// Tue Jan 13 2026 - Alex

use crate::cache::{Envelope, TimePeriod};
use crate::datasource::DatasourceError;
use serde::{Deserialize, Serialize};

pub type QueryResult<T> = Result<T, DatasourceError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedFeatureRecord {
    pub identifier: String,
    pub role: String,
    pub offerings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositePhenomenonRecord {
    pub identifier: String,
    pub components: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTemplateRecord {
    pub identifier: String,
    pub offering: String,
    pub procedure: String,
    pub observable_property: String,
}

/// One unit of access to the backing store.
///
/// A session is confined to the thread that opened it; it is never shared or
/// sent to another worker.
pub trait DatasourceSession {
    fn offering_identifiers(&self) -> QueryResult<Vec<String>>;
    fn procedures_for_offering(&self, offering: &str) -> QueryResult<Vec<String>>;
    fn observable_properties_for_offering(&self, offering: &str) -> QueryResult<Vec<String>>;
    fn features_for_offering(&self, offering: &str) -> QueryResult<Vec<String>>;
    fn envelope_for_offering(&self, offering: &str) -> QueryResult<Option<Envelope>>;
    fn phenomenon_time_for_offering(&self, offering: &str) -> QueryResult<Option<TimePeriod>>;

    fn procedure_identifiers(&self) -> QueryResult<Vec<String>>;
    fn offerings_for_procedure(&self, procedure: &str) -> QueryResult<Vec<String>>;
    fn observable_properties_for_procedure(&self, procedure: &str) -> QueryResult<Vec<String>>;
    fn parent_procedures(&self, procedure: &str) -> QueryResult<Vec<String>>;
    fn child_procedures(&self, procedure: &str) -> QueryResult<Vec<String>>;
    fn observation_identifiers_for_procedure(&self, procedure: &str) -> QueryResult<Vec<String>>;
    fn phenomenon_time_for_procedure(&self, procedure: &str) -> QueryResult<Option<TimePeriod>>;

    fn observable_property_identifiers(&self) -> QueryResult<Vec<String>>;
    fn procedures_for_observable_property(&self, observable_property: &str) -> QueryResult<Vec<String>>;
    fn offerings_for_observable_property(&self, observable_property: &str) -> QueryResult<Vec<String>>;

    fn feature_of_interest_identifiers(&self) -> QueryResult<Vec<String>>;
    fn parent_features(&self, feature: &str) -> QueryResult<Vec<String>>;
    fn global_envelope(&self) -> QueryResult<Option<Envelope>>;

    fn related_features(&self) -> QueryResult<Vec<RelatedFeatureRecord>>;
    fn composite_phenomena(&self) -> QueryResult<Vec<CompositePhenomenonRecord>>;
    fn procedure_description_formats(&self) -> QueryResult<Vec<String>>;
    fn feature_of_interest_types(&self) -> QueryResult<Vec<String>>;
    fn observation_identifiers(&self) -> QueryResult<Vec<String>>;
    fn result_templates(&self) -> QueryResult<Vec<ResultTemplateRecord>>;
    fn global_phenomenon_time(&self) -> QueryResult<Option<TimePeriod>>;
}

pub trait SessionFactory: Send + Sync {
    fn open(&self) -> QueryResult<Box<dyn DatasourceSession>>;
    fn close(&self, session: Box<dyn DatasourceSession>);
}
