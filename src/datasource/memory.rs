// Wed Jan 14 2026 - Alex

use crate::cache::{Envelope, IdSet, TimePeriod};
use crate::datasource::traits::{
    CompositePhenomenonRecord, DatasourceSession, QueryResult, RelatedFeatureRecord, ResultTemplateRecord,
    SessionFactory,
};
use crate::datasource::DatasourceError;
use crate::events::{CacheEvent, EventBus};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRecord {
    pub identifier: String,
    pub offerings: IdSet,
    pub observable_properties: IdSet,
    pub parents: IdSet,
    pub description_format: String,
}

impl SensorRecord {
    pub fn new(identifier: &str, description_format: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            offerings: IdSet::new(),
            observable_properties: IdSet::new(),
            parents: IdSet::new(),
            description_format: description_format.to_string(),
        }
    }

    pub fn with_offering(mut self, offering: &str) -> Self {
        self.offerings.insert(offering.to_string());
        self
    }

    pub fn with_observable_property(mut self, observable_property: &str) -> Self {
        self.observable_properties.insert(observable_property.to_string());
        self
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parents.insert(parent.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub identifier: String,
    pub procedure: String,
    pub offering: String,
    pub observable_property: String,
    pub feature: String,
    pub phenomenon_time: TimePeriod,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub identifier: String,
    pub parents: IdSet,
    pub location: Option<Envelope>,
}

impl FeatureRecord {
    pub fn new(identifier: &str, location: Option<Envelope>) -> Self {
        Self {
            identifier: identifier.to_string(),
            parents: IdSet::new(),
            location,
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parents.insert(parent.to_string());
        self
    }
}

#[derive(Default)]
struct BackingData {
    sensors: BTreeMap<String, SensorRecord>,
    observations: BTreeMap<String, ObservationRecord>,
    features: BTreeMap<String, FeatureRecord>,
    related_features: Vec<RelatedFeatureRecord>,
    composite_phenomena: Vec<CompositePhenomenonRecord>,
    result_templates: BTreeMap<String, ResultTemplateRecord>,
    feature_types: IdSet,
}

#[derive(Default)]
struct FailurePlan {
    fail_open: bool,
    failing_queries: BTreeSet<String>,
    failing_procedures: IdSet,
    panicking_procedures: IdSet,
    procedure_delay: Duration,
}

/// Backing store kept in process memory.
///
/// Implements [`SessionFactory`] and publishes a [`CacheEvent`] after each
/// committed mutation when an [`EventBus`] is attached. Failures can be
/// injected per query name or per procedure.
pub struct InMemoryDatasource {
    data: Arc<RwLock<BackingData>>,
    failures: Arc<RwLock<FailurePlan>>,
    open_sessions: AtomicUsize,
    sessions_opened: AtomicUsize,
    bus: RwLock<Option<Arc<EventBus>>>,
}

impl InMemoryDatasource {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BackingData::default())),
            failures: Arc::new(RwLock::new(FailurePlan::default())),
            open_sessions: AtomicUsize::new(0),
            sessions_opened: AtomicUsize::new(0),
            bus: RwLock::new(None),
        }
    }

    pub fn attach_event_bus(&self, bus: Arc<EventBus>) {
        *self.bus.write() = Some(bus);
    }

    fn publish(&self, event: CacheEvent) {
        let bus = self.bus.read().clone();
        if let Some(bus) = bus {
            bus.publish(event);
        }
    }

    pub fn insert_sensor(&self, sensor: SensorRecord) {
        let procedure = sensor.identifier.clone();
        self.data.write().sensors.insert(procedure.clone(), sensor);
        self.publish(CacheEvent::SensorInsertion { procedure });
    }

    /// Removes a sensor with its observations and result templates.
    pub fn delete_sensor(&self, procedure: &str) -> bool {
        let removed = {
            let mut data = self.data.write();
            let removed = data.sensors.remove(procedure).is_some();
            if removed {
                data.observations.retain(|_, o| o.procedure != procedure);
                data.result_templates.retain(|_, t| t.procedure != procedure);
                for sensor in data.sensors.values_mut() {
                    sensor.parents.remove(procedure);
                }
            }
            removed
        };

        if removed {
            self.publish(CacheEvent::SensorDeletion {
                procedure: procedure.to_string(),
            });
        }
        removed
    }

    pub fn insert_observation(&self, observation: ObservationRecord) {
        let event = CacheEvent::ObservationInsertion {
            observation: observation.identifier.clone(),
            procedure: observation.procedure.clone(),
        };
        self.data
            .write()
            .observations
            .insert(observation.identifier.clone(), observation);
        self.publish(event);
    }

    pub fn delete_observation(&self, identifier: &str) -> bool {
        let removed = self.data.write().observations.remove(identifier);
        match removed {
            Some(observation) => {
                self.publish(CacheEvent::ObservationDeletion {
                    observation: observation.identifier,
                    procedure: observation.procedure,
                });
                true
            }
            None => false,
        }
    }

    pub fn insert_result_template(&self, template: ResultTemplateRecord) {
        let identifier = template.identifier.clone();
        self.data.write().result_templates.insert(identifier.clone(), template);
        self.publish(CacheEvent::ResultTemplateInsertion { identifier });
    }

    pub fn insert_feature(&self, feature: FeatureRecord) {
        self.data.write().features.insert(feature.identifier.clone(), feature);
    }

    pub fn add_related_feature(&self, related: RelatedFeatureRecord) {
        self.data.write().related_features.push(related);
    }

    pub fn add_composite_phenomenon(&self, composite: CompositePhenomenonRecord) {
        self.data.write().composite_phenomena.push(composite);
    }

    pub fn set_feature_of_interest_types(&self, types: IdSet) {
        self.data.write().feature_types = types;
    }

    pub fn fail_open(&self, fail: bool) {
        self.failures.write().fail_open = fail;
    }

    pub fn fail_query(&self, query: &str) {
        self.failures.write().failing_queries.insert(query.to_string());
    }

    pub fn fail_procedure(&self, procedure: &str) {
        self.failures.write().failing_procedures.insert(procedure.to_string());
    }

    pub fn panic_on_procedure(&self, procedure: &str) {
        self.failures.write().panicking_procedures.insert(procedure.to_string());
    }

    pub fn set_procedure_delay(&self, delay: Duration) {
        self.failures.write().procedure_delay = delay;
    }

    pub fn clear_failures(&self) {
        *self.failures.write() = FailurePlan::default();
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryDatasource {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory for InMemoryDatasource {
    fn open(&self) -> QueryResult<Box<dyn DatasourceSession>> {
        if self.failures.read().fail_open {
            return Err(DatasourceError::Connection("backing store unavailable".to_string()));
        }

        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            data: self.data.clone(),
            failures: self.failures.clone(),
        }))
    }

    fn close(&self, session: Box<dyn DatasourceSession>) {
        drop(session);
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemorySession {
    data: Arc<RwLock<BackingData>>,
    failures: Arc<RwLock<FailurePlan>>,
}

impl MemorySession {
    fn check(&self, query: &str) -> QueryResult<()> {
        if self.failures.read().failing_queries.contains(query) {
            return Err(DatasourceError::query(query, "injected failure"));
        }
        Ok(())
    }

    fn check_procedure(&self, query: &str, procedure: &str) -> QueryResult<()> {
        self.check(query)?;

        let (failing, panicking, delay) = {
            let plan = self.failures.read();
            (
                plan.failing_procedures.contains(procedure),
                plan.panicking_procedures.contains(procedure),
                plan.procedure_delay,
            )
        };

        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if panicking {
            panic!("corrupt row for procedure {}", procedure);
        }
        if failing {
            return Err(DatasourceError::query(query, format!("injected failure for {}", procedure)));
        }
        Ok(())
    }
}

fn sorted<I: IntoIterator<Item = String>>(values: I) -> Vec<String> {
    values.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

impl DatasourceSession for MemorySession {
    fn offering_identifiers(&self) -> QueryResult<Vec<String>> {
        self.check("offering_identifiers")?;
        let data = self.data.read();
        Ok(sorted(data.sensors.values().flat_map(|s| s.offerings.iter().cloned())))
    }

    fn procedures_for_offering(&self, offering: &str) -> QueryResult<Vec<String>> {
        self.check("procedures_for_offering")?;
        let data = self.data.read();
        Ok(sorted(
            data.sensors
                .values()
                .filter(|s| s.offerings.contains(offering))
                .map(|s| s.identifier.clone()),
        ))
    }

    fn observable_properties_for_offering(&self, offering: &str) -> QueryResult<Vec<String>> {
        self.check("observable_properties_for_offering")?;
        let data = self.data.read();
        Ok(sorted(
            data.sensors
                .values()
                .filter(|s| s.offerings.contains(offering))
                .flat_map(|s| s.observable_properties.iter().cloned()),
        ))
    }

    fn features_for_offering(&self, offering: &str) -> QueryResult<Vec<String>> {
        self.check("features_for_offering")?;
        let data = self.data.read();
        Ok(sorted(
            data.observations
                .values()
                .filter(|o| o.offering == offering)
                .map(|o| o.feature.clone()),
        ))
    }

    fn envelope_for_offering(&self, offering: &str) -> QueryResult<Option<Envelope>> {
        self.check("envelope_for_offering")?;
        let data = self.data.read();
        let features: IdSet = data
            .observations
            .values()
            .filter(|o| o.offering == offering)
            .map(|o| o.feature.clone())
            .collect();
        let envelopes: Vec<Envelope> = features
            .iter()
            .filter_map(|f| data.features.get(f).and_then(|f| f.location))
            .collect();
        Ok(Envelope::union(&envelopes))
    }

    fn phenomenon_time_for_offering(&self, offering: &str) -> QueryResult<Option<TimePeriod>> {
        self.check("phenomenon_time_for_offering")?;
        let data = self.data.read();
        Ok(TimePeriod::union(
            data.observations
                .values()
                .filter(|o| o.offering == offering)
                .map(|o| &o.phenomenon_time),
        ))
    }

    fn procedure_identifiers(&self) -> QueryResult<Vec<String>> {
        self.check("procedure_identifiers")?;
        Ok(self.data.read().sensors.keys().cloned().collect())
    }

    fn offerings_for_procedure(&self, procedure: &str) -> QueryResult<Vec<String>> {
        self.check_procedure("offerings_for_procedure", procedure)?;
        let data = self.data.read();
        let sensor = data
            .sensors
            .get(procedure)
            .ok_or_else(|| DatasourceError::EntityNotFound(procedure.to_string()))?;
        Ok(sensor.offerings.iter().cloned().collect())
    }

    fn observable_properties_for_procedure(&self, procedure: &str) -> QueryResult<Vec<String>> {
        self.check_procedure("observable_properties_for_procedure", procedure)?;
        let data = self.data.read();
        let sensor = data
            .sensors
            .get(procedure)
            .ok_or_else(|| DatasourceError::EntityNotFound(procedure.to_string()))?;
        Ok(sensor.observable_properties.iter().cloned().collect())
    }

    fn parent_procedures(&self, procedure: &str) -> QueryResult<Vec<String>> {
        self.check_procedure("parent_procedures", procedure)?;
        let data = self.data.read();
        Ok(data
            .sensors
            .get(procedure)
            .map(|s| s.parents.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn child_procedures(&self, procedure: &str) -> QueryResult<Vec<String>> {
        self.check_procedure("child_procedures", procedure)?;
        let data = self.data.read();
        Ok(sorted(
            data.sensors
                .values()
                .filter(|s| s.parents.contains(procedure))
                .map(|s| s.identifier.clone()),
        ))
    }

    fn observation_identifiers_for_procedure(&self, procedure: &str) -> QueryResult<Vec<String>> {
        self.check_procedure("observation_identifiers_for_procedure", procedure)?;
        let data = self.data.read();
        Ok(data
            .observations
            .values()
            .filter(|o| o.procedure == procedure)
            .map(|o| o.identifier.clone())
            .collect())
    }

    fn phenomenon_time_for_procedure(&self, procedure: &str) -> QueryResult<Option<TimePeriod>> {
        self.check_procedure("phenomenon_time_for_procedure", procedure)?;
        let data = self.data.read();
        Ok(TimePeriod::union(
            data.observations
                .values()
                .filter(|o| o.procedure == procedure)
                .map(|o| &o.phenomenon_time),
        ))
    }

    fn observable_property_identifiers(&self) -> QueryResult<Vec<String>> {
        self.check("observable_property_identifiers")?;
        let data = self.data.read();
        Ok(sorted(
            data.sensors.values().flat_map(|s| s.observable_properties.iter().cloned()),
        ))
    }

    fn procedures_for_observable_property(&self, observable_property: &str) -> QueryResult<Vec<String>> {
        self.check("procedures_for_observable_property")?;
        let data = self.data.read();
        Ok(sorted(
            data.sensors
                .values()
                .filter(|s| s.observable_properties.contains(observable_property))
                .map(|s| s.identifier.clone()),
        ))
    }

    fn offerings_for_observable_property(&self, observable_property: &str) -> QueryResult<Vec<String>> {
        self.check("offerings_for_observable_property")?;
        let data = self.data.read();
        Ok(sorted(
            data.sensors
                .values()
                .filter(|s| s.observable_properties.contains(observable_property))
                .flat_map(|s| s.offerings.iter().cloned()),
        ))
    }

    fn feature_of_interest_identifiers(&self) -> QueryResult<Vec<String>> {
        self.check("feature_of_interest_identifiers")?;
        let data = self.data.read();
        Ok(sorted(
            data.features
                .keys()
                .cloned()
                .chain(data.observations.values().map(|o| o.feature.clone())),
        ))
    }

    fn parent_features(&self, feature: &str) -> QueryResult<Vec<String>> {
        self.check("parent_features")?;
        let data = self.data.read();
        Ok(data
            .features
            .get(feature)
            .map(|f| f.parents.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn global_envelope(&self) -> QueryResult<Option<Envelope>> {
        self.check("global_envelope")?;
        let data = self.data.read();
        let envelopes: Vec<Envelope> = data.features.values().filter_map(|f| f.location).collect();
        Ok(Envelope::union(&envelopes))
    }

    fn related_features(&self) -> QueryResult<Vec<RelatedFeatureRecord>> {
        self.check("related_features")?;
        Ok(self.data.read().related_features.clone())
    }

    fn composite_phenomena(&self) -> QueryResult<Vec<CompositePhenomenonRecord>> {
        self.check("composite_phenomena")?;
        Ok(self.data.read().composite_phenomena.clone())
    }

    fn procedure_description_formats(&self) -> QueryResult<Vec<String>> {
        self.check("procedure_description_formats")?;
        let data = self.data.read();
        Ok(sorted(data.sensors.values().map(|s| s.description_format.clone())))
    }

    fn feature_of_interest_types(&self) -> QueryResult<Vec<String>> {
        self.check("feature_of_interest_types")?;
        Ok(self.data.read().feature_types.iter().cloned().collect())
    }

    fn observation_identifiers(&self) -> QueryResult<Vec<String>> {
        self.check("observation_identifiers")?;
        Ok(self.data.read().observations.keys().cloned().collect())
    }

    fn result_templates(&self) -> QueryResult<Vec<ResultTemplateRecord>> {
        self.check("result_templates")?;
        Ok(self.data.read().result_templates.values().cloned().collect())
    }

    fn global_phenomenon_time(&self) -> QueryResult<Option<TimePeriod>> {
        self.check("global_phenomenon_time")?;
        let data = self.data.read();
        Ok(TimePeriod::union(data.observations.values().map(|o| &o.phenomenon_time)))
    }
}
