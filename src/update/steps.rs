// Wed Jan 14 2026 - Alex

use crate::cache::{CacheStore, IdMap, IdSet, ProcedureEntry};
use crate::datasource::{DatasourceError, DatasourceSession};
use crate::error::CacheResult;
use crate::update::parallel::{ParallelStepExecutor, ProcedureWork};
use crate::update::step::{UpdateContext, UpdateStep};
use std::collections::BTreeMap;
use std::sync::Arc;

fn to_set(ids: Vec<String>) -> IdSet {
    ids.into_iter().collect()
}

pub struct OfferingsUpdate;

impl UpdateStep for OfferingsUpdate {
    fn name(&self) -> &'static str {
        "offerings"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let session = ctx.session;
        let offerings = session.offering_identifiers()?;

        let mut procedures = IdMap::new();
        let mut observable_properties = IdMap::new();
        let mut features = IdMap::new();
        let mut envelopes = BTreeMap::new();

        for offering in &offerings {
            procedures.insert(offering.clone(), to_set(session.procedures_for_offering(offering)?));
            observable_properties.insert(
                offering.clone(),
                to_set(session.observable_properties_for_offering(offering)?),
            );
            features.insert(offering.clone(), to_set(session.features_for_offering(offering)?));
            if let Some(envelope) = session.envelope_for_offering(offering)? {
                envelopes.insert(offering.clone(), envelope);
            }
        }

        ctx.cache.set_offerings(to_set(offerings));
        ctx.cache.replace_procedures_for_offerings(procedures);
        ctx.cache.replace_observable_properties_for_offerings(observable_properties);
        ctx.cache.replace_features_for_offerings(features);
        ctx.cache.replace_envelopes_for_offerings(envelopes);
        Ok(())
    }
}

/// Computes one procedure's cache entry on a worker-owned session.
pub struct ProcedureCacheWork;

impl ProcedureWork for ProcedureCacheWork {
    fn process(&self, session: &dyn DatasourceSession, procedure: &str, cache: &CacheStore) -> Result<(), DatasourceError> {
        let entry = ProcedureEntry {
            offerings: to_set(session.offerings_for_procedure(procedure)?),
            observable_properties: to_set(session.observable_properties_for_procedure(procedure)?),
            parents: to_set(session.parent_procedures(procedure)?),
            children: to_set(session.child_procedures(procedure)?),
            observation_identifiers: to_set(session.observation_identifiers_for_procedure(procedure)?),
            phenomenon_time: session.phenomenon_time_for_procedure(procedure)?,
        };
        cache.set_procedure_entry(procedure, entry);
        Ok(())
    }
}

pub struct ProcedureUpdate {
    executor: ParallelStepExecutor,
}

impl ProcedureUpdate {
    pub fn new(executor: ParallelStepExecutor) -> Self {
        Self { executor }
    }
}

impl UpdateStep for ProcedureUpdate {
    fn name(&self) -> &'static str {
        "procedures"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let procedures = ctx.session.procedure_identifiers()?;
        let ids = to_set(procedures.clone());

        ctx.cache.set_procedures(ids.clone());
        ctx.cache.retain_procedures(&ids);

        let stats = self.executor.execute(
            procedures,
            ctx.factory.clone(),
            ctx.cache.clone(),
            ctx.errors.clone(),
            Arc::new(ProcedureCacheWork),
        )?;

        if stats.failed > 0 {
            log::warn!("{} of {} procedures could not be cached", stats.failed, stats.procedures);
        }
        Ok(())
    }
}

pub struct ObservablePropertiesUpdate;

impl UpdateStep for ObservablePropertiesUpdate {
    fn name(&self) -> &'static str {
        "observable_properties"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let session = ctx.session;
        let observable_properties = session.observable_property_identifiers()?;

        let mut procedures = IdMap::new();
        let mut offerings = IdMap::new();
        for property in &observable_properties {
            procedures.insert(property.clone(), to_set(session.procedures_for_observable_property(property)?));
            offerings.insert(property.clone(), to_set(session.offerings_for_observable_property(property)?));
        }

        ctx.cache.set_observable_properties(to_set(observable_properties));
        ctx.cache.replace_procedures_for_observable_properties(procedures);
        ctx.cache.replace_offerings_for_observable_properties(offerings);
        Ok(())
    }
}

pub struct FeatureOfInterestUpdate;

impl UpdateStep for FeatureOfInterestUpdate {
    fn name(&self) -> &'static str {
        "features_of_interest"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let session = ctx.session;
        let features = session.feature_of_interest_identifiers()?;

        let mut parents = IdMap::new();
        for feature in &features {
            parents.insert(feature.clone(), to_set(session.parent_features(feature)?));
        }
        let envelope = session.global_envelope()?;

        ctx.cache.set_features_of_interest(to_set(features));
        ctx.cache.replace_parent_features(parents);
        ctx.cache.set_global_envelope(envelope);
        Ok(())
    }
}

pub struct RelatedFeaturesUpdate;

impl UpdateStep for RelatedFeaturesUpdate {
    fn name(&self) -> &'static str {
        "related_features"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let related = ctx.session.related_features()?;

        let mut for_offering = IdMap::new();
        let mut roles = IdMap::new();
        for feature in related {
            for offering in &feature.offerings {
                for_offering
                    .entry(offering.clone())
                    .or_insert_with(IdSet::new)
                    .insert(feature.identifier.clone());
            }
            roles.entry(feature.identifier).or_insert_with(IdSet::new).insert(feature.role);
        }

        ctx.cache.replace_related_features_for_offerings(for_offering);
        ctx.cache.replace_roles_for_related_features(roles);
        Ok(())
    }
}

pub struct CompositePhenomenonUpdate;

impl UpdateStep for CompositePhenomenonUpdate {
    fn name(&self) -> &'static str {
        "composite_phenomena"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let composites = ctx.session.composite_phenomena()?;

        let identifiers: IdSet = composites.iter().map(|c| c.identifier.clone()).collect();
        let components: BTreeMap<String, Vec<String>> = composites
            .into_iter()
            .map(|c| (c.identifier, c.components))
            .collect();

        ctx.cache.set_composite_phenomena(identifiers);
        ctx.cache.replace_components_for_composite_phenomena(components);
        Ok(())
    }
}

pub struct StaticCapabilitiesUpdate;

impl UpdateStep for StaticCapabilitiesUpdate {
    fn name(&self) -> &'static str {
        "static_capabilities"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let formats = ctx.session.procedure_description_formats()?;
        let feature_types = ctx.session.feature_of_interest_types()?;

        ctx.cache.set_procedure_description_formats(to_set(formats));
        ctx.cache.set_feature_of_interest_types(to_set(feature_types));
        Ok(())
    }
}

pub struct ObservationIdentifiersUpdate;

impl UpdateStep for ObservationIdentifiersUpdate {
    fn name(&self) -> &'static str {
        "observation_identifiers"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let identifiers = ctx.session.observation_identifiers()?;
        ctx.cache.set_observation_identifiers(to_set(identifiers));
        Ok(())
    }
}

pub struct ResultTemplateUpdate;

impl UpdateStep for ResultTemplateUpdate {
    fn name(&self) -> &'static str {
        "result_templates"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let templates = ctx.session.result_templates()?;

        let mut for_offering = IdMap::new();
        let mut identifiers = IdSet::new();
        for template in templates {
            for_offering
                .entry(template.offering)
                .or_insert_with(IdSet::new)
                .insert(template.identifier.clone());
            identifiers.insert(template.identifier);
        }

        ctx.cache.set_result_templates(identifiers);
        ctx.cache.replace_result_templates_for_offerings(for_offering);
        Ok(())
    }
}

pub struct GlobalTemporalExtentUpdate;

impl UpdateStep for GlobalTemporalExtentUpdate {
    fn name(&self) -> &'static str {
        "global_temporal_extent"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let period = ctx.session.global_phenomenon_time()?;
        ctx.cache.set_global_phenomenon_time(period);
        Ok(())
    }
}

pub struct OfferingTemporalExtentUpdate;

impl UpdateStep for OfferingTemporalExtentUpdate {
    fn name(&self) -> &'static str {
        "offering_temporal_extent"
    }

    fn execute(&self, ctx: &UpdateContext<'_>) -> CacheResult<()> {
        let session = ctx.session;
        let mut periods = BTreeMap::new();
        for offering in session.offering_identifiers()? {
            if let Some(period) = session.phenomenon_time_for_offering(&offering)? {
                periods.insert(offering, period);
            }
        }

        ctx.cache.replace_phenomenon_times_for_offerings(periods);
        Ok(())
    }
}

/// The full rebuild in its fixed order.
pub fn standard_steps(worker_threads: usize) -> CacheResult<Vec<Box<dyn UpdateStep>>> {
    let executor = ParallelStepExecutor::new(worker_threads)?;
    Ok(vec![
        Box::new(OfferingsUpdate),
        Box::new(ProcedureUpdate::new(executor)),
        Box::new(ObservablePropertiesUpdate),
        Box::new(FeatureOfInterestUpdate),
        Box::new(RelatedFeaturesUpdate),
        Box::new(CompositePhenomenonUpdate),
        Box::new(StaticCapabilitiesUpdate),
        Box::new(ObservationIdentifiersUpdate),
        Box::new(ResultTemplateUpdate),
        Box::new(GlobalTemporalExtentUpdate),
        Box::new(OfferingTemporalExtentUpdate),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Envelope, TimePeriod};
    use crate::datasource::{
        FeatureRecord, InMemoryDatasource, ObservationRecord, RelatedFeatureRecord, SensorRecord, SessionFactory,
        SessionGuard,
    };
    use crate::update::collector::ErrorCollector;
    use chrono::{TimeZone, Utc};

    fn seeded() -> Arc<InMemoryDatasource> {
        let ds = Arc::new(InMemoryDatasource::new());
        ds.insert_sensor(
            SensorRecord::new("urn:proc:station", "sensorML")
                .with_offering("off-weather")
                .with_observable_property("air_temperature"),
        );
        ds.insert_sensor(
            SensorRecord::new("urn:proc:thermo", "sensorML")
                .with_offering("off-weather")
                .with_observable_property("air_temperature")
                .with_parent("urn:proc:station"),
        );
        ds.insert_feature(FeatureRecord::new("feat-1", Some(Envelope::point(4326, 7.0, 51.0))).with_parent("region"));
        ds.insert_observation(ObservationRecord {
            identifier: "obs-1".to_string(),
            procedure: "urn:proc:thermo".to_string(),
            offering: "off-weather".to_string(),
            observable_property: "air_temperature".to_string(),
            feature: "feat-1".to_string(),
            phenomenon_time: TimePeriod::instant(Utc.with_ymd_and_hms(2026, 1, 14, 12, 0, 0).unwrap()),
        });
        ds
    }

    fn run_step(step: &dyn UpdateStep, ds: &Arc<InMemoryDatasource>, cache: &Arc<CacheStore>) -> (CacheResult<()>, ErrorCollector) {
        let factory: Arc<dyn SessionFactory> = ds.clone();
        let errors = ErrorCollector::new();
        let session = SessionGuard::open(ds.as_ref()).unwrap();
        let ctx = UpdateContext {
            session: &*session,
            cache,
            errors: &errors,
            factory: &factory,
        };
        (step.execute(&ctx), errors)
    }

    #[test]
    fn test_offerings_update() {
        let ds = seeded();
        let cache = Arc::new(CacheStore::new());
        let (result, _) = run_step(&OfferingsUpdate, &ds, &cache);

        assert!(result.is_ok());
        assert!(cache.has_offering("off-weather"));
        assert_eq!(cache.procedures_for_offering("off-weather").len(), 2);
        assert!(cache.features_for_offering("off-weather").contains("feat-1"));
        assert!(cache.envelope_for_offering("off-weather").is_some());
    }

    #[test]
    fn test_procedure_update_writes_hierarchy() {
        let ds = seeded();
        let cache = Arc::new(CacheStore::new());
        let step = ProcedureUpdate::new(ParallelStepExecutor::new(2).unwrap());
        let (result, errors) = run_step(&step, &ds, &cache);

        assert!(result.is_ok());
        assert!(errors.is_empty());
        assert!(cache.child_procedures("urn:proc:station").contains("urn:proc:thermo"));
        assert!(cache.parent_procedures("urn:proc:thermo").contains("urn:proc:station"));
        assert!(cache.observation_identifiers_for_procedure("urn:proc:thermo").contains("obs-1"));
        assert!(cache.phenomenon_time_for_procedure("urn:proc:thermo").is_some());
        assert!(cache.phenomenon_time_for_procedure("urn:proc:station").is_none());
    }

    #[test]
    fn test_procedure_update_prunes_removed_procedures() {
        let ds = seeded();
        let cache = Arc::new(CacheStore::new());
        let step = ProcedureUpdate::new(ParallelStepExecutor::new(2).unwrap());
        run_step(&step, &ds, &cache).0.unwrap();

        ds.delete_sensor("urn:proc:thermo");
        run_step(&step, &ds, &cache).0.unwrap();

        assert!(!cache.has_procedure("urn:proc:thermo"));
        assert!(cache.offerings_for_procedure("urn:proc:thermo").is_empty());
        assert!(cache.child_procedures("urn:proc:station").is_empty());
    }

    #[test]
    fn test_related_features_group_roles() {
        let ds = seeded();
        ds.add_related_feature(RelatedFeatureRecord {
            identifier: "river".to_string(),
            role: "sampledFeature".to_string(),
            offerings: vec!["off-weather".to_string(), "off-hydro".to_string()],
        });
        ds.add_related_feature(RelatedFeatureRecord {
            identifier: "river".to_string(),
            role: "parentFeature".to_string(),
            offerings: vec![],
        });
        let cache = Arc::new(CacheStore::new());
        run_step(&RelatedFeaturesUpdate, &ds, &cache).0.unwrap();

        assert_eq!(cache.roles_for_related_feature("river").len(), 2);
        assert!(cache.related_features_for_offering("off-hydro").contains("river"));
    }

    #[test]
    fn test_failing_query_leaves_category_untouched() {
        let ds = seeded();
        let cache = Arc::new(CacheStore::new());
        run_step(&FeatureOfInterestUpdate, &ds, &cache).0.unwrap();
        assert!(cache.child_features("region").contains("feat-1"));

        ds.fail_query("parent_features");
        let (result, _) = run_step(&FeatureOfInterestUpdate, &ds, &cache);

        assert!(result.is_err());
        assert!(cache.features_of_interest().contains("feat-1"));
        assert!(cache.parent_features("feat-1").contains("region"));
    }

    #[test]
    fn test_temporal_extents() {
        let ds = seeded();
        let cache = Arc::new(CacheStore::new());
        run_step(&GlobalTemporalExtentUpdate, &ds, &cache).0.unwrap();
        run_step(&OfferingTemporalExtentUpdate, &ds, &cache).0.unwrap();

        let global = cache.global_phenomenon_time().unwrap();
        assert_eq!(Some(global), cache.phenomenon_time_for_offering("off-weather"));
    }

    #[test]
    fn test_standard_order() {
        let names: Vec<&str> = standard_steps(5).unwrap().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "offerings",
                "procedures",
                "observable_properties",
                "features_of_interest",
                "related_features",
                "composite_phenomena",
                "static_capabilities",
                "observation_identifiers",
                "result_templates",
                "global_temporal_extent",
                "offering_temporal_extent",
            ]
        );
    }
}
