// Tue Jan 13 2026 - Alex

use crate::cache::snapshot::{CacheSnapshot, Envelope, IdMap, IdSet, TimePeriod};
use parking_lot::RwLock;
use std::collections::BTreeMap;

macro_rules! set_category {
    ($field:ident, $get:ident, $set:ident) => {
        pub fn $get(&self) -> IdSet {
            self.$field.read().clone()
        }

        pub fn $set(&self, ids: IdSet) {
            *self.$field.write() = ids;
        }
    };
}

macro_rules! map_category {
    ($field:ident, $get:ident, $set:ident, $replace:ident) => {
        pub fn $get(&self, key: &str) -> IdSet {
            self.$field.read().get(key).cloned().unwrap_or_default()
        }

        pub fn $set(&self, key: &str, ids: IdSet) {
            let mut map = self.$field.write();
            if ids.is_empty() {
                map.remove(key);
            } else {
                map.insert(key.to_string(), ids);
            }
        }

        pub fn $replace(&self, map: IdMap) {
            *self.$field.write() = strip_empty(map);
        }
    };
}

fn strip_empty(mut map: IdMap) -> IdMap {
    map.retain(|_, ids| !ids.is_empty());
    map
}

/// Everything the procedure step learns about one procedure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureEntry {
    pub offerings: IdSet,
    pub observable_properties: IdSet,
    pub parents: IdSet,
    pub children: IdSet,
    pub observation_identifiers: IdSet,
    pub phenomenon_time: Option<TimePeriod>,
}

/// Live capabilities cache shared by update steps and request handlers.
///
/// Every category sits behind its own lock, so a whole-category replacement
/// is atomic for readers while writers to different categories never contend.
/// Nothing is held across a rebuild: readers may observe some categories
/// already refreshed and others still from the previous run.
pub struct CacheStore {
    procedures: RwLock<IdSet>,
    offerings: RwLock<IdSet>,
    observable_properties: RwLock<IdSet>,
    features_of_interest: RwLock<IdSet>,
    observation_identifiers: RwLock<IdSet>,
    result_templates: RwLock<IdSet>,
    procedure_description_formats: RwLock<IdSet>,
    feature_of_interest_types: RwLock<IdSet>,
    composite_phenomena: RwLock<IdSet>,

    procedures_for_offering: RwLock<IdMap>,
    observable_properties_for_offering: RwLock<IdMap>,
    features_for_offering: RwLock<IdMap>,
    related_features_for_offering: RwLock<IdMap>,
    result_templates_for_offering: RwLock<IdMap>,

    offerings_for_procedure: RwLock<IdMap>,
    observable_properties_for_procedure: RwLock<IdMap>,
    parent_procedures: RwLock<IdMap>,
    child_procedures: RwLock<IdMap>,
    observation_identifiers_for_procedure: RwLock<IdMap>,

    procedures_for_observable_property: RwLock<IdMap>,
    offerings_for_observable_property: RwLock<IdMap>,

    parent_features: RwLock<IdMap>,
    child_features: RwLock<IdMap>,
    roles_for_related_feature: RwLock<IdMap>,
    components_for_composite_phenomenon: RwLock<BTreeMap<String, Vec<String>>>,

    global_envelope: RwLock<Option<Envelope>>,
    envelope_for_offering: RwLock<BTreeMap<String, Envelope>>,

    global_phenomenon_time: RwLock<Option<TimePeriod>>,
    phenomenon_time_for_offering: RwLock<BTreeMap<String, TimePeriod>>,
    phenomenon_time_for_procedure: RwLock<BTreeMap<String, TimePeriod>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            procedures: RwLock::new(IdSet::new()),
            offerings: RwLock::new(IdSet::new()),
            observable_properties: RwLock::new(IdSet::new()),
            features_of_interest: RwLock::new(IdSet::new()),
            observation_identifiers: RwLock::new(IdSet::new()),
            result_templates: RwLock::new(IdSet::new()),
            procedure_description_formats: RwLock::new(IdSet::new()),
            feature_of_interest_types: RwLock::new(IdSet::new()),
            composite_phenomena: RwLock::new(IdSet::new()),
            procedures_for_offering: RwLock::new(IdMap::new()),
            observable_properties_for_offering: RwLock::new(IdMap::new()),
            features_for_offering: RwLock::new(IdMap::new()),
            related_features_for_offering: RwLock::new(IdMap::new()),
            result_templates_for_offering: RwLock::new(IdMap::new()),
            offerings_for_procedure: RwLock::new(IdMap::new()),
            observable_properties_for_procedure: RwLock::new(IdMap::new()),
            parent_procedures: RwLock::new(IdMap::new()),
            child_procedures: RwLock::new(IdMap::new()),
            observation_identifiers_for_procedure: RwLock::new(IdMap::new()),
            procedures_for_observable_property: RwLock::new(IdMap::new()),
            offerings_for_observable_property: RwLock::new(IdMap::new()),
            parent_features: RwLock::new(IdMap::new()),
            child_features: RwLock::new(IdMap::new()),
            roles_for_related_feature: RwLock::new(IdMap::new()),
            components_for_composite_phenomenon: RwLock::new(BTreeMap::new()),
            global_envelope: RwLock::new(None),
            envelope_for_offering: RwLock::new(BTreeMap::new()),
            global_phenomenon_time: RwLock::new(None),
            phenomenon_time_for_offering: RwLock::new(BTreeMap::new()),
            phenomenon_time_for_procedure: RwLock::new(BTreeMap::new()),
        }
    }

    set_category!(procedures, procedures, set_procedures);
    set_category!(offerings, offerings, set_offerings);
    set_category!(observable_properties, observable_properties, set_observable_properties);
    set_category!(features_of_interest, features_of_interest, set_features_of_interest);
    set_category!(observation_identifiers, observation_identifiers, set_observation_identifiers);
    set_category!(result_templates, result_templates, set_result_templates);
    set_category!(procedure_description_formats, procedure_description_formats, set_procedure_description_formats);
    set_category!(feature_of_interest_types, feature_of_interest_types, set_feature_of_interest_types);
    set_category!(composite_phenomena, composite_phenomena, set_composite_phenomena);

    map_category!(procedures_for_offering, procedures_for_offering, set_procedures_for_offering, replace_procedures_for_offerings);
    map_category!(
        observable_properties_for_offering,
        observable_properties_for_offering,
        set_observable_properties_for_offering,
        replace_observable_properties_for_offerings
    );
    map_category!(features_for_offering, features_for_offering, set_features_for_offering, replace_features_for_offerings);
    map_category!(
        related_features_for_offering,
        related_features_for_offering,
        set_related_features_for_offering,
        replace_related_features_for_offerings
    );
    map_category!(
        result_templates_for_offering,
        result_templates_for_offering,
        set_result_templates_for_offering,
        replace_result_templates_for_offerings
    );

    map_category!(offerings_for_procedure, offerings_for_procedure, set_offerings_for_procedure, replace_offerings_for_procedures);
    map_category!(
        observable_properties_for_procedure,
        observable_properties_for_procedure,
        set_observable_properties_for_procedure,
        replace_observable_properties_for_procedures
    );
    map_category!(parent_procedures, parent_procedures, set_parent_procedures, replace_parent_procedures);
    map_category!(child_procedures, child_procedures, set_child_procedures, replace_child_procedures);
    map_category!(
        observation_identifiers_for_procedure,
        observation_identifiers_for_procedure,
        set_observation_identifiers_for_procedure,
        replace_observation_identifiers_for_procedures
    );

    map_category!(
        procedures_for_observable_property,
        procedures_for_observable_property,
        set_procedures_for_observable_property,
        replace_procedures_for_observable_properties
    );
    map_category!(
        offerings_for_observable_property,
        offerings_for_observable_property,
        set_offerings_for_observable_property,
        replace_offerings_for_observable_properties
    );

    pub fn parent_features(&self, feature: &str) -> IdSet {
        self.parent_features.read().get(feature).cloned().unwrap_or_default()
    }

    pub fn child_features(&self, feature: &str) -> IdSet {
        self.child_features.read().get(feature).cloned().unwrap_or_default()
    }

    /// Sets one feature's parents and moves it under their child lists.
    pub fn set_parent_features(&self, feature: &str, parents: IdSet) {
        let mut parent_map = self.parent_features.write();
        let mut child_map = self.child_features.write();

        if let Some(old) = parent_map.remove(feature) {
            for parent in &old {
                if let Some(children) = child_map.get_mut(parent) {
                    children.remove(feature);
                    if children.is_empty() {
                        child_map.remove(parent);
                    }
                }
            }
        }
        for parent in &parents {
            child_map.entry(parent.clone()).or_default().insert(feature.to_string());
        }
        if !parents.is_empty() {
            parent_map.insert(feature.to_string(), parents);
        }
    }

    /// Replaces the feature hierarchy; the child side is derived from `parents`.
    pub fn replace_parent_features(&self, parents: IdMap) {
        let parents = strip_empty(parents);
        let mut children = IdMap::new();
        for (feature, feature_parents) in &parents {
            for parent in feature_parents {
                children.entry(parent.clone()).or_default().insert(feature.clone());
            }
        }

        let mut parent_map = self.parent_features.write();
        let mut child_map = self.child_features.write();
        *parent_map = parents;
        *child_map = children;
    }

    map_category!(roles_for_related_feature, roles_for_related_feature, set_roles_for_related_feature, replace_roles_for_related_features);

    pub fn add_feature_of_interest(&self, id: &str) {
        self.features_of_interest.write().insert(id.to_string());
    }

    pub fn add_observation_identifier(&self, id: &str) {
        self.observation_identifiers.write().insert(id.to_string());
    }

    pub fn has_procedure(&self, id: &str) -> bool {
        self.procedures.read().contains(id)
    }

    pub fn has_offering(&self, id: &str) -> bool {
        self.offerings.read().contains(id)
    }

    pub fn components_for_composite_phenomenon(&self, id: &str) -> Vec<String> {
        self.components_for_composite_phenomenon.read().get(id).cloned().unwrap_or_default()
    }

    pub fn replace_components_for_composite_phenomena(&self, components: BTreeMap<String, Vec<String>>) {
        *self.components_for_composite_phenomenon.write() = components;
    }

    pub fn global_envelope(&self) -> Option<Envelope> {
        *self.global_envelope.read()
    }

    pub fn set_global_envelope(&self, envelope: Option<Envelope>) {
        *self.global_envelope.write() = envelope;
    }

    pub fn envelope_for_offering(&self, offering: &str) -> Option<Envelope> {
        self.envelope_for_offering.read().get(offering).copied()
    }

    pub fn replace_envelopes_for_offerings(&self, envelopes: BTreeMap<String, Envelope>) {
        *self.envelope_for_offering.write() = envelopes;
    }

    pub fn global_phenomenon_time(&self) -> Option<TimePeriod> {
        *self.global_phenomenon_time.read()
    }

    pub fn set_global_phenomenon_time(&self, period: Option<TimePeriod>) {
        *self.global_phenomenon_time.write() = period;
    }

    pub fn phenomenon_time_for_offering(&self, offering: &str) -> Option<TimePeriod> {
        self.phenomenon_time_for_offering.read().get(offering).copied()
    }

    pub fn replace_phenomenon_times_for_offerings(&self, periods: BTreeMap<String, TimePeriod>) {
        *self.phenomenon_time_for_offering.write() = periods;
    }

    pub fn phenomenon_time_for_procedure(&self, procedure: &str) -> Option<TimePeriod> {
        self.phenomenon_time_for_procedure.read().get(procedure).copied()
    }

    pub fn set_phenomenon_time_for_procedure(&self, procedure: &str, period: Option<TimePeriod>) {
        let mut times = self.phenomenon_time_for_procedure.write();
        match period {
            Some(period) => {
                times.insert(procedure.to_string(), period);
            }
            None => {
                times.remove(procedure);
            }
        }
    }

    /// Writes every per-procedure key for one procedure.
    pub fn set_procedure_entry(&self, procedure: &str, entry: ProcedureEntry) {
        self.set_offerings_for_procedure(procedure, entry.offerings);
        self.set_observable_properties_for_procedure(procedure, entry.observable_properties);
        self.set_parent_procedures(procedure, entry.parents);
        self.set_child_procedures(procedure, entry.children);
        self.set_observation_identifiers_for_procedure(procedure, entry.observation_identifiers);
        self.set_phenomenon_time_for_procedure(procedure, entry.phenomenon_time);
    }

    pub fn procedure_entry(&self, procedure: &str) -> ProcedureEntry {
        ProcedureEntry {
            offerings: self.offerings_for_procedure(procedure),
            observable_properties: self.observable_properties_for_procedure(procedure),
            parents: self.parent_procedures(procedure),
            children: self.child_procedures(procedure),
            observation_identifiers: self.observation_identifiers_for_procedure(procedure),
            phenomenon_time: self.phenomenon_time_for_procedure(procedure),
        }
    }

    /// Drops per-procedure keys for procedures no longer in `keep`.
    pub fn retain_procedures(&self, keep: &IdSet) {
        self.offerings_for_procedure.write().retain(|k, _| keep.contains(k));
        self.observable_properties_for_procedure.write().retain(|k, _| keep.contains(k));
        self.parent_procedures.write().retain(|k, _| keep.contains(k));
        self.child_procedures.write().retain(|k, _| keep.contains(k));
        self.observation_identifiers_for_procedure.write().retain(|k, _| keep.contains(k));
        self.phenomenon_time_for_procedure.write().retain(|k, _| keep.contains(k));
    }

    /// Copies every category; categories are read one at a time.
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            procedures: self.procedures(),
            offerings: self.offerings(),
            observable_properties: self.observable_properties(),
            features_of_interest: self.features_of_interest(),
            observation_identifiers: self.observation_identifiers(),
            result_templates: self.result_templates(),
            procedure_description_formats: self.procedure_description_formats(),
            feature_of_interest_types: self.feature_of_interest_types(),
            composite_phenomena: self.composite_phenomena(),
            procedures_for_offering: self.procedures_for_offering.read().clone(),
            observable_properties_for_offering: self.observable_properties_for_offering.read().clone(),
            features_for_offering: self.features_for_offering.read().clone(),
            related_features_for_offering: self.related_features_for_offering.read().clone(),
            result_templates_for_offering: self.result_templates_for_offering.read().clone(),
            offerings_for_procedure: self.offerings_for_procedure.read().clone(),
            observable_properties_for_procedure: self.observable_properties_for_procedure.read().clone(),
            parent_procedures: self.parent_procedures.read().clone(),
            child_procedures: self.child_procedures.read().clone(),
            observation_identifiers_for_procedure: self.observation_identifiers_for_procedure.read().clone(),
            procedures_for_observable_property: self.procedures_for_observable_property.read().clone(),
            offerings_for_observable_property: self.offerings_for_observable_property.read().clone(),
            parent_features: self.parent_features.read().clone(),
            child_features: self.child_features.read().clone(),
            roles_for_related_feature: self.roles_for_related_feature.read().clone(),
            components_for_composite_phenomenon: self.components_for_composite_phenomenon.read().clone(),
            global_envelope: self.global_envelope(),
            envelope_for_offering: self.envelope_for_offering.read().clone(),
            global_phenomenon_time: self.global_phenomenon_time(),
            phenomenon_time_for_offering: self.phenomenon_time_for_offering.read().clone(),
            phenomenon_time_for_procedure: self.phenomenon_time_for_procedure.read().clone(),
        }
    }

    pub fn clear(&self) {
        self.set_procedures(IdSet::new());
        self.set_offerings(IdSet::new());
        self.set_observable_properties(IdSet::new());
        self.set_features_of_interest(IdSet::new());
        self.set_observation_identifiers(IdSet::new());
        self.set_result_templates(IdSet::new());
        self.set_procedure_description_formats(IdSet::new());
        self.set_feature_of_interest_types(IdSet::new());
        self.set_composite_phenomena(IdSet::new());
        self.replace_procedures_for_offerings(IdMap::new());
        self.replace_observable_properties_for_offerings(IdMap::new());
        self.replace_features_for_offerings(IdMap::new());
        self.replace_related_features_for_offerings(IdMap::new());
        self.replace_result_templates_for_offerings(IdMap::new());
        self.retain_procedures(&IdSet::new());
        self.replace_procedures_for_observable_properties(IdMap::new());
        self.replace_offerings_for_observable_properties(IdMap::new());
        self.replace_parent_features(IdMap::new());
        self.replace_roles_for_related_features(IdMap::new());
        self.replace_components_for_composite_phenomena(BTreeMap::new());
        self.set_global_envelope(None);
        self.replace_envelopes_for_offerings(BTreeMap::new());
        self.set_global_phenomenon_time(None);
        self.replace_phenomenon_times_for_offerings(BTreeMap::new());
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
