// Tue Jan 13 2026 - Alex

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type IdSet = BTreeSet<String>;
pub type IdMap = BTreeMap<String, IdSet>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimePeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn instant(time: DateTime<Utc>) -> Self {
        Self { start: time, end: time }
    }

    pub fn extend(&mut self, other: &TimePeriod) {
        if other.start < self.start {
            self.start = other.start;
        }
        if other.end > self.end {
            self.end = other.end;
        }
    }

    pub fn union<'a, I>(periods: I) -> Option<TimePeriod>
    where
        I: IntoIterator<Item = &'a TimePeriod>,
    {
        let mut iter = periods.into_iter();
        let mut merged = *iter.next()?;
        for period in iter {
            merged.extend(period);
        }
        Some(merged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub srid: i32,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn point(srid: i32, x: f64, y: f64) -> Self {
        Self {
            srid,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    pub fn expand_to_include(&mut self, other: &Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Merges envelopes sharing the first envelope's SRID; others are skipped.
    pub fn union<'a, I>(envelopes: I) -> Option<Envelope>
    where
        I: IntoIterator<Item = &'a Envelope>,
    {
        let mut iter = envelopes.into_iter();
        let mut merged = *iter.next()?;
        for envelope in iter {
            if envelope.srid == merged.srid {
                merged.expand_to_include(envelope);
            }
        }
        Some(merged)
    }
}

/// Point-in-time copy of every cache category.
///
/// All cross references are identifiers, so a snapshot carries no datasource
/// state and can be compared or serialized after the session is gone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub procedures: IdSet,
    pub offerings: IdSet,
    pub observable_properties: IdSet,
    pub features_of_interest: IdSet,
    pub observation_identifiers: IdSet,
    pub result_templates: IdSet,
    pub procedure_description_formats: IdSet,
    pub feature_of_interest_types: IdSet,
    pub composite_phenomena: IdSet,

    pub procedures_for_offering: IdMap,
    pub observable_properties_for_offering: IdMap,
    pub features_for_offering: IdMap,
    pub related_features_for_offering: IdMap,
    pub result_templates_for_offering: IdMap,

    pub offerings_for_procedure: IdMap,
    pub observable_properties_for_procedure: IdMap,
    pub parent_procedures: IdMap,
    pub child_procedures: IdMap,
    pub observation_identifiers_for_procedure: IdMap,

    pub procedures_for_observable_property: IdMap,
    pub offerings_for_observable_property: IdMap,

    pub parent_features: IdMap,
    pub child_features: IdMap,
    pub roles_for_related_feature: IdMap,
    pub components_for_composite_phenomenon: BTreeMap<String, Vec<String>>,

    pub global_envelope: Option<Envelope>,
    pub envelope_for_offering: BTreeMap<String, Envelope>,

    pub global_phenomenon_time: Option<TimePeriod>,
    pub phenomenon_time_for_offering: BTreeMap<String, TimePeriod>,
    pub phenomenon_time_for_procedure: BTreeMap<String, TimePeriod>,
}

impl CacheSnapshot {
    pub fn is_empty(&self) -> bool {
        *self == CacheSnapshot::default()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
