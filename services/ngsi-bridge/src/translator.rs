//! Translation of raw upstream measurements into NGSI-LD entities.
//!
//! Records are grouped per device in first-seen order. Each record is mapped
//! through the catalog onto an attribute of the device entity; records with an
//! unknown modality or without a value are dropped silently, since upstream
//! data regularly has gaps.

use crate::catalog::{AttributeDescriptor, ModalityCatalog, ModalityId};
use crate::error::Result;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, trace};

/// Prefix of every entity id produced by the bridge
pub const DEVICE_URN_PREFIX: &str = "urn:ngsi-ld:Device:";

const PROPERTY: &str = "Property";

/// One reading as delivered by the upstream API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMeasurement {
    /// Upstream device identifier (numeric or string on the wire)
    #[serde(deserialize_with = "string_or_number")]
    pub device_id: String,
    /// Upstream modality identifier
    pub modality_id: ModalityId,
    /// Measured value, absent when the sensor reported nothing
    #[serde(default)]
    pub value: Option<f64>,
    /// Observation timestamp, passed through verbatim
    #[serde(default)]
    pub observed_at: Option<String>,
}

impl RawMeasurement {
    pub fn new(
        device_id: impl Into<String>,
        modality_id: ModalityId,
        value: Option<f64>,
        observed_at: Option<&str>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            modality_id,
            value,
            observed_at: observed_at.map(str::to_string),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Text(s) => s,
        Repr::Number(n) => n.to_string(),
    })
}

/// How repeated readings of one attribute are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationMode {
    /// One value per attribute; later readings replace earlier ones
    Single,
    /// Every reading is kept, in arrival order
    Temporal,
}

// Largest magnitude at which every integer is exactly representable in f64
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Serialize whole numbers as JSON integers (`50`, not `50.0`)
fn serialize_number<S>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

struct Number(f64);

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serialize_number(&self.0, serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRange {
    #[serde(serialize_with = "serialize_number")]
    pub min: f64,
    #[serde(serialize_with = "serialize_number")]
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyMetadata {
    pub unit_code: String,
    pub health_range: HealthRange,
    pub slug: String,
}

/// A single observation of an attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyValue {
    #[serde(serialize_with = "serialize_number")]
    pub value: f64,
    pub metadata: PropertyMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<String>,
}

/// NGSI-LD Property, either single-valued or temporal
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Single(PropertyValue),
    Temporal(Vec<PropertyValue>),
}

impl Serialize for Property {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", PROPERTY)?;
        match self {
            Property::Single(pv) => {
                map.serialize_entry("value", &Number(pv.value))?;
                map.serialize_entry("metadata", &pv.metadata)?;
                if let Some(observed_at) = &pv.observed_at {
                    map.serialize_entry("observedAt", observed_at)?;
                }
            }
            Property::Temporal(values) => {
                map.serialize_entry("values", values)?;
            }
        }
        map.end()
    }
}

/// Timestamps an entity was observed at, without duplicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateObserved {
    values: Vec<String>,
}

impl DateObserved {
    /// Record a timestamp unless it was already seen. Comparison is exact.
    pub fn observe(&mut self, timestamp: &str) {
        if !self.values.iter().any(|t| t == timestamp) {
            self.values.push(timestamp.to_string());
        }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

impl Serialize for DateObserved {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", PROPERTY)?;
        map.serialize_entry("values", &self.values)?;
        map.end()
    }
}

/// NGSI-LD entity for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    #[serde(rename = "dateObserved")]
    pub date_observed: DateObserved,
    #[serde(flatten)]
    pub attributes: IndexMap<String, Property>,
}

impl Entity {
    pub fn new(device_id: &str, entity_type: &str, context: &[String]) -> Self {
        Self {
            id: format!("{}{}", DEVICE_URN_PREFIX, device_id),
            entity_type: entity_type.to_string(),
            context: context.to_vec(),
            date_observed: DateObserved::default(),
            attributes: IndexMap::new(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&Property> {
        self.attributes.get(key)
    }

    fn apply(&mut self, key: &str, value: PropertyValue, mode: TranslationMode) {
        match mode {
            TranslationMode::Single => {
                self.attributes
                    .insert(key.to_string(), Property::Single(value));
            }
            TranslationMode::Temporal => {
                // The mode is fixed for a whole call, so slots here are always temporal
                if let Property::Temporal(values) = self
                    .attributes
                    .entry(key.to_string())
                    .or_insert_with(|| Property::Temporal(Vec::new()))
                {
                    values.push(value);
                }
            }
        }
    }
}

/// Build the encoded observation for one reading, or `None` if it has no value.
///
/// `min`/`max` are carried as a health range annotation only; the value is
/// not checked against them.
pub fn build_property_value(
    value: Option<f64>,
    descriptor: &AttributeDescriptor,
    observed_at: Option<&str>,
) -> Option<PropertyValue> {
    let value = value?;

    Some(PropertyValue {
        value,
        metadata: PropertyMetadata {
            unit_code: descriptor.unit.clone(),
            health_range: HealthRange {
                min: descriptor.min,
                max: descriptor.max,
            },
            slug: descriptor.slug.clone(),
        },
        observed_at: observed_at.map(str::to_string),
    })
}

/// Translate raw measurements into one entity per device.
///
/// Entities are returned in the order their device was first seen.
pub fn translate(
    catalog: &ModalityCatalog,
    records: &[RawMeasurement],
    entity_type: &str,
    mode: TranslationMode,
) -> Result<Vec<Entity>> {
    let definition = catalog.entity_type(entity_type)?;
    let mut by_device: IndexMap<&str, Entity> = IndexMap::new();
    let mut dropped = 0usize;

    for record in records {
        let Some(descriptor) = definition.descriptor(record.modality_id) else {
            trace!(
                device_id = %record.device_id,
                modality_id = record.modality_id,
                "Skipping record with unmapped modality"
            );
            dropped += 1;
            continue;
        };

        let entity = by_device
            .entry(record.device_id.as_str())
            .or_insert_with(|| Entity::new(&record.device_id, entity_type, definition.context()));

        let observed_at = record.observed_at.as_deref();
        let Some(value) = build_property_value(record.value, descriptor, observed_at) else {
            dropped += 1;
            continue;
        };

        entity.apply(&descriptor.key, value, mode);

        if let Some(observed_at) = observed_at {
            entity.date_observed.observe(observed_at);
        }
    }

    debug!(
        entity_type,
        records = records.len(),
        dropped,
        entities = by_device.len(),
        "Translated measurements"
    );

    Ok(by_device.into_values().collect())
}
