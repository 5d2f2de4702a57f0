//! Modality catalog: which upstream modalities make up each NGSI-LD entity type.
//!
//! The catalog is built once at startup and shared read-only between the
//! resolver and the translator. Declaration order of modalities is kept, since
//! the resolver reports identifiers in that order.

use crate::error::{BridgeError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Numeric modality identifier used by the upstream API
pub type ModalityId = u32;

/// Entity type served by the built-in catalog
pub const WEATHER_OBSERVED: &str = "WeatherObserved";

const NGSI_LD_CORE_CONTEXT: &str = "https://uri.etsi.org/ngsi-ld/v1/ngsi-ld-core-context.jsonld";
const WEATHER_CONTEXT: &str =
    "https://raw.githubusercontent.com/smart-data-models/dataModel.Weather/master/context.jsonld";

// (id, key, unit code, min, max, slug)
const WEATHER_OBSERVED_MODALITIES: &[(ModalityId, &str, &str, f64, f64, &str)] = &[
    (1, "light", "LUX", 0.0, 12000.0, "light"),
    (2, "loudness", "DEC", 34.6, 85.0, "noise"),
    (3, "rainfall", "MMT", 0.0, 8.0, "rain"),
    (4, "temperature", "CEL", -10.0, 50.0, "temperature"),
    (5, "voc", "PPB", 0.0, 600.0, "voc"),
    (6, "sulphurDioxide", "PPB", 0.0, 7.09, "so2"),
    (7, "ozone", "PPB", 0.0, 47.3, "o3"),
    (8, "nitrogenDioxide", "PPB", 0.0, 19.7, "no2"),
    (9, "nitrogenOxide", "PPB", 0.0, 25000.0, "no"),
    (10, "dust", "MCG", 0.0, 50.0, "pm10"),
    (11, "humidity", "P1", 0.0, 100.0, "humidity"),
    (12, "carbonDioxide", "PPM", 0.0, 430.0, "co2"),
    (13, "atmosphericPressure", "HPA", 750.0, 1050.0, "atmospheric-pressure"),
    (14, "windSpeed", "KMT", 0.0, 50.0, "wind-speed"),
    (15, "windDirection", "DEG", 0.0, 359.9, "wind-direction"),
];

/// Describes how one upstream modality maps onto an entity attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Attribute name on the NGSI-LD entity
    pub key: String,
    /// UN/CEFACT unit code
    pub unit: String,
    /// Lower bound of the healthy range
    pub min: f64,
    /// Upper bound of the healthy range
    pub max: f64,
    /// Short identifier used in upstream filters
    pub slug: String,
}

impl AttributeDescriptor {
    pub fn new(key: &str, unit: &str, min: f64, max: f64, slug: &str) -> Self {
        Self {
            key: key.to_string(),
            unit: unit.to_string(),
            min,
            max,
            slug: slug.to_string(),
        }
    }
}

/// Modalities and JSON-LD context of a single entity type
#[derive(Debug, Clone, Default)]
pub struct EntityTypeDefinition {
    context: Vec<String>,
    modalities: IndexMap<ModalityId, AttributeDescriptor>,
}

impl EntityTypeDefinition {
    pub fn new(context: Vec<String>) -> Self {
        Self {
            context,
            modalities: IndexMap::new(),
        }
    }

    /// Register a modality. Returns false if the id was already present.
    pub fn insert(&mut self, id: ModalityId, descriptor: AttributeDescriptor) -> bool {
        if self.modalities.contains_key(&id) {
            return false;
        }
        self.modalities.insert(id, descriptor);
        true
    }

    pub fn context(&self) -> &[String] {
        &self.context
    }

    pub fn descriptor(&self, id: ModalityId) -> Option<&AttributeDescriptor> {
        self.modalities.get(&id)
    }

    /// Modality ids in declaration order
    pub fn modality_ids(&self) -> Vec<ModalityId> {
        self.modalities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModalityId, &AttributeDescriptor)> {
        self.modalities.iter().map(|(id, d)| (*id, d))
    }

    pub fn len(&self) -> usize {
        self.modalities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modalities.is_empty()
    }
}

/// Read-only mapping from entity type name to its modality definitions
#[derive(Debug, Clone, Default)]
pub struct ModalityCatalog {
    types: IndexMap<String, EntityTypeDefinition>,
}

/// On-disk catalog layout
#[derive(Debug, Deserialize)]
struct CatalogFileEntry {
    #[serde(default)]
    context: Vec<String>,
    modalities: Vec<ModalityFileEntry>,
}

#[derive(Debug, Deserialize)]
struct ModalityFileEntry {
    id: ModalityId,
    #[serde(flatten)]
    descriptor: AttributeDescriptor,
}

impl ModalityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog shipped with the service
    pub fn builtin() -> Self {
        let mut weather = EntityTypeDefinition::new(vec![
            NGSI_LD_CORE_CONTEXT.to_string(),
            WEATHER_CONTEXT.to_string(),
        ]);
        for (id, key, unit, min, max, slug) in WEATHER_OBSERVED_MODALITIES {
            weather.insert(*id, AttributeDescriptor::new(key, unit, *min, *max, slug));
        }

        let mut catalog = Self::new();
        catalog.register(WEATHER_OBSERVED, weather);
        catalog
    }

    /// Parse a catalog from its JSON representation
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: IndexMap<String, CatalogFileEntry> =
            serde_json::from_str(json).map_err(|e| BridgeError::CatalogLoad(e.to_string()))?;

        let mut catalog = Self::new();
        for (name, entry) in entries {
            let mut definition = EntityTypeDefinition::new(entry.context);
            for modality in entry.modalities {
                if !definition.insert(modality.id, modality.descriptor) {
                    return Err(BridgeError::CatalogLoad(format!(
                        "duplicate modality id {} for type {}",
                        modality.id, name
                    )));
                }
            }
            catalog.register(&name, definition);
        }

        if catalog.types.is_empty() {
            return Err(BridgeError::CatalogLoad("catalog defines no entity types".into()));
        }

        Ok(catalog)
    }

    /// Load the catalog from `path`, or fall back to the built-in one
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let catalog = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    BridgeError::CatalogLoad(format!("{}: {}", path.display(), e))
                })?;
                Self::from_json(&raw)?
            }
            None => Self::builtin(),
        };

        info!(
            entity_types = ?catalog.entity_types().collect::<Vec<_>>(),
            "Modality catalog loaded"
        );

        Ok(catalog)
    }

    pub fn register(&mut self, name: &str, definition: EntityTypeDefinition) {
        self.types.insert(name.to_string(), definition);
    }

    /// Look up an entity type, failing if the catalog does not know it
    pub fn entity_type(&self, entity_type: &str) -> Result<&EntityTypeDefinition> {
        self.types
            .get(entity_type)
            .ok_or_else(|| BridgeError::UnknownEntityType(entity_type.to_string()))
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_weather_observed() {
        let catalog = ModalityCatalog::builtin();
        let weather = catalog.entity_type(WEATHER_OBSERVED).unwrap();

        assert_eq!(weather.len(), 15);
        assert_eq!(weather.modality_ids(), (1..=15).collect::<Vec<_>>());
        assert_eq!(weather.context().len(), 2);

        let temperature = weather.descriptor(4).unwrap();
        assert_eq!(temperature.key, "temperature");
        assert_eq!(temperature.unit, "CEL");
        assert_eq!(temperature.min, -10.0);
        assert_eq!(temperature.max, 50.0);
    }

    #[test]
    fn test_unknown_entity_type() {
        let catalog = ModalityCatalog::builtin();
        assert!(matches!(
            catalog.entity_type("WaterQualityObserved"),
            Err(BridgeError::UnknownEntityType(t)) if t == "WaterQualityObserved"
        ));
        let weather = catalog.entity_type(WEATHER_OBSERVED).unwrap();
        assert!(weather.descriptor(999).is_none());
    }

    #[test]
    fn test_from_json_keeps_declaration_order() {
        let json = r#"{
            "WaterQualityObserved": {
                "context": ["https://example.org/context.jsonld"],
                "modalities": [
                    {"id": 30, "key": "pH", "unit": "C62", "min": 0, "max": 14, "slug": "ph"},
                    {"id": 21, "key": "turbidity", "unit": "NTU", "min": 0, "max": 5, "slug": "turbidity"}
                ]
            }
        }"#;

        let catalog = ModalityCatalog::from_json(json).unwrap();
        let water = catalog.entity_type("WaterQualityObserved").unwrap();
        assert_eq!(water.modality_ids(), vec![30, 21]);
        assert_eq!(water.descriptor(21).unwrap().slug, "turbidity");
        assert_eq!(
            catalog.entity_types().collect::<Vec<_>>(),
            vec!["WaterQualityObserved"]
        );
    }

    #[test]
    fn test_from_json_rejects_duplicate_ids() {
        let json = r#"{
            "T": {"modalities": [
                {"id": 1, "key": "a", "unit": "X", "min": 0, "max": 1, "slug": "a"},
                {"id": 1, "key": "b", "unit": "X", "min": 0, "max": 1, "slug": "b"}
            ]}
        }"#;

        assert!(matches!(
            ModalityCatalog::from_json(json),
            Err(BridgeError::CatalogLoad(msg)) if msg.contains("duplicate")
        ));
    }

    #[test]
    fn test_from_json_rejects_empty_catalog() {
        tokio_test::assert_err!(ModalityCatalog::from_json("{}"));
        tokio_test::assert_err!(ModalityCatalog::from_json("not json"));
    }

    #[test]
    fn test_load_without_path_is_builtin() {
        let catalog = ModalityCatalog::load(None).unwrap();
        assert_eq!(catalog.entity_types().collect::<Vec<_>>(), vec![WEATHER_OBSERVED]);
    }
}
