//! Resolves requested attribute names into upstream modality identifiers.

use crate::catalog::{AttributeDescriptor, ModalityCatalog, ModalityId};
use crate::error::{BridgeError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

/// Descriptor field that attribute names are matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeMatch {
    /// Match on the NGSI-LD attribute name (e.g. `temperature`)
    Key,
    /// Match on the upstream slug (e.g. `wind-speed`)
    #[default]
    Slug,
}

impl AttributeMatch {
    fn matches(self, descriptor: &AttributeDescriptor, name: &str) -> bool {
        match self {
            AttributeMatch::Key => descriptor.key == name,
            AttributeMatch::Slug => descriptor.slug == name,
        }
    }
}

/// Modality ids to request for `entity_type`.
///
/// With no attribute list (absent or blank) every registered modality is
/// returned. Otherwise
/// `attributes` is a comma-separated list matched on `by`; names that match
/// nothing are ignored. Ids come back in catalog declaration order.
pub fn resolve_modality_ids(
    catalog: &ModalityCatalog,
    entity_type: &str,
    attributes: Option<&str>,
    by: AttributeMatch,
) -> Result<Vec<ModalityId>> {
    let definition = catalog.entity_type(entity_type)?;

    let ids: Vec<ModalityId> = match attributes.map(str::trim).filter(|a| !a.is_empty()) {
        None => definition.modality_ids(),
        Some(attrs) => {
            // Empty fragments stay in the request and simply match nothing
            let requested: HashSet<&str> = attrs.split(',').map(str::trim).collect();
            definition
                .iter()
                .filter(|(_, descriptor)| {
                    requested.iter().any(|name| by.matches(descriptor, name))
                })
                .map(|(id, _)| id)
                .collect()
        }
    };

    if ids.is_empty() {
        return Err(BridgeError::NoValidAttributes(entity_type.to_string()));
    }

    debug!(entity_type, ?ids, "Resolved modality ids");

    Ok(ids)
}

/// Render ids in the upstream filter syntax, e.g. `in.(4,11)`
pub fn render_filter(ids: &[ModalityId]) -> String {
    let joined = ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({})", joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::WEATHER_OBSERVED;

    #[test]
    fn test_all_modalities_when_no_attributes() {
        let catalog = ModalityCatalog::builtin();

        let ids = resolve_modality_ids(&catalog, WEATHER_OBSERVED, None, AttributeMatch::Key).unwrap();
        assert_eq!(ids, (1..=15).collect::<Vec<_>>());

        let ids = resolve_modality_ids(&catalog, WEATHER_OBSERVED, Some(""), AttributeMatch::Slug)
            .unwrap();
        assert_eq!(ids.len(), 15);
    }

    #[test]
    fn test_named_attributes_by_key() {
        let catalog = ModalityCatalog::builtin();

        let ids = resolve_modality_ids(
            &catalog,
            WEATHER_OBSERVED,
            Some("temperature,humidity"),
            AttributeMatch::Key,
        )
        .unwrap();
        assert_eq!(ids, vec![4, 11]);

        // Output follows the catalog, not the request
        let ids = resolve_modality_ids(
            &catalog,
            WEATHER_OBSERVED,
            Some("humidity, temperature"),
            AttributeMatch::Key,
        )
        .unwrap();
        assert_eq!(ids, vec![4, 11]);
    }

    #[test]
    fn test_named_attributes_by_slug() {
        let catalog = ModalityCatalog::builtin();

        let ids = resolve_modality_ids(
            &catalog,
            WEATHER_OBSERVED,
            Some("wind-speed,co2,bogus"),
            AttributeMatch::Slug,
        )
        .unwrap();
        assert_eq!(ids, vec![12, 14]);

        // Keys are not slugs
        assert!(matches!(
            resolve_modality_ids(&catalog, WEATHER_OBSERVED, Some("windSpeed"), AttributeMatch::Slug),
            Err(BridgeError::NoValidAttributes(_))
        ));
    }

    #[test]
    fn test_duplicate_names_yield_one_id() {
        let catalog = ModalityCatalog::builtin();
        let ids = resolve_modality_ids(
            &catalog,
            WEATHER_OBSERVED,
            Some("rain,rain"),
            AttributeMatch::Slug,
        )
        .unwrap();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_no_valid_attributes() {
        let catalog = ModalityCatalog::builtin();
        let result = resolve_modality_ids(
            &catalog,
            WEATHER_OBSERVED,
            Some("foo,bar"),
            AttributeMatch::Key,
        );
        assert!(matches!(result, Err(BridgeError::NoValidAttributes(t)) if t == WEATHER_OBSERVED));
    }

    #[test]
    fn test_separator_only_attributes() {
        let catalog = ModalityCatalog::builtin();

        for attrs in [",", " , ", ",,"] {
            let result =
                resolve_modality_ids(&catalog, WEATHER_OBSERVED, Some(attrs), AttributeMatch::Slug);
            assert!(
                matches!(result, Err(BridgeError::NoValidAttributes(_))),
                "attrs={:?} resolved to {:?}",
                attrs,
                result
            );
        }

        // Blank input still means no filter
        let ids = resolve_modality_ids(&catalog, WEATHER_OBSERVED, Some("   "), AttributeMatch::Slug)
            .unwrap();
        assert_eq!(ids.len(), 15);
    }

    #[test]
    fn test_unknown_entity_type() {
        let catalog = ModalityCatalog::builtin();
        let result = resolve_modality_ids(&catalog, "Parking", None, AttributeMatch::Key);
        assert!(matches!(result, Err(BridgeError::UnknownEntityType(_))));
    }

    #[test]
    fn test_all_keys_resolve_to_full_set() {
        let catalog = ModalityCatalog::builtin();
        let definition = catalog.entity_type(WEATHER_OBSERVED).unwrap();
        let keys = definition
            .iter()
            .map(|(_, d)| d.key.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let ids =
            resolve_modality_ids(&catalog, WEATHER_OBSERVED, Some(&keys), AttributeMatch::Key).unwrap();
        assert_eq!(ids, definition.modality_ids());
    }

    #[test]
    fn test_render_filter() {
        assert_eq!(render_filter(&[4, 11, 14]), "in.(4,11,14)");
        assert_eq!(render_filter(&[7]), "in.(7)");
    }
}
