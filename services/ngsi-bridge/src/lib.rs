//! NGSI-LD Sensor Bridge
//!
//! Serves readings from the sensor telemetry API as NGSI-LD context entities,
//! so context brokers can consume environmental measurements (temperature,
//! humidity, air quality, ...) without knowing the upstream data model.
//!
//! ## Features
//!
//! - **Modality Catalog**: per entity type, which upstream modality ids map
//!   onto which entity attributes, with unit codes and healthy ranges
//! - **Attribute Resolution**: `attrs` filters are resolved into the
//!   `modality_id=in.(...)` filter expected upstream
//! - **Translation**: flat per-reading records are grouped per device into
//!   entities with single-valued or temporal Properties
//! - **Pass-through**: raw upstream reads of modalities, features of interest,
//!   devices, and latest measurements
//!
//! ## Architecture
//!
//! ```text
//!  NGSI-LD client            Bridge                          Telemetry API
//! ┌──────────────┐   ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │ GET entities │──▶│ Resolver ──▶ Upstream ───┼──▶│ latest_measurements_averages │
//! │  type/attrs  │   │                 │        │   │ rpc/measurements_averages    │
//! └──────────────┘   │                 ▼        │   └──────────────────────────────┘
//!        ▲           │            Translator    │
//!        │           │                 │        │
//!        └───────────┼─────────────────┘        │
//!                    │   Modality Catalog       │
//!                    └──────────────────────────┘
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod query;
pub mod resolver;
pub mod translator;
pub mod upstream;

pub use api::{create_router, AppState};
pub use catalog::{AttributeDescriptor, EntityTypeDefinition, ModalityCatalog, ModalityId};
pub use config::Config;
pub use error::{BridgeError, Result};
pub use query::{TimeRel, TimeWindow};
pub use resolver::{render_filter, resolve_modality_ids, AttributeMatch};
pub use translator::{translate, Entity, Property, PropertyValue, RawMeasurement, TranslationMode};
pub use upstream::{fetch_temporal, HttpMeasurementSource, MeasurementSource};
