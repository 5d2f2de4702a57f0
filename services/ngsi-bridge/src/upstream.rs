//! Client for the upstream sensor telemetry API.

use crate::catalog::{AttributeDescriptor, EntityTypeDefinition, ModalityId};
use crate::config::UpstreamConfig;
use crate::error::{BridgeError, Result};
use crate::query::TimeWindow;
use crate::resolver::render_filter;
use crate::translator::RawMeasurement;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, instrument, warn};

const LATEST_MEASUREMENTS: &str = "latest_measurements_averages";
const MEASUREMENT_AVERAGES: &str = "rpc/measurements_averages";

/// Source of raw measurements
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    /// Latest averaged reading per device for the given modalities
    async fn latest(&self, modality_ids: &[ModalityId]) -> Result<Vec<RawMeasurement>>;

    /// Averaged series of one modality over a time window
    async fn averages(
        &self,
        modality_id: ModalityId,
        descriptor: &AttributeDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<RawMeasurement>>;

    /// Forward a read of `resource` and return the upstream body unchanged
    async fn passthrough(&self, resource: &str, params: &[(String, String)]) -> Result<Value>;
}

/// Request body of the averages RPC
#[derive(Debug, Serialize)]
struct AveragesRequest<'a> {
    _devices: &'a str,
    _from: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    _to: Option<&'a str>,
    _granularity: &'a str,
    _modality: &'a str,
    _show_out_of_range: bool,
}

/// One bucket returned by the averages RPC
#[derive(Debug, Deserialize)]
struct AverageRow {
    avg: Option<f64>,
    at: Option<String>,
}

impl AverageRow {
    // The RPC aggregates over the whole device group, so the series is keyed by modality
    fn into_measurement(self, modality_id: ModalityId) -> RawMeasurement {
        RawMeasurement {
            device_id: modality_id.to_string(),
            modality_id,
            value: self.avg,
            observed_at: self.at,
        }
    }
}

/// reqwest-backed measurement source
pub struct HttpMeasurementSource {
    client: Client,
    base_url: String,
    devices: String,
    granularity: String,
}

impl HttpMeasurementSource {
    /// Create a new client for the upstream API
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            devices: device_set(&config.devices),
            granularity: config.granularity.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

/// Postgres array literal of device ids, e.g. `{71,72}`
fn device_set(devices: &[u32]) -> String {
    let joined = devices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{}}}", joined)
}

fn record_outcome<T>(endpoint: &'static str, started: Instant, result: &Result<T>) {
    metrics::histogram!("bridge.upstream.duration_seconds", "endpoint" => endpoint)
        .record(started.elapsed().as_secs_f64());
    if result.is_err() {
        metrics::counter!("bridge.upstream.errors", "endpoint" => endpoint).increment(1);
    }
}

#[async_trait]
impl MeasurementSource for HttpMeasurementSource {
    #[instrument(skip(self))]
    async fn latest(&self, modality_ids: &[ModalityId]) -> Result<Vec<RawMeasurement>> {
        let started = Instant::now();
        let filter = render_filter(modality_ids);

        let result = async {
            let rows = self
                .client
                .get(self.url(LATEST_MEASUREMENTS))
                .query(&[("modality_id", filter.as_str())])
                .send()
                .await?
                .error_for_status()?
                .json::<Vec<RawMeasurement>>()
                .await?;
            Ok::<_, BridgeError>(rows)
        }
        .await;

        record_outcome("latest", started, &result);
        if let Ok(rows) = &result {
            debug!(rows = rows.len(), filter = %filter, "Fetched latest measurements");
        }
        result
    }

    #[instrument(skip(self, descriptor), fields(modality = %descriptor.key))]
    async fn averages(
        &self,
        modality_id: ModalityId,
        descriptor: &AttributeDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<RawMeasurement>> {
        let started = Instant::now();
        let body = AveragesRequest {
            _devices: &self.devices,
            _from: &window.from,
            _to: window.to.as_deref(),
            _granularity: &self.granularity,
            _modality: &descriptor.key,
            _show_out_of_range: false,
        };

        let result = async {
            let rows = self
                .client
                .post(self.url(MEASUREMENT_AVERAGES))
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json::<Vec<AverageRow>>()
                .await?;
            let records = rows
                .into_iter()
                .map(|row| row.into_measurement(modality_id))
                .collect::<Vec<_>>();
            Ok::<_, BridgeError>(records)
        }
        .await;

        record_outcome("averages", started, &result);
        result
    }

    #[instrument(skip(self, params))]
    async fn passthrough(&self, resource: &str, params: &[(String, String)]) -> Result<Value> {
        let started = Instant::now();

        let result = async {
            let body = self
                .client
                .get(self.url(resource))
                .query(params)
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;
            Ok::<_, BridgeError>(body)
        }
        .await;

        record_outcome("passthrough", started, &result);
        result
    }
}

/// Fetch the averaged series of every modality in `ids`.
///
/// Requests run concurrently; a failing modality is logged and left out, so
/// the caller gets whatever could be fetched. Records are returned grouped by
/// modality in the order of `ids`.
pub async fn fetch_temporal(
    source: &dyn MeasurementSource,
    definition: &EntityTypeDefinition,
    ids: &[ModalityId],
    window: &TimeWindow,
) -> Vec<RawMeasurement> {
    let requests = ids.iter().filter_map(|&id| {
        let descriptor = definition.descriptor(id)?;
        Some(async move { (id, source.averages(id, descriptor, window).await) })
    });

    let mut records = Vec::new();
    for (id, result) in join_all(requests).await {
        match result {
            Ok(rows) => records.extend(rows),
            Err(e) => {
                warn!(modality_id = id, error = %e, "Skipping modality after upstream failure");
            }
        }
    }
    records
}

/// Upstream resources exposed through the pass-through endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughResource {
    Modalities,
    Fois,
    Devices,
    LatestMeasurements,
}

impl PassthroughResource {
    /// Path of the resource on the upstream API
    pub fn path(self) -> &'static str {
        match self {
            PassthroughResource::Modalities => "modalities",
            PassthroughResource::Fois => "fois",
            PassthroughResource::Devices => "devices",
            PassthroughResource::LatestMeasurements => LATEST_MEASUREMENTS,
        }
    }

    /// Parameter applied when the caller does not set it
    pub fn default_param(self) -> (&'static str, &'static str) {
        match self {
            PassthroughResource::Modalities => (
                "select",
                "*,sensor_modalities(sensor_id,min_measurement,max_measurement)",
            ),
            PassthroughResource::Fois => ("select", "*,device_ids:devices(id)"),
            PassthroughResource::Devices => (
                "select",
                "*,sensors:sensors.device_sensors(id,sensor_modalities(modality_id))",
            ),
            PassthroughResource::LatestMeasurements => ("modality_id", "in.(4,11,14)"),
        }
    }

    /// Caller parameters with the resource default filled in
    pub fn params(self, mut params: Vec<(String, String)>) -> Vec<(String, String)> {
        let (name, value) = self.default_param();
        if !params.iter().any(|(k, v)| k == name && !v.is_empty()) {
            params.retain(|(k, _)| k != name);
            params.push((name.to_string(), value.to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModalityCatalog, WEATHER_OBSERVED};
    use mockall::predicate::eq;
    use serde_json::json;

    fn window() -> TimeWindow {
        TimeWindow {
            from: "2024-01-01T00:00:00Z".to_string(),
            to: Some("2024-01-02T00:00:00Z".to_string()),
        }
    }

    #[test]
    fn test_device_set_literal() {
        assert_eq!(device_set(&[71, 72, 120]), "{71,72,120}");
        assert_eq!(device_set(&[]), "{}");
    }

    #[test]
    fn test_averages_request_body() {
        let body = AveragesRequest {
            _devices: "{71,72}",
            _from: "2024-01-01T00:00:00Z",
            _to: None,
            _granularity: "1 hour",
            _modality: "temperature",
            _show_out_of_range: false,
        };

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "_devices": "{71,72}",
                "_from": "2024-01-01T00:00:00Z",
                "_granularity": "1 hour",
                "_modality": "temperature",
                "_show_out_of_range": false
            })
        );
    }

    #[test]
    fn test_average_rows_are_keyed_by_modality() {
        let rows: Vec<AverageRow> = serde_json::from_value(json!([
            {"avg": 20.5, "at": "2024-01-01T00:00:00Z"},
            {"avg": null, "at": "2024-01-01T01:00:00Z"}
        ]))
        .unwrap();

        let records: Vec<_> = rows.into_iter().map(|r| r.into_measurement(4)).collect();
        assert_eq!(
            records[0],
            RawMeasurement::new("4", 4, Some(20.5), Some("2024-01-01T00:00:00Z"))
        );
        assert_eq!(records[1].value, None);
    }

    #[test]
    fn test_http_source_normalises_base_url() {
        let source = HttpMeasurementSource::new(&UpstreamConfig::new("http://api.local/")).unwrap();
        assert_eq!(
            source.url(LATEST_MEASUREMENTS),
            "http://api.local/latest_measurements_averages"
        );
    }

    #[tokio::test]
    async fn test_fetch_temporal_tolerates_failures() {
        let catalog = ModalityCatalog::builtin();
        let definition = catalog.entity_type(WEATHER_OBSERVED).unwrap();

        let mut source = MockMeasurementSource::new();
        source
            .expect_averages()
            .with(eq(4), mockall::predicate::always(), eq(window()))
            .returning(|id, _, _| {
                Ok(vec![RawMeasurement::new(
                    id.to_string(),
                    id,
                    Some(21.0),
                    Some("2024-01-01T00:00:00Z"),
                )])
            });
        source
            .expect_averages()
            .with(eq(11), mockall::predicate::always(), eq(window()))
            .returning(|_, _, _| Err(BridgeError::UpstreamFetch("timeout".into())));
        source
            .expect_averages()
            .with(eq(14), mockall::predicate::always(), eq(window()))
            .returning(|id, _, _| {
                Ok(vec![
                    RawMeasurement::new(id.to_string(), id, Some(3.0), Some("2024-01-01T00:00:00Z")),
                    RawMeasurement::new(id.to_string(), id, Some(4.0), Some("2024-01-01T01:00:00Z")),
                ])
            });

        let records = fetch_temporal(&source, definition, &[4, 11, 14], &window()).await;

        let modalities: Vec<_> = records.iter().map(|r| r.modality_id).collect();
        assert_eq!(modalities, vec![4, 14, 14]);
    }

    #[tokio::test]
    async fn test_fetch_temporal_skips_unknown_ids() {
        let catalog = ModalityCatalog::builtin();
        let definition = catalog.entity_type(WEATHER_OBSERVED).unwrap();

        let mut source = MockMeasurementSource::new();
        source.expect_averages().never();

        let records = fetch_temporal(&source, definition, &[999], &window()).await;
        assert!(records.is_empty());
    }

    #[test]
    fn test_passthrough_defaults() {
        let params = PassthroughResource::Fois.params(vec![]);
        assert_eq!(
            params,
            vec![("select".to_string(), "*,device_ids:devices(id)".to_string())]
        );

        let params = PassthroughResource::LatestMeasurements
            .params(vec![("modality_id".to_string(), "in.(1)".to_string())]);
        assert_eq!(params, vec![("modality_id".to_string(), "in.(1)".to_string())]);

        let params = PassthroughResource::Devices
            .params(vec![("limit".to_string(), "5".to_string()), ("select".to_string(), String::new())]);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].0, "limit");
        assert!(params[1].1.starts_with("*,sensors:"));
        assert_eq!(PassthroughResource::LatestMeasurements.path(), LATEST_MEASUREMENTS);
    }
}
