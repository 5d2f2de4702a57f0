use crate::catalog::ModalityCatalog;
use crate::config::ApiConfig;
use crate::error::{BridgeError, Result};
use crate::query::TimeWindow;
use crate::resolver::{resolve_modality_ids, AttributeMatch};
use crate::translator::{translate, Entity, TranslationMode};
use crate::upstream::{fetch_temporal, MeasurementSource, PassthroughResource};
use anyhow::Context;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<ModalityCatalog>,
    pub source: Arc<dyn MeasurementSource>,
    pub attribute_match: AttributeMatch,
}

/// Query parameters for real-time entity queries
#[derive(Debug, Deserialize)]
pub struct EntityQuery {
    /// NGSI-LD entity type
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    /// Comma-separated attribute filter
    pub attrs: Option<String>,
}

/// Query parameters for temporal entity queries
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalQuery {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub attrs: Option<String>,
    /// before, after or between
    pub timerel: Option<String>,
    pub time: Option<String>,
    pub end_time: Option<String>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/ngsi-ld/v1/entities", get(get_entities))
        .route("/ngsi-ld/v1/temporal/entities", get(get_temporal_entities))
        .route("/api/modalities", get(get_modalities))
        .route("/api/fois", get(get_fois))
        .route("/api/devices", get(get_devices))
        .route("/api/lma", get(get_latest_measurements))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ngsi-bridge"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ready",
        "entity_types": state.catalog.entity_types().collect::<Vec<_>>()
    }))
}

fn required_type(entity_type: Option<&str>) -> Result<&str> {
    entity_type
        .filter(|t| !t.is_empty())
        .ok_or_else(|| BridgeError::missing("type"))
}

/// Latest readings as NGSI-LD entities
#[instrument(skip(state))]
async fn get_entities(
    State(state): State<AppState>,
    query: std::result::Result<Query<EntityQuery>, QueryRejection>,
) -> Result<Json<Vec<Entity>>> {
    let Query(params) = query?;
    metrics::counter!("bridge.requests.realtime").increment(1);

    let entity_type = required_type(params.entity_type.as_deref())?;
    let ids = resolve_modality_ids(
        &state.catalog,
        entity_type,
        params.attrs.as_deref(),
        state.attribute_match,
    )?;

    let records = state.source.latest(&ids).await?;
    let entities = translate(&state.catalog, &records, entity_type, TranslationMode::Single)?;

    metrics::counter!("bridge.entities.translated").increment(entities.len() as u64);
    info!(
        entity_type,
        records = records.len(),
        entities = entities.len(),
        "Served real-time entities"
    );

    Ok(Json(entities))
}

/// Averaged series over a time window as temporal NGSI-LD entities
#[instrument(skip(state))]
async fn get_temporal_entities(
    State(state): State<AppState>,
    query: std::result::Result<Query<TemporalQuery>, QueryRejection>,
) -> Result<Json<Vec<Entity>>> {
    let Query(params) = query?;
    metrics::counter!("bridge.requests.temporal").increment(1);

    let entity_type = required_type(params.entity_type.as_deref())?;
    let ids = resolve_modality_ids(
        &state.catalog,
        entity_type,
        params.attrs.as_deref(),
        state.attribute_match,
    )?;
    let window = TimeWindow::resolve(
        params.timerel.as_deref(),
        params.time.as_deref(),
        params.end_time.as_deref(),
        Utc::now(),
    )?;

    let definition = state.catalog.entity_type(entity_type)?;
    let records = fetch_temporal(state.source.as_ref(), definition, &ids, &window).await;
    let entities = translate(&state.catalog, &records, entity_type, TranslationMode::Temporal)?;

    metrics::counter!("bridge.entities.translated").increment(entities.len() as u64);
    info!(
        entity_type,
        from = %window.from,
        to = ?window.to,
        records = records.len(),
        entities = entities.len(),
        "Served temporal entities"
    );

    Ok(Json(entities))
}

type PassthroughQuery = std::result::Result<Query<Vec<(String, String)>>, QueryRejection>;

async fn passthrough(
    state: &AppState,
    resource: PassthroughResource,
    params: Vec<(String, String)>,
) -> Result<Json<Value>> {
    let params = resource.params(params);
    let body = state.source.passthrough(resource.path(), &params).await?;
    Ok(Json(body))
}

async fn get_modalities(
    State(state): State<AppState>,
    query: PassthroughQuery,
) -> Result<Json<Value>> {
    let Query(params) = query?;
    passthrough(&state, PassthroughResource::Modalities, params).await
}

async fn get_fois(
    State(state): State<AppState>,
    query: PassthroughQuery,
) -> Result<Json<Value>> {
    let Query(params) = query?;
    passthrough(&state, PassthroughResource::Fois, params).await
}

async fn get_devices(
    State(state): State<AppState>,
    query: PassthroughQuery,
) -> Result<Json<Value>> {
    let Query(params) = query?;
    passthrough(&state, PassthroughResource::Devices, params).await
}

async fn get_latest_measurements(
    State(state): State<AppState>,
    query: PassthroughQuery,
) -> Result<Json<Value>> {
    let Query(params) = query?;
    passthrough(&state, PassthroughResource::LatestMeasurements, params).await
}

/// Start the NGSI-LD API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> anyhow::Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting NGSI-LD API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
