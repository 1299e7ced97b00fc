use crate::boundary::load_boundary;
use crate::config::AppConfig;
use crate::error::CensusError;
use crate::export::{filtered_csv, ExportFilter};
use crate::hazard::{accept_upload, HazardUpload, PreparedHazard};
use crate::layers::{accident_layer, household_layer, styled_hazard, StyledHazard};
use crate::matcher::HazardIndex;
use crate::normalize::HazardLayer;
use crate::selection::{ActiveHazard, HazardSelection};
use crate::store::{FileStore, HazardRecord, HazardSummary};
use crate::types::{Accident, Affected, AffectedHousehold, GeoPoint};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use geojson::{FeatureCollection, JsonObject};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub struct AppState {
    pub config: AppConfig,
    pub store: FileStore,
    pub selection: HazardSelection,
    pub boundary: Option<HazardLayer>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let boundary = match &config.boundary {
            Some(b) => Some(load_boundary(&b.path, config.store.max_upload_bytes)?),
            None => None,
        };
        Ok(Self {
            store: FileStore::new(&config.store.root),
            selection: HazardSelection::new(),
            boundary,
            config,
        })
    }

    fn max_bytes(&self) -> usize {
        self.config.store.max_upload_bytes
    }
}

type ApiResult<T> = std::result::Result<T, CensusError>;

impl IntoResponse for CensusError {
    fn into_response(self) -> Response {
        let status = match &self {
            CensusError::Parse(_) => StatusCode::BAD_REQUEST,
            CensusError::Structure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CensusError::SizeLimit { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CensusError::Store { .. } => StatusCode::BAD_GATEWAY,
            CensusError::NotFound(_) => StatusCode::NOT_FOUND,
            CensusError::Superseded => StatusCode::CONFLICT,
            CensusError::Task(_) | CensusError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        let body = serde_json::json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
pub struct QueryParams {
    hazard: String,
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    feature_index: usize,
    properties: Option<JsonObject>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRequest {
    hazard_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedResponse {
    hazard: HazardSummary,
    households: Vec<AffectedHousehold>,
    accidents: Vec<Affected<Accident>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResponse {
    generation: u64,
    hazard: StyledHazard,
    affected: Vec<AffectedHousehold>,
    households: FeatureCollection,
}

impl SelectionResponse {
    fn from_active(active: &ActiveHazard) -> Self {
        Self {
            generation: active.generation,
            hazard: styled_hazard(&active.hazard),
            affected: active.affected.clone(),
            households: household_layer(&active.households, &active.affected),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_bytes().saturating_mul(2);
    let mut app = Router::new()
        .route("/api/hazards", get(list_hazards).post(upload_hazard))
        .route("/api/hazards/:id", get(get_hazard))
        .route("/api/hazards/:id/layer", get(hazard_layer))
        .route("/api/hazards/:id/affected", get(affected_handler))
        .route("/api/hazards/:id/export.csv", get(export_handler))
        .route("/api/households", get(households_handler))
        .route("/api/accidents", get(accidents_handler))
        .route("/api/boundary", get(boundary_handler))
        .route("/api/query", get(query_handler))
        .route("/api/selection", get(current_selection).post(select_hazard))
        .nest_service("/tiles", ServeDir::new(&state.config.output.tile_dir));

    if let Some(static_dir) = &state.config.server.static_dir {
        app = app.fallback_service(ServeDir::new(static_dir));
    }

    app.layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let state = Arc::new(AppState::new(config)?);

    // Dashboard-side listeners receive selection changes through the channel.
    let mut changes = state.selection.subscribe();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let current = changes.borrow_and_update().clone();
            if let Some(active) = current {
                info!(
                    hazard = %active.hazard.summary.id,
                    generation = active.generation,
                    affected = active.affected.len(),
                    "active hazard changed"
                );
            }
        }
    });

    let app = router(state);
    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_hazards(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<HazardSummary>>> {
    Ok(Json(state.store.list_hazards().await?))
}

async fn get_hazard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<HazardRecord>> {
    Ok(Json(state.store.load_hazard(&id).await?))
}

async fn upload_hazard(
    State(state): State<Arc<AppState>>,
    Json(upload): Json<HazardUpload>,
) -> ApiResult<(StatusCode, Json<HazardSummary>)> {
    let max_bytes = state.max_bytes();
    let record = tokio::task::spawn_blocking(move || accept_upload(upload, max_bytes)).await??;
    state.store.save_hazard(&record).await?;
    Ok((StatusCode::CREATED, Json(HazardSummary::from(&record))))
}

async fn prepared(state: &AppState, id: &str) -> ApiResult<PreparedHazard> {
    let record = state.store.load_hazard(id).await?;
    let max_bytes = state.max_bytes();
    tokio::task::spawn_blocking(move || PreparedHazard::prepare(&record, max_bytes)).await?
}

async fn active_for(state: &AppState, id: &str) -> ApiResult<ActiveHazard> {
    ActiveHazard::load(
        &state.store,
        id,
        state.config.matching.policy,
        state.max_bytes(),
        0,
    )
    .await
}

async fn hazard_layer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<StyledHazard>> {
    let hazard = prepared(&state, &id).await?;
    Ok(Json(styled_hazard(&hazard)))
}

async fn affected_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<AffectedResponse>> {
    let active = active_for(&state, &id).await?;
    Ok(Json(AffectedResponse {
        hazard: active.hazard.summary,
        households: active.affected,
        accidents: active.affected_accidents,
    }))
}

async fn export_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(filter): Query<ExportFilter>,
) -> ApiResult<Response> {
    let active = active_for(&state, &id).await?;
    let csv = filtered_csv(&active.households, &active.affected, &filter)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}-households.csv\""),
            ),
        ],
        csv,
    )
        .into_response())
}

async fn households_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<FeatureCollection>> {
    let households = state.store.load_households().await?;
    Ok(Json(household_layer(&households, &[])))
}

async fn accidents_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<FeatureCollection>> {
    let accidents = state.store.load_accidents().await?;
    Ok(Json(accident_layer(&accidents)))
}

async fn boundary_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<FeatureCollection>> {
    state
        .boundary
        .as_ref()
        .map(|b| Json(b.collection.clone()))
        .ok_or_else(|| CensusError::NotFound("boundary layer".to_string()))
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Option<QueryResponse>>> {
    let hazard = prepared(&state, &params.hazard).await?;
    let index = HazardIndex::new(&hazard.layer);
    let hit = index
        .first_containing(GeoPoint::new(params.lat, params.lon))
        .map(|i| QueryResponse {
            feature_index: i,
            properties: hazard.layer.features()[i].properties.clone(),
        });
    Ok(Json(hit))
}

async fn select_hazard(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectionRequest>,
) -> ApiResult<Json<SelectionResponse>> {
    let ticket = state.selection.begin();
    let active = ActiveHazard::load(
        &state.store,
        &request.hazard_id,
        state.config.matching.policy,
        state.max_bytes(),
        ticket.generation(),
    )
    .await?;

    let response = SelectionResponse::from_active(&active);
    if state.selection.commit(ticket, active) {
        Ok(Json(response))
    } else {
        Err(CensusError::Superseded)
    }
}

async fn current_selection(State(state): State<Arc<AppState>>) -> Json<Option<SelectionResponse>> {
    Json(state.selection.current().as_deref().map(SelectionResponse::from_active))
}
