use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::get, Json, Router};
use formula_core::persist::{load_snapshot, IndexPaths};
use formula_core::{FormulaQuery, PipelineConfig, RankedList, RetrievalPipeline, StageNote};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer, AllowOrigin};
use tower_http::trace::TraceLayer;

const MAX_K: usize = 1000;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { 10 }

#[derive(Deserialize)]
pub struct SearchRequest {
    pub latex: String,
    #[serde(default)]
    pub skeleton: Option<String>,
    /// Ranking from the caller's semantic encoder, fused as the semantic stream.
    #[serde(default)]
    pub semantic: Option<RankedList>,
    #[serde(default = "default_k")]
    pub k: usize,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub canonical: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
    pub notes: Vec<StageNote>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub latex: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RetrievalPipeline>,
}

pub fn build_app(index_dir: String, config: PipelineConfig) -> Result<Router> {
    // Load the whole snapshot at startup; a broken index never serves traffic.
    let snapshot = Arc::new(load_snapshot(&IndexPaths::new(&index_dir))?);
    let pipeline = Arc::new(RetrievalPipeline::new(snapshot, config)?);
    let app_state = AppState { pipeline };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_get_handler).post(search_post_handler))
        .route("/formula/:id", get(formula_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

pub async fn search_get_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    run_search(state, FormulaQuery::new(params.q), params.k).await
}

pub async fn search_post_handler(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let query = FormulaQuery { latex: req.latex, skeleton: req.skeleton, semantic: req.semantic };
    run_search(state, query, req.k).await
}

async fn run_search(state: AppState, query: FormulaQuery, k: usize) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    let k = k.clamp(1, MAX_K);
    let pipeline = state.pipeline.clone();
    // The pipeline fans out on the rayon pool; keep it off the async workers.
    let (outcome, query) = tokio::task::spawn_blocking(move || (pipeline.search(&query), query))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("search task failed: {e}")))?;

    let total_hits = outcome.results.len();
    let snapshot = state.pipeline.snapshot();
    let results = outcome
        .results
        .iter()
        .take(k)
        .map(|hit| SearchHit {
            id: hit.id.clone(),
            score: hit.score,
            latex: snapshot.record(&hit.id).map(|r| r.raw_latex.clone()),
        })
        .collect();
    let elapsed = start.elapsed();
    tracing::debug!(total_hits, took_s = elapsed.as_secs_f64(), "search served");
    Ok(Json(SearchResponse {
        query: query.latex,
        canonical: outcome.canonical,
        took_s: elapsed.as_secs_f64(),
        total_hits,
        results,
        notes: outcome.notes,
    }))
}

pub async fn formula_handler(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.pipeline.snapshot().record(&id) {
        Some(record) => Ok(Json(serde_json::json!({
            "id": record.id,
            "latex": record.raw_latex,
            "canonical": record.normalized_latex,
            "structural_hash": record.structural_hash.to_string(),
            "skeleton_hash": record.skeleton_hash.map(|h| h.to_string()),
        }))),
        None => Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" })))),
    }
}
