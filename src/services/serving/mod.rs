use crate::error::RecResult;
use crate::models::*;
use crate::services::snapshot::FactorExtremes;
use crate::utils::validation::validate_num_recommendations;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub items: usize,
    pub factors: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    pub global_mean: f64,
    pub created_at: DateTime<Utc>,
}

async fn health_check() -> Json<ApiResponse<HashMap<String, String>>> {
    let mut status = HashMap::new();
    status.insert("status".to_string(), "healthy".to_string());
    status.insert("service".to_string(), "movierec".to_string());
    status.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

    Json(ApiResponse::success(status))
}

async fn get_recommendations(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(params): Query<LimitQuery>,
) -> RecResult<Json<ApiResponse<RecommendationResponse>>> {
    let limit = params
        .limit
        .unwrap_or(state.config.recommendation.default_recommendations);

    let response = state.recommendation_service.recommend_for(&username, limit).await?;
    Ok(Json(ApiResponse::success(response)))
}

async fn get_similar_items(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> RecResult<Json<ApiResponse<Vec<RecommendationItem>>>> {
    let limit = params.limit.unwrap_or(10);
    validate_num_recommendations(limit, state.config.recommendation.max_recommendations)?;

    let similar = state.snapshot.similar_items(&item_id, limit)?;
    Ok(Json(ApiResponse::success(similar)))
}

async fn get_factor(
    State(state): State<AppState>,
    Path(factor): Path<usize>,
    Query(params): Query<LimitQuery>,
) -> RecResult<Json<ApiResponse<FactorExtremes>>> {
    let limit = params.limit.unwrap_or(10);
    validate_num_recommendations(limit, state.config.recommendation.max_recommendations)?;

    Ok(Json(ApiResponse::success(state.snapshot.inspect_factor(factor, limit)?)))
}

async fn get_model_info(State(state): State<AppState>) -> Json<ApiResponse<ModelInfo>> {
    let snapshot = &state.snapshot;
    Json(ApiResponse::success(ModelInfo {
        items: snapshot.item_count(),
        factors: snapshot.factors(),
        learning_rate: snapshot.learning_rate(),
        regularization: snapshot.regularization(),
        global_mean: snapshot.global_mean(),
        created_at: snapshot.created_at(),
    }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/recommendations/:username", get(get_recommendations))
        .route("/items/:item_id/similar", get(get_similar_items))
        .route("/factors/:factor", get(get_factor))
        .route("/model", get(get_model_info))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
