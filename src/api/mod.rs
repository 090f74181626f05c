//! HTTP admin API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::db::Database;
use crate::objects::ObjectId;
use crate::service::ObjectService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub service: Arc<ObjectService>,
}

/// Build the API router
pub fn router(db: Arc<Database>, service: Arc<ObjectService>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/objects/{id}", get(get_object))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { db, service })
}

async fn root() -> impl IntoResponse {
    Json(RootResponse {
        name: "worldd",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                database: "ok",
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                database: "error",
            }),
        ),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.stats().await)
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Summary of a resident object
async fn get_object(State(state): State<AppState>, Path(id): Path<ObjectId>) -> impl IntoResponse {
    match state.service.get_object(id) {
        Some(obj) => (StatusCode::OK, Json(obj.summary())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("object {} is not resident", id),
            }),
        )
            .into_response(),
    }
}
