// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! REST companion endpoints for bulk photo sync.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use fieldsync_core::{from_base64, to_base64, PhotoMetadata};

use crate::error::AppError;
use crate::service::{Health, SyncService};

pub fn app_router(service: Arc<SyncService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/reports/{report_id}/photos", get(get_report_photos).post(post_report_photos))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .with_state(service)
}

/// Serves the router until the service shuts down.
pub async fn run(addr: SocketAddr, service: Arc<SyncService>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http listening");
    let cancel_token = service.cancel_token();
    axum::serve(listener, app_router(service))
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    #[serde(flatten)]
    health: Health,
    timestamp: i64,
}

async fn healthz(State(service): State<Arc<SyncService>>) -> Json<HealthResponse> {
    Json(HealthResponse { health: service.health().await, timestamp: Utc::now().timestamp() })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportPhotosResponse {
    pub update: String,
    pub photos: Vec<PhotoMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MergeRequest {
    pub update: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub merged_update: String,
    pub photos: Vec<PhotoMetadata>,
}

async fn get_report_photos(
    State(service): State<Arc<SyncService>>,
    Path(report_id): Path<String>,
) -> Result<Json<ReportPhotosResponse>, AppError> {
    let (state, photos) = service.report_photos(&report_id).await?;
    Ok(Json(ReportPhotosResponse { update: to_base64(&state), photos }))
}

async fn post_report_photos(
    State(service): State<Arc<SyncService>>,
    Path(report_id): Path<String>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<MergeResponse>, AppError> {
    if request.update.is_empty() {
        return Err(AppError::bad_request("update is required"));
    }
    let update = from_base64(&request.update)?;
    let (state, photos) = service.merge_report_photos(&report_id, &update).await?;
    info!(%report_id, photos = photos.len(), "merged report photos over http");
    Ok(Json(MergeResponse { merged_update: to_base64(&state), photos }))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
