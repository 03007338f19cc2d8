// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Health probes and a read-only view of disruption progress.

use crate::disruption::{PoolReport, Reports};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

pub fn router(reports: Reports) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/readyz", get(ready_check))
        .route("/api/v1/disruptions", get(list_disruptions))
        .route("/api/v1/disruptions/{pool}", get(get_disruption))
        .with_state(reports)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(port: u16, reports: Reports) -> Result<(), std::io::Error> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("health server listening on http://{}", addr);
    axum::serve(listener, router(reports)).await
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Ready once at least one pool has been reconciled.
async fn ready_check(State(reports): State<Reports>) -> impl IntoResponse {
    if reports.read().await.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
    } else {
        (StatusCode::OK, "Ready")
    }
}

async fn list_disruptions(State(reports): State<Reports>) -> Json<Vec<PoolReport>> {
    Json(reports.read().await.values().cloned().collect())
}

async fn get_disruption(
    State(reports): State<Reports>,
    Path(pool): Path<String>,
) -> Result<Json<PoolReport>, StatusCode> {
    reports
        .read()
        .await
        .get(&pool)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
