//! Liveness for load balancers: the database check decides the status code,
//! the hub gauge is informational.

use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;

use crate::server::app::AxumAppState;

const DB_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    healthy: bool,
    database: DbStatus,
    db_pool_size: u32,
    db_pool_idle: usize,
    /// Live WebSocket connections held by the hub
    realtime_connections: usize,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum DbStatus {
    Ok,
    Failed(String),
}

async fn check_database(state: &AxumAppState) -> DbStatus {
    let query = sqlx::query("SELECT 1").execute(&state.db_pool);
    match tokio::time::timeout(DB_CHECK_TIMEOUT, query).await {
        Ok(Ok(_)) => DbStatus::Ok,
        Ok(Err(e)) => DbStatus::Failed(e.to_string()),
        Err(_) => DbStatus::Failed(format!("no answer within {:?}", DB_CHECK_TIMEOUT)),
    }
}

/// GET /health. 200 when the database answers, 503 otherwise.
pub async fn health_handler(
    Extension(state): Extension<AxumAppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = check_database(&state).await;
    let healthy = matches!(database, DbStatus::Ok);
    if let DbStatus::Failed(error) = &database {
        warn!(error = %error, "Health check: database unavailable");
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            healthy,
            database,
            db_pool_size: state.db_pool.size(),
            db_pool_idle: state.db_pool.num_idle(),
            realtime_connections: state.deps.hub.connection_count(),
        }),
    )
}
