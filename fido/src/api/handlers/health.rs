//! Liveness and readiness probes.

use crate::{
    AppState,
    api::models::health::{DependencyCheck, HealthResponse, ReadinessResponse},
};
use axum::{extract::State, http::StatusCode, response::Json};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::warn;

/// Upper bound for each dependency check
const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    summary = "Liveness probe",
    responses(
        (status = 200, description = "The process is serving requests", body = HealthResponse),
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Readiness probe: checks Postgres and, when configured, Redis
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    summary = "Readiness probe",
    responses(
        (status = 200, description = "All dependencies reachable", body = ReadinessResponse),
        (status = 503, description = "A dependency is down", body = ReadinessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = check_database(&state).await;
    let redis = check_redis(&state).await;

    let readiness = ReadinessResponse::new(database, redis);
    let status = if readiness.is_ready() {
        StatusCode::OK
    } else {
        warn!(?readiness, "Readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

async fn check_database(state: &AppState) -> DependencyCheck {
    match tokio::time::timeout(CHECK_TIMEOUT, sqlx::query("SELECT 1").execute(&state.db)).await {
        Ok(Ok(_)) => DependencyCheck::up(),
        Ok(Err(e)) => DependencyCheck::down(e),
        Err(_) => DependencyCheck::down("timed out"),
    }
}

async fn check_redis(state: &AppState) -> DependencyCheck {
    match &state.redis {
        Some(conn) => ping_redis(conn).await,
        None => DependencyCheck::disabled(),
    }
}

async fn ping_redis(conn: &ConnectionManager) -> DependencyCheck {
    let mut conn = conn.clone();
    let cmd = redis::cmd("PING");
    let ping = cmd.query_async::<String>(&mut conn);
    match tokio::time::timeout(CHECK_TIMEOUT, ping).await {
        Ok(Ok(_)) => DependencyCheck::up(),
        Ok(Err(e)) => DependencyCheck::down(e),
        Err(_) => DependencyCheck::down("timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_health_is_static(pool: PgPool) {
        let (app, _bg_services) = create_test_app(pool).await;

        let response = app.get("/health").await;
        response.assert_status_ok();
        response.assert_json(&serde_json::json!({"status": "healthy"}));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_readiness_without_redis(pool: PgPool) {
        let (app, _bg_services) = create_test_app(pool).await;

        let response = app.get("/health/ready").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["database"]["status"], "up");
        assert_eq!(body["redis"]["status"], "disabled");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_readiness_reports_database_down(pool: PgPool) {
        let (app, _bg_services) = create_test_app(pool.clone()).await;
        pool.close().await;

        let response = app.get("/health/ready").await;
        response.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["database"]["status"], "down");
        assert!(body["database"]["error"].is_string());
        assert_eq!(body["redis"]["status"], "disabled");
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL and a local Redis"]
    async fn test_redis_ping_is_up() {
        let Some(url) = std::env::var("REDIS_URL").ok() else {
            eprintln!("skipping: REDIS_URL not set");
            return;
        };
        let client = redis::Client::open(url).unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();

        let check = ping_redis(&conn).await;
        assert_eq!(check.status, crate::api::models::health::DependencyState::Up);
        assert!(check.error.is_none());
    }
}
