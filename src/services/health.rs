//! Health check HTTP server
//!
//! Read-only view of the controller for process supervision. Nothing here can
//! change breaker state.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::coordination::SharedStatus;
use crate::domain::BreakerState;
use crate::error::{GuardError, Result};
use crate::persistence::AuditLog;

/// Health status for the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub breaker_state: BreakerState,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub breaches: u64,
    pub consecutive_aggregation_failures: u32,
    pub dry_run: bool,
}

/// Shared state for health server
pub struct HealthState {
    status: SharedStatus,
    audit: Arc<dyn AuditLog>,
    /// A tick older than this marks the loop as stalled
    stale_after_secs: i64,
}

impl HealthState {
    pub fn new(status: SharedStatus, audit: Arc<dyn AuditLog>, check_interval_seconds: u64) -> Self {
        Self {
            status,
            audit,
            stale_after_secs: (check_interval_seconds.max(1) * 3) as i64,
        }
    }

    /// Get overall health status
    pub async fn get_health(&self) -> HealthResponse {
        let status = self.status.read().await.clone();
        let now = Utc::now();

        let reference = status.last_tick_at.unwrap_or(status.started_at);
        let stalled = (now - reference).num_seconds() > self.stale_after_secs;

        let health = if stalled {
            HealthStatus::Unhealthy
        } else if status.consecutive_aggregation_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthResponse {
            status: health,
            timestamp: now,
            uptime_seconds: (now - status.started_at).num_seconds().max(0) as u64,
            breaker_state: status.state,
            last_tick_at: status.last_tick_at,
            ticks: status.ticks,
            breaches: status.breaches,
            consecutive_aggregation_failures: status.consecutive_aggregation_failures,
            dry_run: status.dry_run,
        }
    }
}

/// Routes served by the health server
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/events/latest", get(latest_event_handler))
        .with_state(state)
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Start the health server
    pub async fn run(&self) -> Result<()> {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting health server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| GuardError::Internal(format!("Health server error: {}", e)))?;

        Ok(())
    }
}

/// Full health check endpoint
async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Liveness probe: the process answers
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Last persisted breach record
async fn latest_event_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.audit.latest_breach().await {
        Ok(Some(record)) => (StatusCode::OK, Json(serde_json::to_value(record).unwrap_or_default())),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no breach recorded" })),
        ),
        Err(e) => {
            warn!("latest breach lookup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::BreakerStatus;
    use crate::domain::{ActionOutcome, BreachEvent, BreachKind, Decision, PortfolioSnapshot};
    use crate::persistence::{AuditRecord, MemoryAuditLog};
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn status(last_tick_at: Option<DateTime<Utc>>, failures: u32) -> SharedStatus {
        Arc::new(RwLock::new(BreakerStatus {
            state: BreakerState::Monitoring,
            started_at: Utc::now(),
            last_tick_at,
            ticks: 1,
            consecutive_aggregation_failures: failures,
            breaches: 0,
            last_breach_at: None,
            dry_run: true,
        }))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_fresh_tick_is_healthy() {
        let state = HealthState::new(status(Some(Utc::now()), 0), Arc::new(MemoryAuditLog::new()), 60);
        let (code, body) = get(router(Arc::new(state)), "/health").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["breaker_state"], "MONITORING");
    }

    #[tokio::test]
    async fn test_aggregation_failures_degrade() {
        let state = HealthState::new(status(Some(Utc::now()), 2), Arc::new(MemoryAuditLog::new()), 60);
        let health = state.get_health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_stalled_loop_is_unhealthy() {
        let old = Utc::now() - chrono::Duration::seconds(600);
        let state = HealthState::new(status(Some(old), 0), Arc::new(MemoryAuditLog::new()), 60);
        let (code, body) = get(router(Arc::new(state)), "/health").await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_latest_event() {
        let audit = Arc::new(MemoryAuditLog::new());
        let state = Arc::new(HealthState::new(status(None, 0), audit.clone(), 60));

        let (code, _) = get(router(state.clone()), "/events/latest").await;
        assert_eq!(code, StatusCode::NOT_FOUND);

        let snapshot = Arc::new(PortfolioSnapshot::new(Utc::now(), "paper", dec!(48), vec![]));
        let mut event = BreachEvent::new(BreachKind::MinBalance, dec!(48), dec!(50), snapshot);
        event.attach_decision(Decision::CloseAll, None);
        event.attach_outcome(ActionOutcome::Success {
            venues: vec![],
            attempts: 0,
        });
        audit.record_breach(&AuditRecord::from_event(&event).unwrap()).await.unwrap();

        let (code, body) = get(router(state), "/events/latest").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["kind"], "MIN_BALANCE");
        assert_eq!(body["decision"], "close_all");
        assert_eq!(body["outcome"]["status"], "success");
    }
}
