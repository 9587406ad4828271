//! Process health, surfaced through the readiness endpoint.
//!
//! The lifecycle coordinator owns the transitions: `Starting` until the ready
//! hooks have run, `Ready` on success, `Degraded` when a ready hook fails
//! (the process keeps serving, but the readiness probe fails), and
//! `ShuttingDown` once shutdown begins.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::{Arc, RwLock};

/// Fixed readiness endpoint path.
pub const READINESS_PATH: &str = "/health/ready";

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum HealthStatus {
    Starting,
    Ready,
    Degraded,
    ShuttingDown,
}

struct Inner {
    status: HealthStatus,
    detail: Option<String>,
    since: DateTime<Utc>,
}

/// Shared health handle. Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<Inner>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                status: HealthStatus::Starting,
                detail: None,
                since: Utc::now(),
            })),
        }
    }

    pub fn set(&self, status: HealthStatus) {
        let mut inner = self.write();
        inner.status = status;
        inner.detail = None;
        inner.since = Utc::now();
    }

    /// Mark the process degraded, recording why. The readiness probe fails
    /// until the status changes again.
    pub fn degrade(&self, detail: impl Into<String>) {
        let mut inner = self.write();
        inner.status = HealthStatus::Degraded;
        inner.detail = Some(detail.into());
        inner.since = Utc::now();
    }

    pub fn status(&self) -> HealthStatus {
        self.read().status
    }

    /// Readiness probe response: 200 only when `Ready`, 503 otherwise.
    pub fn response(&self) -> Response {
        let inner = self.read();
        let code = if inner.status == HealthStatus::Ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        let body = json!({
            "status": inner.status.to_string(),
            "detail": inner.detail,
            "since": inner.since.to_rfc3339(),
        });
        (code, Json(body)).into_response()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unready() {
        let health = HealthState::new();
        assert_eq!(health.status(), HealthStatus::Starting);
        assert_eq!(health.response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_ready_then_degraded() {
        let health = HealthState::new();
        health.set(HealthStatus::Ready);
        assert_eq!(health.response().status(), StatusCode::OK);

        health.degrade("discovery registration failed");
        assert_eq!(health.status(), HealthStatus::Degraded);
        assert_eq!(health.response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_clones_observe_updates() {
        let health = HealthState::new();
        let probe = health.clone();
        health.set(HealthStatus::Ready);
        assert_eq!(probe.status(), HealthStatus::Ready);
    }
}
