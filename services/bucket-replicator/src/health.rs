// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Liveness and readiness
//!
//! `GET /live` always reports ok. `GET /ready` reports the last result of
//! the readiness check, which a background task re-evaluates every
//! [`CHECK_INTERVAL`]: ready means both storage backends are online and the
//! queue connection is up. Responses are JSON with status 200 when healthy
//! and 503 otherwise.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::{DateTime, Utc};
use object_storage::ObjectStorage;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::queue::QueueConnection;

pub const CHECK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Failed,
}

/// One check's last result, as served.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckReport {
    pub name: &'static str,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub num_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_failure_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: CheckStatus,
    pub details: BTreeMap<&'static str, CheckReport>,
}

/// Latest result of a named check; logs on failed/recovered transitions.
pub struct HealthCheck {
    state: Mutex<CheckReport>,
}

impl HealthCheck {
    pub fn new(name: &'static str, initial: Result<(), String>) -> Self {
        let (status, error) = match initial {
            Ok(()) => (CheckStatus::Ok, None),
            Err(error) => (CheckStatus::Failed, Some(error)),
        };
        let now = Utc::now();
        let failing = status == CheckStatus::Failed;
        Self {
            state: Mutex::new(CheckReport {
                name,
                status,
                error,
                checked_at: now,
                num_failures: u64::from(failing),
                first_failure_at: failing.then_some(now),
            }),
        }
    }

    /// A check that is always ok.
    pub fn liveness() -> Self {
        Self::new("live", Ok(()))
    }

    pub fn record(&self, result: Result<(), String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        state.checked_at = now;

        match result {
            Ok(()) => {
                if state.status == CheckStatus::Failed {
                    let lasted = state
                        .first_failure_at
                        .and_then(|since| (now - since).to_std().ok())
                        .unwrap_or_default();
                    tracing::info!(
                        check = state.name,
                        consecutive_failures = state.num_failures,
                        duration = format!("{:.2}s", lasted.as_secs_f64()),
                        "Health check status changed to recovered"
                    );
                }
                state.status = CheckStatus::Ok;
                state.error = None;
                state.num_failures = 0;
                state.first_failure_at = None;
            }
            Err(error) => {
                if state.status == CheckStatus::Ok {
                    tracing::warn!(check = state.name, error = %error, "Health check status changed to failed");
                    state.first_failure_at = Some(now);
                }
                state.status = CheckStatus::Failed;
                state.error = Some(error);
                state.num_failures += 1;
            }
        }
    }

    pub fn report(&self) -> CheckReport {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn response(&self) -> (StatusCode, Json<HealthReport>) {
        let check = self.report();
        let status = check.status;
        let code = match status {
            CheckStatus::Ok => StatusCode::OK,
            CheckStatus::Failed => StatusCode::SERVICE_UNAVAILABLE,
        };
        let details = BTreeMap::from([(check.name, check)]);
        (code, Json(HealthReport { status, details }))
    }
}

/// Both backends online and the queue connected.
pub struct Readiness {
    pub source: Arc<dyn ObjectStorage>,
    pub destination: Arc<dyn ObjectStorage>,
    pub queue: Arc<dyn QueueConnection>,
}

impl Readiness {
    pub fn evaluate(&self) -> Result<(), String> {
        if self.source.is_offline() {
            return Err("source client health check failed".to_string());
        }
        if self.destination.is_offline() {
            return Err("destination client health check failed".to_string());
        }
        if !self.queue.is_connected() {
            return Err("jetstream client is not connected".to_string());
        }
        Ok(())
    }
}

/// Re-evaluate readiness every `interval` until `cancel` fires.
pub async fn watch_readiness(
    check: Arc<HealthCheck>,
    readiness: Readiness,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => check.record(readiness.evaluate()),
        }
    }
    tracing::debug!("Readiness check stopped");
}

pub fn router(live: Arc<HealthCheck>, ready: Arc<HealthCheck>) -> Router {
    Router::new()
        .route("/live", get(move || async move { live.response().into_response() }))
        .route("/ready", get(move || async move { ready.response().into_response() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryConnection;
    use object_storage::ObjectStoreClient;
    use pretty_assertions::assert_eq;

    fn readiness() -> (Arc<ObjectStoreClient>, Arc<MemoryConnection>, Readiness) {
        let source = Arc::new(ObjectStoreClient::in_memory("source", "photos"));
        let destination = Arc::new(ObjectStoreClient::in_memory("destination", "backup"));
        let queue = Arc::new(MemoryConnection::new(true));
        let readiness = Readiness {
            source: source.clone(),
            destination,
            queue: queue.clone(),
        };
        (source, queue, readiness)
    }

    #[test]
    fn test_readiness_conditions() {
        let (source, queue, readiness) = readiness();
        assert_eq!(readiness.evaluate(), Ok(()));

        source.set_offline(true);
        assert_eq!(
            readiness.evaluate(),
            Err("source client health check failed".to_string())
        );

        source.set_offline(false);
        queue.set_connected(false);
        assert_eq!(
            readiness.evaluate(),
            Err("jetstream client is not connected".to_string())
        );
    }

    #[test]
    fn test_failure_counting() {
        let check = HealthCheck::new("ready", Ok(()));
        check.record(Err("down".to_string()));
        check.record(Err("down".to_string()));

        let report = check.report();
        assert_eq!(report.status, CheckStatus::Failed);
        assert_eq!(report.num_failures, 2);
        assert!(report.first_failure_at.is_some());

        check.record(Ok(()));
        let report = check.report();
        assert_eq!(report.status, CheckStatus::Ok);
        assert_eq!(report.num_failures, 0);
        assert_eq!(report.error, None);
    }

    #[test]
    fn test_report_json() {
        let check = HealthCheck::new("ready", Err("destination client health check failed".to_string()));
        let (code, Json(report)) = check.response();
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["details"]["ready"]["num_failures"], 1);
        assert_eq!(
            value["details"]["ready"]["error"],
            "destination client health check failed"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_tracks_transitions() {
        let (source, _queue, readiness) = readiness();
        let check = Arc::new(HealthCheck::new("ready", Ok(())));
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_readiness(
            check.clone(),
            readiness,
            CHECK_INTERVAL,
            cancel.clone(),
        ));

        source.set_offline(true);
        tokio::time::sleep(CHECK_INTERVAL * 2 + Duration::from_millis(100)).await;
        assert_eq!(check.report().status, CheckStatus::Failed);

        source.set_offline(false);
        tokio::time::sleep(CHECK_INTERVAL).await;
        assert_eq!(check.report().status, CheckStatus::Ok);

        cancel.cancel();
        watcher.await.unwrap();
    }
}
