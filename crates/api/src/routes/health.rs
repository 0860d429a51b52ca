use axum::extract::State;
use axum::{routing::get, Json, Router};
use regserver_core::types::{JobKind, ScratchPolicy};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub jobs: Vec<KindHealth>,
}

/// Load snapshot of one job kind.
#[derive(Debug, Serialize)]
pub struct KindHealth {
    pub kind: JobKind,
    pub in_flight: usize,
    pub max_concurrent: usize,
    pub scratch: ScratchPolicy,
    /// Registered ids not yet claimed. Absent for kinds with server-assigned ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<usize>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let jobs = [JobKind::Registration, JobKind::Transform]
        .into_iter()
        .map(|kind| {
            let executor = state.executor(kind);
            KindHealth {
                kind,
                in_flight: executor.limiter().in_flight(),
                max_concurrent: executor.limiter().max_concurrent(),
                scratch: executor.scratch_policy(),
                pending: executor.admission().ledger().map(|l| l.pending()),
            }
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        jobs,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
