pub mod health;
pub mod registration;
pub mod transform;

use axum::Router;

use crate::state::AppState;

/// Build the job route tree.
///
/// Route hierarchy:
///
/// ```text
/// /elastix                 submit registration job (POST)
/// /elastix/queue           register a registration job id (POST)
///
/// /transformix             status (GET), submit transform job (POST)
/// ```
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .merge(registration::router())
        .merge(transform::router())
}
