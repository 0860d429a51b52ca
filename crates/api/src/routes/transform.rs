//! Route definitions for point transform jobs.
//!
//! ```text
//! GET  /transformix    status
//! POST /transformix    submit
//! ```

use axum::routing::get;
use axum::Router;

use crate::handlers::transform;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/transformix", get(transform::status).post(transform::submit))
}
