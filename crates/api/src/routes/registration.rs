//! Route definitions for image registration jobs.
//!
//! ```text
//! POST /elastix         submit
//! POST /elastix/queue   enqueue
//! ```

use axum::routing::post;
use axum::Router;

use crate::handlers::registration;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/elastix", post(registration::submit))
        .route("/elastix/queue", post(registration::enqueue))
}
