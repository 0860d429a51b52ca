//! HTTP front end for elastix registration and transformix point transform jobs.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! build the same router through [`router::build_app_router`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod multipart;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
