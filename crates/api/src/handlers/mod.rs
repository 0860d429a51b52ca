//! Request handlers, one submodule per job kind.
//!
//! Handlers drain the multipart body, hand it to the kind's executor and map
//! errors via [`AppError`](crate::error::AppError).

pub mod registration;
pub mod transform;
