//! Job pipeline for the registration server.
//!
//! Framework-free building blocks: admission, concurrency slots, staging,
//! the external task seam, result packaging, deadline supervision and the
//! executor tying them together. The HTTP layer lives in `regserver-api`.

pub mod admission;
pub mod archive;
pub mod error;
pub mod executor;
pub mod slots;
pub mod staging;
pub mod supervisor;
pub mod task;
pub mod types;
pub mod upload;
