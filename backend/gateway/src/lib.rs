//! lessonkit Gateway HTTP API Server
//!
//! JSON endpoints for the v1 and v2 operations, the prompt update endpoint
//! and a health check.

pub mod deadline;
pub mod error;
pub mod routes;
pub mod server;

pub use error::{status_for, ApiError};
pub use server::{build_router, start_server, GatewayState, MAX_BODY_BYTES};
