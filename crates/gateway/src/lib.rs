//! HTTP and WebSocket gateway for kennel.
//!
//! A thin layer over [`kennel_orchestrator::ProjectService`]. Authentication
//! happens in front of this service; the caller's identity arrives in the
//! `x-kennel-owner` header and every project route is scoped to it.

pub mod console;
pub mod error;
pub mod metrics_middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use {
    error::{ApiError, ApiResult},
    server::{build_gateway_app, serve},
    state::{AppState, OWNER_HEADER, Owner},
};
