use std::{sync::Arc, time::Duration};

use {
    axum::{
        extract::FromRequestParts,
        http::request::Parts,
    },
    kennel_console::TerminalProxy,
    kennel_orchestrator::ProjectService,
};

use crate::error::ApiError;

/// Header carrying the authenticated caller, set by the fronting auth layer.
pub const OWNER_HEADER: &str = "x-kennel-owner";

#[derive(Clone)]
pub struct AppState {
    pub service: ProjectService,
    pub terminal: Arc<TerminalProxy>,
}

impl AppState {
    pub fn new(service: ProjectService) -> kennel_console::Result<Self> {
        Ok(Self {
            service,
            terminal: Arc::new(TerminalProxy::new(Duration::from_secs(30))?),
        })
    }
}

/// The caller's owner id. Requests without one are rejected with 401.
#[derive(Debug, Clone)]
pub struct Owner(pub String);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}
