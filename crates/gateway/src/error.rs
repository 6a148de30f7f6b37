//! Mapping service errors onto HTTP responses.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    kennel_console::ConsoleError,
    kennel_orchestrator::Error as ServiceError,
    serde_json::json,
    tracing::warn,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Console(#[from] ConsoleError),

    #[error("missing caller identity")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Service(e) => match e {
                ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
                ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::Conflict(_) => StatusCode::CONFLICT,
                ServiceError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                ServiceError::Unavailable(_) | ServiceError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                },
            },
            Self::Console(ConsoleError::Unreachable(_)) => StatusCode::BAD_GATEWAY,
            Self::Console(ConsoleError::Runtime(e)) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Console(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(%status, error = %self, "request failed");
        }
        let message = kennel_common::scrub_secrets(&self.to_string());
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status() {
        let cases = [
            (ServiceError::Validation("x".into()), 400),
            (ServiceError::NotFound("x".into()), 404),
            (ServiceError::Conflict("x".into()), 409),
            (ServiceError::Transient("x".into()), 503),
            (ServiceError::Unavailable("x".into()), 500),
            (ServiceError::Internal("x".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError::from(err).status().as_u16(), code);
        }
        assert_eq!(
            ApiError::from(ConsoleError::Unreachable("refused".into())).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
