// SPDX-License-Identifier: Apache-2.0

//! Conversion from core errors to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use repomind_core::RepoMindError;
use serde_json::json;
use tracing::{error, warn};

/// Error returned by route handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Client error with a message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// Maps a core error variant to a status code.
///
/// - `NotFound` -> 404
/// - `MissingCredential`, `Config` -> 500
/// - `ModelNotFound`, `ServiceUnavailable` and other upstream failures -> 502
/// - `Timeout` -> 504
/// - `RateLimited` -> 429
#[must_use]
pub fn status_for(err: &RepoMindError) -> StatusCode {
    match err {
        RepoMindError::NotFound { .. } => StatusCode::NOT_FOUND,
        RepoMindError::MissingCredential { .. } | RepoMindError::Config { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        RepoMindError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RepoMindError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        RepoMindError::ModelNotFound { .. }
        | RepoMindError::ServiceUnavailable { .. }
        | RepoMindError::AI { .. }
        | RepoMindError::GitHub { .. }
        | RepoMindError::InvalidAIResponse(_)
        | RepoMindError::Network(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let status = err
            .downcast_ref::<RepoMindError>()
            .map_or(StatusCode::INTERNAL_SERVER_ERROR, status_for);
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "Request failed");
        } else {
            warn!(status = %self.status, error = %self.message, "Request rejected");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(err: RepoMindError) -> ApiError {
        ApiError::from(anyhow::Error::from(err))
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = api(RepoMindError::NotFound {
            resource: "octo/missing".to_string(),
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(err.message.contains("octo/missing"));
    }

    #[test]
    fn misconfiguration_maps_to_500() {
        let err = api(RepoMindError::MissingCredential {
            provider: "gemini".to_string(),
            env_var: "GEMINI_API_KEY".to_string(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn upstream_failures_map_to_gateway_codes() {
        let unavailable = api(RepoMindError::ServiceUnavailable {
            provider: "cluster-ai".to_string(),
            message: "connection refused".to_string(),
        });
        assert_eq!(unavailable.status(), StatusCode::BAD_GATEWAY);

        let timeout = api(RepoMindError::Timeout {
            provider: "cluster-ai".to_string(),
            seconds: 60,
        });
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn untyped_errors_map_to_500() {
        let err = ApiError::from(anyhow::anyhow!("boom"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::bad_request("nope").status(), StatusCode::BAD_REQUEST);
    }
}
