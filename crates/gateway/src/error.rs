//! HTTP error envelope over the host error taxonomy: every failure is
//! `{ "detail": "<message>" }` with the status code its
//! [`HostError`] variant maps to.

use {
    agentry_common::HostError,
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
};

#[derive(Debug)]
pub struct ApiError(pub HostError);

impl ApiError {
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self(HostError::not_found(detail))
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self(HostError::conflict(detail))
    }

    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self(HostError::validation(detail))
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self(HostError::configuration(detail))
    }

    pub fn upstream(detail: impl Into<String>) -> Self {
        Self(HostError::upstream(detail))
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self(HostError::internal(detail))
    }

    pub fn status(&self) -> StatusCode {
        match self.0 {
            HostError::Configuration(_) => StatusCode::BAD_REQUEST,
            HostError::NotFound(_) => StatusCode::NOT_FOUND,
            HostError::Conflict(_) => StatusCode::CONFLICT,
            HostError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            HostError::Upstream(_) => StatusCode::BAD_GATEWAY,
            HostError::Startup { .. } | HostError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    pub fn detail(&self) -> String {
        self.0.to_string()
    }
}

impl From<HostError> for ApiError {
    fn from(err: HostError) -> Self {
        Self(err)
    }
}

impl From<agentry_mcp::StartupError> for ApiError {
    fn from(err: agentry_mcp::StartupError) -> Self {
        Self(HostError::from(err))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({ "detail": self.detail() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_status_mapping() {
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::unprocessable("x").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::upstream("x").status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::internal("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn startup_errors_surface_server_and_reason() {
        let err = ApiError::from(agentry_mcp::StartupError {
            server_id: "github".into(),
            reason: "timeout after 300s".into(),
            causes: vec!["timeout after 300s".into()],
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.detail().contains("github"));
        assert!(err.detail().contains("timeout"));
    }
}
