use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use killagram_provider::ProviderError;
use killagram_types::CoreError;
use killagram_types::error::{NotFound, PolicyViolation, RateLimit};

/// Error returned by every handler and middleware.
///
/// Renders as `{"error": CODE}`; a frozen account also gets `reason`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request body over {0} bytes")]
    PayloadTooLarge(usize),
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        ApiError::Core(err.into())
    }
}

impl From<NotFound> for ApiError {
    fn from(err: NotFound) -> Self {
        ApiError::Core(err.into())
    }
}

impl From<PolicyViolation> for ApiError {
    fn from(err: PolicyViolation) -> Self {
        ApiError::Core(err.into())
    }
}

impl From<RateLimit> for ApiError {
    fn from(err: RateLimit) -> Self {
        ApiError::Core(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Core(core) => match core {
                CoreError::AuthFailure => StatusCode::UNAUTHORIZED,
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::Policy(policy) => match policy {
                    PolicyViolation::PremiumRequired | PolicyViolation::PremiumMarketRequired => {
                        StatusCode::FORBIDDEN
                    }
                    PolicyViolation::PasswordRequired => StatusCode::UNAUTHORIZED,
                    PolicyViolation::AccountFrozen { .. } => StatusCode::LOCKED,
                    _ => StatusCode::BAD_REQUEST,
                },
                CoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                CoreError::Provider(_) => StatusCode::BAD_GATEWAY,
                CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Core(core) => core.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({ "error": self.code() });

        match &self {
            ApiError::Core(CoreError::Policy(PolicyViolation::AccountFrozen { reason })) => {
                body["reason"] = serde_json::json!(reason);
            }
            ApiError::Core(CoreError::Internal(msg)) => {
                error!("Internal error: {}", msg);
            }
            ApiError::BadRequest(msg) => {
                body["message"] = serde_json::json!(msg);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_categories() {
        let cases = [
            (CoreError::AuthFailure, StatusCode::UNAUTHORIZED),
            (NotFound::Item.into(), StatusCode::NOT_FOUND),
            (PolicyViolation::InsufficientStars.into(), StatusCode::BAD_REQUEST),
            (PolicyViolation::PremiumMarketRequired.into(), StatusCode::FORBIDDEN),
            (PolicyViolation::AccountFrozen { reason: None }.into(), StatusCode::LOCKED),
            (RateLimit::AiSummary.into(), StatusCode::TOO_MANY_REQUESTS),
            (CoreError::Provider("down".into()), StatusCode::BAD_GATEWAY),
        ];
        for (core, status) in cases {
            assert_eq!(ApiError::from(core).status(), status);
        }
    }

    #[test]
    fn provider_errors_map_through_core() {
        assert_eq!(
            ApiError::from(ProviderError::PasswordRequired).code(),
            "PASSWORD_REQUIRED"
        );
        assert_eq!(
            ApiError::from(ProviderError::Unavailable("x".into())).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
