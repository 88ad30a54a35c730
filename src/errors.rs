//! Error taxonomy for the gateway.
//!
//! Responses deliberately carry generic messages. The precise rejection
//! reason (which rule failed, which upstream address refused) is logged
//! server-side and never echoed to the session, so a compromised workspace
//! cannot probe internal topology through error bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing or invalid proxy credential")]
    Unauthorized,

    #[error("destination rejected: {0}")]
    InvalidDestination(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream unreachable: {0}")]
    Upstream(String),

    #[error("gateway at capacity")]
    AtCapacity,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// JSON body returned for all error responses.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::InvalidDestination(_) => "invalid_destination",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Upstream(_) => "upstream_unreachable",
            GatewayError::AtCapacity => "at_capacity",
            GatewayError::Internal(_) | GatewayError::Io(_) => "internal_error",
        }
    }

    /// Message safe to hand to the client. Variants carrying internal detail
    /// map to a fixed string; the detail is only reachable through `Display`.
    fn client_message(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "missing or invalid proxy credential",
            GatewayError::InvalidDestination(_) => "destination not allowed",
            GatewayError::BadRequest(_) => "malformed request",
            GatewayError::Upstream(_) => "upstream unreachable",
            GatewayError::AtCapacity => "gateway at capacity",
            GatewayError::Internal(_) | GatewayError::Io(_) => "internal error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.client_message().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
