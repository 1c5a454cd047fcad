//! Request-level failures and their HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;
use webhooks::SignatureError;

/// Why a delivery was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    /// The `X-GitHub-Event` header is absent or not valid text.
    #[error("missing or unreadable X-GitHub-Event header")]
    MissingEventHeader,

    /// The body could not be turned into a JSON payload.
    #[error("malformed payload: {message}")]
    MalformedPayload {
        /// Parser error.
        message: String,
    },

    /// Signature verification failed.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// The path names a target that is not configured.
    #[error("unknown target '{name}'")]
    UnknownTarget {
        /// Name from the request path.
        name: String,
    },
}

impl ReceiveError {
    /// HTTP status returned to the sender.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingEventHeader | Self::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            Self::Signature(_) => StatusCode::UNAUTHORIZED,
            Self::UnknownTarget { .. } => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ReceiveError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!(status = status.as_u16(), error = %self, "Rejected delivery");
        (status, self.to_string()).into_response()
    }
}
