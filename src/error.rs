//! Errors surfaced while resolving credentials and fetching pull request data.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures of an analytics operation.
///
/// Empty denominators in the metric computations are not errors; they resolve to zero.
/// A failure anywhere in the chain aborts the whole operation, so no partial metrics exist.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalyticsError {
    /// No stored credential exists for the verified caller.
    #[error("no upstream credential is stored for caller {caller_id}")]
    UnknownCaller {
        /// The verified caller identity that missed the store.
        caller_id: String,
    },

    /// The stored credential could not be decrypted.
    #[error("stored credential could not be decrypted: {reason}")]
    CredentialCorrupt {
        /// What went wrong while decoding or decrypting.
        reason: String,
    },

    /// The upstream API rejected the request or could not be reached.
    #[error("upstream fetch failed{}: {message}", status_suffix(.status))]
    UpstreamFetchFailed {
        /// HTTP status returned upstream, absent for transport failures.
        status: Option<u16>,
        /// Whether upstream reported the caller as rate limited.
        rate_limited: bool,
        /// Upstream message for diagnostics.
        message: String,
    },

    /// The authenticated upstream client could not be constructed.
    #[error("could not build upstream client: {message}")]
    ClientBuild {
        /// Construction failure detail.
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" with status {code}"))
        .unwrap_or_default()
}

impl AnalyticsError {
    /// Short machine readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownCaller { .. } => "unknown_caller",
            Self::CredentialCorrupt { .. } => "credential_corrupt",
            Self::UpstreamFetchFailed { .. } => "upstream_fetch_failed",
            Self::ClientBuild { .. } => "client_build",
        }
    }

    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownCaller { .. } => StatusCode::FORBIDDEN,
            Self::CredentialCorrupt { .. } | Self::ClientBuild { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::UpstreamFetchFailed {
                rate_limited: true, ..
            } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamFetchFailed { status, .. } => status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
        }
    }

    /// Message safe to return to API clients.
    fn public_message(&self) -> String {
        match self {
            Self::CredentialCorrupt { .. } | Self::ClientBuild { .. } => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AnalyticsError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            message: self.public_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
