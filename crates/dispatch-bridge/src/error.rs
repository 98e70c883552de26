//! Error types for the bridge.
//!
//! [`RouteError`] is what command forwarding and source switching can hit;
//! [`BridgeError`] is the HTTP-facing union that renders as a JSON body via
//! its [`IntoResponse`] implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failures reaching or switching the upstream authority.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// No authority can take the command right now.
    #[error("upstream unavailable: {reason}")]
    UpstreamUnavailable {
        /// What went wrong.
        reason: String,
    },

    /// `POST /open` named a source that is not configured.
    #[error("unknown upstream source {name:?}")]
    UnknownSource {
        /// The requested name.
        name: String,
    },
}

impl RouteError {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the HTTP control surface.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The requested resource does not exist yet.
    #[error("not found: {0}")]
    NotFound(String),

    /// Forwarding or switching failed.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// The authority refused the command.
    #[error("{cmd} rejected: {reason}")]
    Rejected {
        /// Wire name of the command.
        cmd: &'static str,
        /// Why.
        reason: String,
    },
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) | Self::Route(RouteError::UnknownSource { .. }) => {
                StatusCode::NOT_FOUND
            }
            Self::Route(RouteError::UpstreamUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
