use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::cdp::CdpError;

/// Transport-neutral error kinds surfaced by the HTTP API.
///
/// Recoverable errors (bad input) map to 4xx; everything else is 5xx.
/// Nothing is retried internally — agents retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The registry has zero page targets.
    NoTabsOpen,
    /// A caller-supplied tab id matches no live target.
    TabNotFound,
    /// A ref is not present in the tab's current snapshot cache.
    RefStale,
    /// An action needs a target but none was supplied.
    TargetRequired,
    /// More than one of ref / selector / nodeId was supplied.
    TargetAmbiguous,
    /// A CSS selector matched nothing.
    SelectorNotFound,
    /// Malformed or incomplete request input.
    BadRequest,
    /// The per-action deadline fired.
    ActionTimeout,
    /// A CDP-layer failure, surfaced verbatim.
    Cdp,
    /// Creating a new tab failed partway through.
    TabOpenFailed,
    /// The request arrived after shutdown began.
    Shutdown,
    /// Missing or wrong bridge token.
    Unauthorized,
}

impl ErrorKind {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::NoTabsOpen | Self::TabNotFound => StatusCode::NOT_FOUND,
            Self::RefStale
            | Self::TargetRequired
            | Self::TargetAmbiguous
            | Self::SelectorNotFound
            | Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::ActionTimeout | Self::Cdp | Self::TabOpenFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoTabsOpen => "no-tabs-open",
            Self::TabNotFound => "tab-not-found",
            Self::RefStale => "ref-stale",
            Self::TargetRequired => "target-required",
            Self::TargetAmbiguous => "target-ambiguous",
            Self::SelectorNotFound => "selector-not-found",
            Self::BadRequest => "bad-request",
            Self::ActionTimeout => "action-timeout",
            Self::Cdp => "cdp-error",
            Self::TabOpenFailed => "tab-open-failed",
            Self::Shutdown => "shutdown",
            Self::Unauthorized => "unauthorized",
        };
        f.write_str(s)
    }
}

/// An error carried to the HTTP response shaping layer.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn no_tabs_open() -> Self {
        Self::new(ErrorKind::NoTabsOpen, "no tabs open")
    }

    #[must_use]
    pub fn tab_not_found(tab_id: &str) -> Self {
        Self::new(ErrorKind::TabNotFound, format!("tab {tab_id} not found"))
    }

    #[must_use]
    pub fn ref_stale(r: &str) -> Self {
        Self::new(
            ErrorKind::RefStale,
            format!("ref {r} not found — take a snapshot first"),
        )
    }

    #[must_use]
    pub fn target_required(kind: &str) -> Self {
        Self::new(
            ErrorKind::TargetRequired,
            format!("{kind} needs a ref, selector, or nodeId"),
        )
    }

    #[must_use]
    pub fn target_ambiguous() -> Self {
        Self::new(
            ErrorKind::TargetAmbiguous,
            "supply exactly one of ref, selector, or nodeId",
        )
    }

    #[must_use]
    pub fn selector_not_found(selector: &str) -> Self {
        Self::new(
            ErrorKind::SelectorNotFound,
            format!("selector {selector:?} not found"),
        )
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    #[must_use]
    pub fn tab_open_failed(message: &str) -> Self {
        Self::new(ErrorKind::TabOpenFailed, format!("new tab: {message}"))
    }

    /// Append an underlying cause to the message.
    #[must_use]
    pub fn context(mut self, cause: &dyn fmt::Display) -> Self {
        self.message = format!("{}: {cause}", self.message);
        self
    }

    #[must_use]
    pub fn action_timeout(what: &str) -> Self {
        Self::new(ErrorKind::ActionTimeout, format!("{what} timed out"))
    }

    #[must_use]
    pub fn shutdown() -> Self {
        Self::new(ErrorKind::Shutdown, "server is shutting down")
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "missing or invalid bridge token")
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<CdpError> for ApiError {
    fn from(e: CdpError) -> Self {
        let kind = match &e {
            CdpError::CommandTimeout { .. } | CdpError::ConnectionTimeout => {
                ErrorKind::ActionTimeout
            }
            _ => ErrorKind::Cdp,
        };
        Self::new(kind, e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
        };
        (self.kind.status(), Json(body)).into_response()
    }
}
