//! Error taxonomy for the resource access surface
//!
//! Every failure coming back from an API server is classified into an
//! [`ApiError`] variant so that callers can recover (or assert) by kind
//! instead of by message text.
//!
//! # Example
//!
//! ```
//! use kubestep::{ApiError, ErrorKind};
//!
//! let err = ApiError::Conflict("configmaps \"demo\" already exists".to_string());
//! assert_eq!(err.kind(), ErrorKind::Conflict);
//! assert_eq!("ConflictError".parse::<ErrorKind>().unwrap(), ErrorKind::Conflict);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Errors returned by a [`ResourceHandle`](crate::client::ResourceHandle)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("gone: {0}")]
    Gone(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("too many requests: {0}")]
    TooManyRequests(String),

    #[error("internal server error: {message}")]
    InternalServerError {
        message: String,
        /// Server supplied `details.retryAfterSeconds`
        retry_after: Option<Duration>,
    },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("server timeout: {0}")]
    ServerTimeout(String),

    #[error("unknown resource type {api_version}.{kind}")]
    UnknownResource { api_version: String, kind: String },

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("api error ({code:?}): {message}")]
    Other { code: Option<u16>, message: String },
}

impl ApiError {
    /// Classify an HTTP status returned by the API server
    ///
    /// `retry_after` is only kept for 500 responses; other codes carry no
    /// retry semantics for the reconciler.
    #[must_use]
    pub fn from_status(code: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match code {
            400 => Self::BadRequest(message),
            401 => Self::Unauthorized(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            405 => Self::MethodNotAllowed(message),
            409 => Self::Conflict(message),
            410 => Self::Gone(message),
            422 => Self::Invalid(message),
            429 => Self::TooManyRequests(message),
            500 => Self::InternalServerError {
                message,
                retry_after,
            },
            503 => Self::ServiceUnavailable(message),
            504 => Self::ServerTimeout(message),
            other => Self::Other {
                code: Some(other),
                message,
            },
        }
    }

    /// Field-less tag for matching and assertions
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::MethodNotAllowed(_) => ErrorKind::MethodNotAllowed,
            Self::Gone(_) => ErrorKind::Gone,
            Self::Invalid(_) => ErrorKind::Invalid,
            Self::TooManyRequests(_) => ErrorKind::TooManyRequests,
            Self::InternalServerError { .. } => ErrorKind::InternalServerError,
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::ServerTimeout(_) => ErrorKind::ServerTimeout,
            Self::UnknownResource { .. } => ErrorKind::UnknownResource,
            Self::InvalidObject(_) => ErrorKind::InvalidObject,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Retry hint attached by the server, if any
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::InternalServerError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// True for a 404 from the server
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for a 409 from the server
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// True when the error is a status answered by the API server
    ///
    /// Discovery misses, malformed request bodies and transport failures
    /// never reached a handler and are excluded.
    #[must_use]
    pub fn is_status(&self) -> bool {
        !matches!(
            self,
            Self::UnknownResource { .. } | Self::InvalidObject(_) | Self::Transport(_)
        )
    }
}

/// Discriminant of [`ApiError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    Forbidden,
    Unauthorized,
    BadRequest,
    MethodNotAllowed,
    Gone,
    Invalid,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    ServerTimeout,
    UnknownResource,
    InvalidObject,
    Transport,
    Other,
    /// Any status answered by the server, whatever its code
    Api,
}

impl ErrorKind {
    /// Canonical name, as used in scenario text
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "Conflict",
            Self::NotFound => "NotFound",
            Self::Forbidden => "Forbidden",
            Self::Unauthorized => "Unauthorized",
            Self::BadRequest => "BadRequest",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::Gone => "Gone",
            Self::Invalid => "Invalid",
            Self::TooManyRequests => "TooManyRequests",
            Self::InternalServerError => "InternalServerError",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::ServerTimeout => "ServerTimeout",
            Self::UnknownResource => "UnknownResource",
            Self::InvalidObject => "InvalidObject",
            Self::Transport => "Transport",
            Self::Other => "Other",
            Self::Api => "Api",
        }
    }

    /// Whether `err` satisfies an expectation of this kind
    ///
    /// [`ErrorKind::Api`] accepts every server status; other kinds require
    /// an exact match.
    #[must_use]
    pub fn matches(self, err: &ApiError) -> bool {
        match self {
            Self::Api => err.is_status(),
            kind => err.kind() == kind,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized error kind name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown error kind: {0}")]
pub struct UnknownErrorKind(pub String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    /// Accepts the canonical names with or without an `Error` suffix, plus
    /// the spellings used by older scenario files (`UnprocessibleEntity`,
    /// `ResourceNotFound`, `DynamicApi` for any server status).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let name = trimmed.strip_suffix("Error").unwrap_or(trimmed);
        let kind = match name {
            "Conflict" => Self::Conflict,
            "NotFound" => Self::NotFound,
            "Forbidden" => Self::Forbidden,
            "Unauthorized" => Self::Unauthorized,
            "BadRequest" => Self::BadRequest,
            "MethodNotAllowed" => Self::MethodNotAllowed,
            "Gone" => Self::Gone,
            "Invalid" | "UnprocessibleEntity" | "UnprocessableEntity" => Self::Invalid,
            "TooManyRequests" => Self::TooManyRequests,
            "InternalServer" | "InternalServerError" => Self::InternalServerError,
            "ServiceUnavailable" => Self::ServiceUnavailable,
            "ServerTimeout" => Self::ServerTimeout,
            "UnknownResource" | "ResourceNotFound" => Self::UnknownResource,
            "InvalidObject" => Self::InvalidObject,
            "Transport" => Self::Transport,
            "Other" => Self::Other,
            "Api" | "DynamicApi" => Self::Api,
            _ => return Err(UnknownErrorKind(trimmed.to_string())),
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_maps_codes() {
        assert_eq!(ApiError::from_status(409, "x", None).kind(), ErrorKind::Conflict);
        assert_eq!(ApiError::from_status(404, "x", None).kind(), ErrorKind::NotFound);
        assert_eq!(ApiError::from_status(403, "x", None).kind(), ErrorKind::Forbidden);
        assert_eq!(ApiError::from_status(422, "x", None).kind(), ErrorKind::Invalid);
        assert_eq!(
            ApiError::from_status(418, "x", None),
            ApiError::Other {
                code: Some(418),
                message: "x".to_string()
            }
        );
    }

    #[test]
    fn test_from_status_maps_throttling_and_availability() {
        let cases = [
            (405, ErrorKind::MethodNotAllowed),
            (410, ErrorKind::Gone),
            (429, ErrorKind::TooManyRequests),
            (503, ErrorKind::ServiceUnavailable),
            (504, ErrorKind::ServerTimeout),
        ];
        for (code, kind) in cases {
            assert_eq!(ApiError::from_status(code, "x", None).kind(), kind, "{code}");
        }
    }

    #[test]
    fn test_error_kind_parses_status_exception_names() {
        let cases = [
            ("MethodNotAllowedError", ErrorKind::MethodNotAllowed),
            ("GoneError", ErrorKind::Gone),
            ("TooManyRequestsError", ErrorKind::TooManyRequests),
            ("ServiceUnavailableError", ErrorKind::ServiceUnavailable),
            ("ServerTimeoutError", ErrorKind::ServerTimeout),
            ("DynamicApiError", ErrorKind::Api),
        ];
        for (name, kind) in cases {
            assert_eq!(name.parse::<ErrorKind>(), Ok(kind), "{name}");
        }
    }

    #[test]
    fn test_api_kind_matches_any_server_status() {
        assert!(ErrorKind::Api.matches(&ApiError::Conflict("exists".into())));
        assert!(ErrorKind::Api.matches(&ApiError::from_status(503, "down", None)));
        assert!(ErrorKind::Api.matches(&ApiError::Other {
            code: Some(418),
            message: "teapot".into()
        }));
        assert!(!ErrorKind::Api.matches(&ApiError::Transport("reset".into())));
        assert!(!ErrorKind::Api.matches(&ApiError::UnknownResource {
            api_version: "v1".into(),
            kind: "Widget".into()
        }));
    }

    #[test]
    fn test_specific_kind_matches_exactly() {
        let conflict = ApiError::Conflict("exists".into());
        assert!(ErrorKind::Conflict.matches(&conflict));
        assert!(!ErrorKind::NotFound.matches(&conflict));
        assert!(!ErrorKind::Other.matches(&conflict));
    }

    #[test]
    fn test_retry_after_only_on_internal_error() {
        let hint = Some(Duration::from_secs(2));
        assert_eq!(ApiError::from_status(500, "busy", hint).retry_after(), hint);
        assert_eq!(ApiError::from_status(409, "busy", hint).retry_after(), None);
    }

    #[test]
    fn test_error_kind_parses_with_and_without_suffix() {
        assert_eq!("NotFoundError".parse::<ErrorKind>(), Ok(ErrorKind::NotFound));
        assert_eq!("NotFound".parse::<ErrorKind>(), Ok(ErrorKind::NotFound));
        assert_eq!(
            "UnprocessibleEntityError".parse::<ErrorKind>(),
            Ok(ErrorKind::Invalid)
        );
        assert_eq!(
            "InternalServerError".parse::<ErrorKind>(),
            Ok(ErrorKind::InternalServerError)
        );
    }

    #[test]
    fn test_error_kind_rejects_unknown_names() {
        let err = "TeapotError".parse::<ErrorKind>().unwrap_err();
        assert_eq!(err.0, "TeapotError");
    }

    #[test]
    fn test_error_kind_display_round_trips() {
        for kind in [
            ErrorKind::Conflict,
            ErrorKind::Forbidden,
            ErrorKind::ServiceUnavailable,
            ErrorKind::Transport,
            ErrorKind::Api,
        ] {
            assert_eq!(kind.to_string().parse::<ErrorKind>(), Ok(kind));
        }
    }
}
