use std::any::Any;
use std::convert::Infallible;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ─── Constants ───────────────────────────────────────────────────

/// Code used whenever a failure carries no usable code of its own.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

const DEFAULT_STATUS: u16 = 500;
const DEFAULT_MESSAGE: &str = "Internal Server Error";

// ─── Configuration errors ────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must start with '/', got {path:?}")]
    InvalidPath { field: &'static str, path: String },
    #[error("{first} and {second} are both mounted at {path:?}")]
    DuplicatePath {
        first: &'static str,
        second: &'static str,
        path: String,
    },
    #[error("appName must not be empty")]
    EmptyAppName,
    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),
}

// ─── Application-raised errors ───────────────────────────────────

/// A typed failure raised by application code.
///
/// Build one with [`create_error`] and return it from a handler
/// (`Result<_, HttpError>`), or raise it with `std::panic::panic_any`; both
/// paths are normalized the same way.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HttpError {
    pub message: String,
    pub status_code: Option<u16>,
    pub code: Option<String>,
    pub details: Option<Value>,
    cause: Option<String>,
}

impl HttpError {
    /// Message-only error; status and code are filled in by [`normalize`].
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            code: None,
            details: None,
            cause: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Structured payload returned to the client under `error.details`.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Internal context; only reaches the client in verbose mode.
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

/// The sanctioned way for handlers to signal a typed failure.
///
/// ```ignore
/// return Err(create_error("User not found", 404, "USER_NOT_FOUND"));
/// ```
pub fn create_error(message: impl Into<String>, status_code: u16, code: impl Into<String>) -> HttpError {
    HttpError::new(message)
        .with_status(status_code)
        .with_code(code)
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        normalize(Failure::Structured(self)).into_response()
    }
}

impl From<NormalizedError> for HttpError {
    fn from(err: NormalizedError) -> Self {
        Self {
            message: err.message,
            status_code: Some(err.status_code),
            code: Some(err.code),
            details: err.details,
            cause: err.cause,
        }
    }
}

// ─── Failure values ──────────────────────────────────────────────

/// Anything a handler can fail with.
pub enum Failure {
    /// A typed error that may already carry a status and code.
    Structured(HttpError),
    /// A bare message, e.g. the `Display` of some library error.
    Message(String),
    /// A panic payload of unknown type.
    Unknown(Box<dyn Any + Send>),
}

impl Failure {
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::Message(err.to_string())
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Unknown(payload)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured(e) => f.debug_tuple("Structured").field(e).finish(),
            Self::Message(m) => f.debug_tuple("Message").field(m).finish(),
            Self::Unknown(_) => f.write_str("Unknown(..)"),
        }
    }
}

impl From<HttpError> for Failure {
    fn from(err: HttpError) -> Self {
        Self::Structured(err)
    }
}

impl From<NormalizedError> for Failure {
    fn from(err: NormalizedError) -> Self {
        Self::Structured(err.into())
    }
}

impl From<String> for Failure {
    fn from(msg: String) -> Self {
        Self::Message(msg)
    }
}

impl From<&str> for Failure {
    fn from(msg: &str) -> Self {
        Self::Message(msg.to_owned())
    }
}

impl From<Infallible> for Failure {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

// ─── Normalized shape ────────────────────────────────────────────

/// The stable external shape every failure is converted into.
///
/// Only [`normalize`] builds these, so `status_code` is always within
/// `400..=599` and `code` is never empty.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code} ({status_code}): {message}")]
pub struct NormalizedError {
    message: String,
    status_code: u16,
    code: String,
    details: Option<Value>,
    cause: Option<String>,
}

/// JSON body sent to clients: `{"error": {...}}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: ErrorPayload<'a>,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload<'a> {
    pub message: &'a str,
    pub code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<&'a str>,
}

impl NormalizedError {
    /// The fixed fallback shape: 500 / `INTERNAL_ERROR`.
    pub fn internal() -> Self {
        Self {
            message: DEFAULT_MESSAGE.into(),
            status_code: DEFAULT_STATUS,
            code: INTERNAL_ERROR.into(),
            details: None,
            cause: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn body(&self, verbose: bool) -> ErrorBody<'_> {
        ErrorBody {
            error: ErrorPayload {
                message: &self.message,
                code: &self.code,
                details: self.details.as_ref(),
                cause: if verbose { self.cause.as_deref() } else { None },
            },
        }
    }

    /// Render the error response. A copy of the error rides along in the
    /// response extensions so the tracking middleware can record its code.
    pub fn render(self, verbose: bool) -> Response {
        let mut response = (self.status(), Json(self.body(verbose))).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

impl IntoResponse for NormalizedError {
    fn into_response(self) -> Response {
        self.render(false)
    }
}

// ─── Normalizer ──────────────────────────────────────────────────

/// Map any failure to a [`NormalizedError`]. Never panics.
pub fn normalize(failure: Failure) -> NormalizedError {
    match failure {
        Failure::Structured(err) => from_structured(err),
        Failure::Message(msg) => {
            let message = if msg.trim().is_empty() {
                DEFAULT_MESSAGE.to_owned()
            } else {
                msg
            };
            NormalizedError {
                message,
                ..NormalizedError::internal()
            }
        }
        Failure::Unknown(payload) => from_payload(payload),
    }
}

fn from_structured(err: HttpError) -> NormalizedError {
    let status_code = match err.status_code {
        Some(s) if (400..=599).contains(&s) => s,
        Some(s) => {
            tracing::warn!(status = s, code = ?err.code, "error status outside 400..=599, using 500");
            DEFAULT_STATUS
        }
        None => DEFAULT_STATUS,
    };

    let code = match err.code.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c.to_owned(),
        Some(_) => {
            tracing::warn!(status = status_code, "blank error code, deriving one from status");
            default_code(status_code)
        }
        None => default_code(status_code),
    };

    let message = if err.message.trim().is_empty() {
        default_message(status_code).to_owned()
    } else {
        err.message
    };

    NormalizedError {
        message,
        status_code,
        code,
        details: err.details,
        cause: err.cause,
    }
}

fn from_payload(payload: Box<dyn Any + Send>) -> NormalizedError {
    // Typed errors raised with `panic_any` keep their shape
    let payload = match payload.downcast::<NormalizedError>() {
        Ok(err) => return *err,
        Err(other) => other,
    };
    let payload = match payload.downcast::<HttpError>() {
        Ok(err) => return from_structured(*err),
        Err(other) => other,
    };

    let cause = if let Some(s) = payload.downcast_ref::<&'static str>() {
        Some((*s).to_owned())
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Some(s.clone())
    } else {
        tracing::warn!("unrecognised panic payload, using default error shape");
        None
    };

    NormalizedError {
        cause,
        ..NormalizedError::internal()
    }
}

fn default_message(status_code: u16) -> &'static str {
    StatusCode::from_u16(status_code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or(DEFAULT_MESSAGE)
}

/// `404` → `NOT_FOUND`, `500` → `INTERNAL_ERROR`.
fn default_code(status_code: u16) -> String {
    if status_code == DEFAULT_STATUS {
        return INTERNAL_ERROR.to_owned();
    }
    let Some(reason) = StatusCode::from_u16(status_code)
        .ok()
        .and_then(|s| s.canonical_reason())
    else {
        return format!("HTTP_{status_code}");
    };

    let mut code = String::with_capacity(reason.len());
    for ch in reason.chars() {
        if ch.is_ascii_alphanumeric() {
            code.push(ch.to_ascii_uppercase());
        } else if !code.ends_with('_') {
            code.push('_');
        }
    }
    code.trim_matches('_').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_error_keeps_status_and_code() {
        let err = normalize(create_error("User not found", 404, "USER_NOT_FOUND").into());
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.code(), "USER_NOT_FOUND");
        assert_eq!(err.message(), "User not found");
        assert_eq!(
            serde_json::to_string(&err.body(false)).unwrap(),
            r#"{"error":{"message":"User not found","code":"USER_NOT_FOUND"}}"#
        );
    }

    #[test]
    fn details_are_passed_through() {
        let err = normalize(
            create_error("bad email", 422, "VALIDATION_FAILED")
                .with_details(json!({"field": "email"}))
                .into(),
        );
        let body = serde_json::to_value(err.body(false)).unwrap();
        assert_eq!(body["error"]["details"]["field"], "email");
    }

    #[test]
    fn out_of_range_status_falls_back_to_500() {
        let err = normalize(create_error("odd", 200, "ODD").into());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.code(), "ODD");
    }

    #[test]
    fn missing_code_is_derived_from_status() {
        let err = normalize(HttpError::new("nope").with_status(404).into());
        assert_eq!(err.code(), "NOT_FOUND");

        let err = normalize(HttpError::new("boom").into());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.code(), INTERNAL_ERROR);

        let err = normalize(HttpError::new("").with_status(418).with_code("  ").into());
        assert_eq!(err.code(), "I_M_A_TEAPOT");
        assert_eq!(err.message(), "I'm a teapot");
    }

    #[test]
    fn plain_message_becomes_internal_error() {
        let err = normalize("database went away".into());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.code(), INTERNAL_ERROR);
        assert_eq!(err.message(), "database went away");

        let err = normalize(String::new().into());
        assert_eq!(err.message(), "Internal Server Error");
    }

    #[test]
    fn panic_message_is_hidden_unless_verbose() {
        let err = normalize(Failure::from_panic(Box::new("index out of bounds")));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.message(), "Internal Server Error");
        assert_eq!(err.cause(), Some("index out of bounds"));

        let quiet = serde_json::to_value(err.body(false)).unwrap();
        assert!(quiet["error"].get("cause").is_none());
        let verbose = serde_json::to_value(err.body(true)).unwrap();
        assert_eq!(verbose["error"]["cause"], "index out of bounds");
    }

    #[test]
    fn panic_any_with_typed_error_keeps_its_shape() {
        let payload: Box<dyn Any + Send> = Box::new(create_error("gone", 410, "GONE"));
        let err = normalize(Failure::from_panic(payload));
        assert_eq!(err.status_code(), 410);
        assert_eq!(err.code(), "GONE");
    }

    #[test]
    fn unknown_payload_gets_default_shape() {
        let err = normalize(Failure::from_panic(Box::new(42_u32)));
        assert_eq!(err, NormalizedError::internal());
    }

    #[test]
    fn response_carries_normalized_error_extension() {
        let response = create_error("User not found", 404, "USER_NOT_FOUND").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let ext = response.extensions().get::<NormalizedError>().unwrap();
        assert_eq!(ext.code(), "USER_NOT_FOUND");
    }
}
