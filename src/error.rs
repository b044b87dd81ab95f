//! Unified error type for Pi-Track.
//!
//! `AppError` is the single error type returned by every fallible operation
//! that crosses a component boundary (HTTP handlers, persistence, startup).
//! It serializes as `{ "kind": "...", "message": "..." }` so REST clients can
//! programmatically distinguish error categories, and implements
//! `IntoResponse` so it can be returned directly from an Axum handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::ser::SerializeStruct;

/// Application-level error, one variant per failure class in the error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No capture device, capture open failure, or mandatory DB open failure.
    /// Callers of `run()` treat this as startup-fatal (§6 Exit Codes).
    #[error("{0}")]
    Startup(String),

    /// Errors originating from SQLite / database operations.
    #[error("{0}")]
    Database(String),

    /// Errors from the packet capture source.
    #[error("{0}")]
    Capture(String),

    /// I/O and OS-level errors.
    #[error("{0}")]
    Io(String),

    /// Invalid or missing request input (malformed query parameters).
    #[error("{0}")]
    InvalidInput(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Startup(_) => "Startup",
            AppError::Database(_) => "Database",
            AppError::Capture(_) => "Capture",
            AppError::Io(_) => "Io",
            AppError::InvalidInput(_) => "InvalidInput",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

/// Query failures surface as HTTP 500 with the error text (§7); malformed
/// request input surfaces as HTTP 400.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, axum::Json(self)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_returns_correct_variant_name() {
        assert_eq!(AppError::Startup("no interface".into()).kind(), "Startup");
        assert_eq!(AppError::Database("db fail".into()).kind(), "Database");
        assert_eq!(AppError::Capture("cap fail".into()).kind(), "Capture");
        assert_eq!(AppError::Io("io fail".into()).kind(), "Io");
        assert_eq!(
            AppError::InvalidInput("bad input".into()).kind(),
            "InvalidInput"
        );
    }

    #[test]
    fn test_error_display_shows_message() {
        let err = AppError::Database("connection lost".into());
        assert_eq!(err.to_string(), "connection lost");
    }

    #[test]
    fn test_error_serializes_as_kind_and_message() {
        let err = AppError::Capture("no such device".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "Capture");
        assert_eq!(json["message"], "no such device");
    }

    #[test]
    fn test_from_io_error_produces_io_variant() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let app_err: AppError = io_err.into();
        assert_eq!(app_err.kind(), "Io");
        assert!(app_err.to_string().contains("file missing"));
    }

    #[test]
    fn test_all_variants_serialize_with_two_fields() {
        let variants: Vec<AppError> = vec![
            AppError::Startup("a".into()),
            AppError::Database("b".into()),
            AppError::Capture("c".into()),
            AppError::Io("d".into()),
            AppError::InvalidInput("e".into()),
        ];
        for err in variants {
            let json = serde_json::to_value(&err).unwrap();
            let obj = json.as_object().unwrap();
            assert_eq!(obj.len(), 2, "Expected exactly 2 fields for {err:?}");
            assert!(obj.contains_key("kind"));
            assert!(obj.contains_key("message"));
        }
    }

    #[test]
    fn test_invalid_input_maps_to_400() {
        let resp = AppError::InvalidInput("bad start timestamp".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_database_error_maps_to_500() {
        let resp = AppError::Database("disk full".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
