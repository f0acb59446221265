//! The one typed error that crosses component boundaries.
//!
//! Grounded on `original_source/mhttp/helpers.py::HttpError`: a status
//! code plus an optional human message. Components raise [`HttpError`];
//! the connection loop (§4.8) is the only place it is caught broadly.

use crate::http::types::StatusCode;
use std::{fmt, io};

/// A request- or response-path failure carrying the HTTP status it should
/// be reported as (spec §7's error taxonomy).
#[derive(Debug)]
pub struct HttpError {
    pub status: StatusCode,
    pub message: Option<String>,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }

    pub fn bare(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PayloadTooLarge, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::RequestTimeout, message)
    }

    pub fn length_required(message: impl Into<String>) -> Self {
        Self::new(StatusCode::LengthRequired, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalServerError, message)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(m) => write!(f, "{} {}: {m}", self.status.code(), self.status.reason_phrase()),
            None => write!(f, "{} {}", self.status.code(), self.status.reason_phrase()),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<io::Error> for HttpError {
    fn from(err: io::Error) -> Self {
        // A bare transport error reaching this conversion means it leaked
        // past the connection loop's own io::Error handling; treat it as
        // an internal failure rather than silently dropping the cause.
        HttpError::internal(err.to_string())
    }
}
