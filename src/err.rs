#![allow(non_snake_case)]

use crate::{IntoResponse, Uri};

use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;

use serde::Serialize;

pub async fn handler404(path: Uri) -> (StatusCode, Json<Error>) {
    (
        StatusCode::NOT_FOUND,
        Json(Error::NotFound {
            message: format!("Invalid path: {}", path),
        }),
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Maybe<T> {
    Nothing(Error),
    Fine(Success<T>),
}

pub fn Fine<V>(v: V) -> Maybe<V>
where
    V: Serialize,
{
    Maybe::Fine(Success::of(v))
}

pub fn Nothing<V>(err: Error) -> Maybe<V> {
    Maybe::Nothing(err)
}

#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<T> IntoResponse for Maybe<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        match self {
            Maybe::Nothing(err) => err.into_response(),
            Maybe::Fine(success) => Json::into_response(Json(success)),
        }
    }
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

/// Domain error taxonomy. Every variant serializes as a tagged JSON object
/// and maps to an HTTP status; handlers never panic on these.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error")]
pub enum Error {
    NotFound { message: String },
    Duplicate { message: String },
    InvalidCredentials { message: String },
    InvalidSession { message: String },
    FaceMismatch { distance: f64 },
    LectureCodeMissing { message: String },
    VerificationTimeout { message: String },
    InvalidPayload { message: String },
    StorageFailure { message: String },
    InternalError { kind: &'static str, message: String },
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Duplicate { .. } => StatusCode::CONFLICT,
            Error::InvalidCredentials { .. } | Error::InvalidSession { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Error::FaceMismatch { .. } => StatusCode::FORBIDDEN,
            Error::LectureCodeMissing { .. } | Error::InvalidPayload { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::VerificationTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Error::StorageFailure { .. } | Error::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// SQLite reports unique-constraint breaches as SQLITE_CONSTRAINT_UNIQUE
/// (2067) or SQLITE_CONSTRAINT_PRIMARYKEY (1555).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => code == "2067" || code == "1555",
            None => db.message().contains("UNIQUE constraint failed"),
        },
        _ => false,
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::StorageFailure {
            message: io.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageFailure {
            message: err.to_string(),
        }
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Self::InvalidPayload {
            message: format!("face_image is not valid base64: {}", err),
        }
    }
}

impl From<pbkdf2::password_hash::Error> for Error {
    fn from(err: pbkdf2::password_hash::Error) -> Self {
        Self::InternalError {
            kind: "PasswordHash",
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError {
            kind: "Unknown",
            message: err.to_string(),
        }
    }
}
