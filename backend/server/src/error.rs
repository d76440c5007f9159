use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;
use thiserror::Error;

pub const DUPLICATE_REDIRECT: &str = "/result?message=You%20have%20already%20voted.%20Your%20ballot%20is%20recorded%20and%20will%20not%20be%20counted%20again.";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Ballot store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("Corrupt ballot record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[cfg(test)]
    #[error("Injected failure: {0}")]
    Injected(&'static str),
}

#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("Invalid candidate number: {0:?}")]
    Validation(String),

    #[error("Voter already has a recorded ballot")]
    DuplicateBallot,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Invalid configuration for {key}: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("Ballot store unreachable at startup: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to bind or serve: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid candidate number")]
    MalformedPayload,

    #[error("Already voted")]
    Duplicate,

    #[error("Internal error: {0}")]
    InternalError(#[from] StoreError),
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Validation(_) => AppError::MalformedPayload,
            AdmissionError::DuplicateBallot => AppError::Duplicate,
            AdmissionError::Store(e) => AppError::InternalError(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::Duplicate => return Redirect::to(DUPLICATE_REDIRECT).into_response(),
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
