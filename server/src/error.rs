use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{config::ConfigError, mail::MailError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: Incorrect password")]
    Unauthorized,

    #[error("No file uploaded")]
    MissingFile,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Resume not found")]
    ResumeNotFound,

    /// A resume is recorded but its file is gone from disk.
    #[error("Resume not found")]
    ResumeFileMissing(String),

    #[error("Storage error")]
    Io(#[from] io::Error),

    #[error("Error sending email")]
    Mail(#[from] MailError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Unauthorized => StatusCode::FORBIDDEN,
            AppError::MissingFile
            | AppError::MissingField(_)
            | AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ResumeNotFound | AppError::ResumeFileMissing(_) => StatusCode::NOT_FOUND,
            AppError::Io(_) | AppError::Mail(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            AppError::Io(e) => {
                error!("Storage failure: {e}");
                json!({ "message": self.to_string(), "error": e.to_string() })
            }
            AppError::Mail(e) => {
                error!("Mail failure: {e}");
                json!({ "message": self.to_string(), "error": e.to_string() })
            }
            AppError::ResumeFileMissing(filename) => {
                warn!("Recorded resume {filename} is missing on disk");
                json!({ "message": self.to_string() })
            }
            _ => json!({ "message": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Mail transport misconfigured: {0}")]
    Mail(#[from] MailError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
