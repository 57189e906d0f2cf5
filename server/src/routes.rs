use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, State},
    http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::{
    error::AppError,
    state::AppState,
    utils::{ContactForm, read_upload},
};

#[derive(Serialize)]
pub struct Message {
    message: &'static str,
}

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<Message>, AppError> {
    let pending = read_upload(&state, multipart).await?;
    let stored = state.uploads.replace(pending).await?;

    info!("Stored new resume {}", stored.filename);

    Ok(Json(Message {
        message: "Resume uploaded successfully!",
    }))
}

pub async fn resume_handler(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let filename = state.uploads.get().await.ok_or(AppError::ResumeNotFound)?;

    let path = state
        .uploads
        .storage()
        .resolve(&filename)
        .await
        .ok_or_else(|| AppError::ResumeFileMissing(filename.clone()))?;

    // a concurrent upload may delete the file between resolve and open
    let file = File::open(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::ResumeFileMissing(filename.clone()),
        _ => AppError::Io(e),
    })?;
    let len = file.metadata().await?.len();

    let content_type = mime_guess::from_path(&filename)
        .first_or_octet_stream()
        .to_string();

    let headers = [
        (CONTENT_TYPE, content_type),
        (CONTENT_LENGTH, len.to_string()),
        (CONTENT_DISPOSITION, format!("inline; filename=\"{filename}\"")),
    ];

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

pub async fn send_email_handler(
    State(state): State<Arc<AppState>>,
    ContactForm(submission): ContactForm,
) -> Result<Json<Message>, AppError> {
    let email = submission.to_email(&state.config.contact_recipient);

    state.mailer.send(&email).await?;

    info!("Relayed contact submission from {}", submission.name);

    Ok(Json(Message {
        message: "Email sent successfully!",
    }))
}

pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
