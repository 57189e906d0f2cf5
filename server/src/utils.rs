use axum::{
    Form, Json,
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{StatusCode, header::CONTENT_TYPE},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    error::AppError::{self, MalformedPayload},
    mail::Email,
    state::AppState,
    storage::PendingFile,
};

pub const RESUME_FIELD: &str = "resume";
pub const PASSWORD_FIELD: &str = "password";
pub const CONTACT_SUBJECT: &str = "New Contact Form Submission";

/// Fields are taken as any JSON value so numbers and booleans are relayed as text.
#[derive(Deserialize, Default)]
pub struct ContactPayload {
    name: Option<Value>,
    email: Option<Value>,
    phone: Option<Value>,
    profession: Option<Value>,
    message: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub profession: String,
    pub message: String,
}

impl ContactPayload {
    pub fn validate(self) -> Result<ContactSubmission, AppError> {
        Ok(ContactSubmission {
            name: present("name", self.name)?,
            email: present("email", self.email)?,
            phone: present("phone", self.phone)?,
            profession: present("profession", self.profession)?,
            message: present("message", self.message)?,
        })
    }
}

fn present(field: &'static str, value: Option<Value>) -> Result<String, AppError> {
    value
        .and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
        .filter(|v| !v.trim().is_empty())
        .ok_or(AppError::MissingField(field))
}

impl ContactSubmission {
    pub fn to_email(&self, recipient: &str) -> Email {
        Email {
            to: recipient.to_string(),
            subject: CONTACT_SUBJECT.to_string(),
            body: format!(
                "Name: {}\nEmail: {}\nPhone: {}\nProfession: {}\nMessage: {}\n",
                self.name, self.email, self.phone, self.profession, self.message
            ),
        }
    }
}

/// Contact submission read from either a JSON or a urlencoded form body.
pub struct ContactForm(pub ContactSubmission);

impl<S> FromRequest<S> for ContactForm
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let payload = if content_type.starts_with("application/json") {
            Json::<ContactPayload>::from_request(req, state)
                .await
                .map_err(|e| MalformedPayload(e.body_text()))?
                .0
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            Form::<ContactPayload>::from_request(req, state)
                .await
                .map_err(|e| MalformedPayload(e.body_text()))?
                .0
        } else {
            return Err(MalformedPayload(format!(
                "Unsupported content type {content_type:?}"
            )));
        };

        payload.validate().map(ContactForm)
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge,
        _ => MalformedPayload(e.body_text()),
    }
}

fn authorize(state: &AppState, password: Option<&str>) -> Result<(), AppError> {
    match password {
        Some(password) if password == state.config.admin_password => Ok(()),
        _ => {
            info!("Rejected upload with incorrect password");
            Err(AppError::Unauthorized)
        }
    }
}

/// Reads the upload form, writing the resume to a pending file as it arrives.
///
/// A password that precedes the file is checked before any bytes hit the
/// disk. A file that precedes the password is held as a pending file and
/// dropped (removing it) if authorization fails.
pub async fn read_upload(state: &AppState, mut multipart: Multipart) -> Result<PendingFile, AppError> {
    let mut password: Option<String> = None;
    let mut pending: Option<PendingFile> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);

        match name.as_deref() {
            Some(PASSWORD_FIELD) => {
                password = Some(field.text().await.map_err(multipart_error)?);
            }
            Some(RESUME_FIELD) if pending.is_none() => {
                if password.is_some() {
                    authorize(state, password.as_deref())?;
                }

                let original_name = field.file_name().map(str::to_owned);
                let mut file = state.uploads.storage().create(original_name.as_deref()).await?;

                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    file.write(&chunk).await?;
                }

                let no_file_chosen = original_name.as_deref().is_none_or(str::is_empty);
                if file.is_empty() && no_file_chosen {
                    file.discard().await;
                    continue;
                }

                debug!("Received {} bytes as {}", file.len(), file.filename());
                pending = Some(file);
            }
            other => debug!("Skipping multipart field {other:?}"),
        }
    }

    authorize(state, password.as_deref())?;

    pending.ok_or(AppError::MissingFile)
}
