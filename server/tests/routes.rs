//! End-to-end tests driving the router in-process.
//!
//! Each test gets its own temporary upload directory and a stub mailer that
//! records what it was asked to send.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, StatusCode, header::CONTENT_TYPE},
    response::Response,
};
use http_body_util::BodyExt;
use resume_server::{
    build_router,
    config::{Config, SmtpConfig},
    mail::{Email, MailError, Mailer},
    state::AppState,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const PASSWORD: &str = "hunter2";
const RECIPIENT: &str = "inbox@example.com";
const BOUNDARY: &str = "resume-test-boundary";

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Default)]
struct StubMailer {
    sent: Mutex<Vec<Email>>,
    failure: Option<MailError>,
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email.clone());

        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

struct TestApp {
    _root: TempDir,
    upload_dir: PathBuf,
    state: Arc<AppState>,
    router: Router,
    mailer: Arc<StubMailer>,
}

fn config(upload_dir: &Path) -> Config {
    Config {
        port: 0,
        upload_dir: upload_dir.to_path_buf(),
        max_upload_bytes: 1024 * 1024,
        admin_password: PASSWORD.into(),
        contact_recipient: RECIPIENT.into(),
        cors_origin: None,
        smtp: SmtpConfig {
            host: "smtp.example.com".into(),
            username: "me@example.com".into(),
            password: "unused".into(),
            from: "me@example.com".into(),
            max_retries: 0,
            retry_base: Duration::ZERO,
            timeout: Duration::from_secs(1),
        },
    }
}

impl TestApp {
    async fn new() -> Self {
        Self::with_mailer(StubMailer::default()).await
    }

    async fn with_mailer(mailer: StubMailer) -> Self {
        Self::configured(mailer, |_| {}).await
    }

    async fn configured(mailer: StubMailer, adjust: impl FnOnce(&mut Config)) -> Self {
        let root = tempfile::tempdir().unwrap();
        let upload_dir = root.path().join("uploads");
        let mailer = Arc::new(mailer);

        let mut config = config(&upload_dir);
        adjust(&mut config);

        let state = AppState::with_mailer(config, mailer.clone()).await.unwrap();

        Self {
            router: build_router(state.clone()),
            _root: root,
            upload_dir,
            state,
            mailer,
        }
    }

    /// Rebuilds the app over the same upload directory, as a process restart would.
    async fn restart(self) -> Self {
        let mailer = Arc::new(StubMailer::default());
        let state = AppState::with_mailer(config(&self.upload_dir), mailer.clone())
            .await
            .unwrap();

        Self {
            router: build_router(state.clone()),
            state,
            mailer,
            ..self
        }
    }

    async fn call(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn upload(&self, parts: &[Part<'_>]) -> Response {
        self.call(multipart(parts)).await
    }

    async fn get_resume(&self) -> Response {
        self.call(
            Request::get("/resume")
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn send_json(&self, payload: Value) -> Response {
        self.call(
            Request::post("/send-email")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Visible files in the upload directory, ignoring the sidecar and partial uploads.
    fn stored_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.upload_dir) else {
            return Vec::new();
        };

        entries
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect()
    }

    fn all_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.upload_dir) else {
            return Vec::new();
        };

        entries
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart(parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();

    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());

        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/upload-resume")
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn resume(bytes: &[u8]) -> [Part<'_>; 2] {
    [
        Part::Text("password", PASSWORD),
        Part::File("resume", "resume.pdf", bytes),
    ]
}

async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn contact() -> Value {
    json!({
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "phone": "+44 20 0000 0000",
        "profession": "Analyst",
        "message": "Let's talk engines.",
    })
}

// ============================================================================
// Upload and Retrieval
// ============================================================================

#[tokio::test]
async fn resume_is_404_before_any_upload() {
    let app = TestApp::new().await;

    let response = app.get_resume().await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["message"], "Resume not found");
}

#[tokio::test]
async fn uploaded_bytes_are_served_back() {
    let app = TestApp::new().await;

    let response = app.upload(&resume(b"%PDF-1.7 first")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["message"],
        "Resume uploaded successfully!"
    );

    let response = app.get_resume().await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/pdf");
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"%PDF-1.7 first"));
}

#[tokio::test]
async fn wrong_password_changes_nothing() {
    let app = TestApp::new().await;
    app.upload(&resume(b"original")).await;
    let before = app.state.uploads.get().await;

    let response = app
        .upload(&[
            Part::Text("password", "wrong"),
            Part::File("resume", "resume.pdf", b"intruder"),
        ])
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await["message"],
        "Unauthorized: Incorrect password"
    );
    assert_eq!(app.state.uploads.get().await, before);
    assert_eq!(app.stored_files().len(), 1);
    assert_eq!(body_bytes(app.get_resume().await).await, Bytes::from_static(b"original"));
}

#[tokio::test]
async fn file_sent_before_wrong_password_is_discarded() {
    let app = TestApp::new().await;
    app.upload(&resume(b"original")).await;
    let files_before = app.all_files().len();

    let response = app
        .upload(&[
            Part::File("resume", "resume.pdf", b"intruder"),
            Part::Text("password", "wrong"),
        ])
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.all_files().len(), files_before);
    assert_eq!(body_bytes(app.get_resume().await).await, Bytes::from_static(b"original"));
}

#[tokio::test]
async fn missing_password_is_unauthorized() {
    let app = TestApp::new().await;

    let response = app
        .upload(&[Part::File("resume", "resume.pdf", b"bytes")])
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.stored_files().is_empty());
}

#[tokio::test]
async fn missing_file_is_bad_request() {
    let app = TestApp::new().await;

    let response = app.upload(&[Part::Text("password", PASSWORD)]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["message"], "No file uploaded");
}

#[tokio::test]
async fn empty_file_input_is_bad_request() {
    let app = TestApp::new().await;

    let response = app
        .upload(&[Part::Text("password", PASSWORD), Part::File("resume", "", b"")])
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.all_files().iter().all(|name| !name.ends_with(".part")));
}

#[tokio::test]
async fn second_upload_replaces_first_without_orphans() {
    let app = TestApp::new().await;

    app.upload(&resume(b"first")).await;
    let first = app.state.uploads.get().await.unwrap();

    app.upload(&resume(b"second")).await;
    let second = app.state.uploads.get().await.unwrap();

    assert_ne!(first, second);
    assert_eq!(app.stored_files(), vec![second]);
    assert_eq!(body_bytes(app.get_resume().await).await, Bytes::from_static(b"second"));
}

#[tokio::test]
async fn identical_uploads_get_distinct_names() {
    let app = TestApp::new().await;

    app.upload(&resume(b"same")).await;
    let first = app.state.uploads.get().await.unwrap();

    app.upload(&resume(b"same")).await;
    let second = app.state.uploads.get().await.unwrap();

    assert_ne!(first, second);
    assert_eq!(body_bytes(app.get_resume().await).await, Bytes::from_static(b"same"));
}

#[tokio::test]
async fn resume_survives_restart() {
    let app = TestApp::new().await;
    app.upload(&resume(b"persisted")).await;

    let app = app.restart().await;

    assert_eq!(body_bytes(app.get_resume().await).await, Bytes::from_static(b"persisted"));
}

#[tokio::test]
async fn failed_record_is_500_and_keeps_previous_resume() {
    let app = TestApp::new().await;
    app.upload(&resume(b"previous")).await;

    // a non-empty directory where the sidecar belongs cannot be replaced
    let sidecar = app.upload_dir.join(".current");
    std::fs::remove_file(&sidecar).unwrap();
    std::fs::create_dir(&sidecar).unwrap();
    std::fs::write(sidecar.join("blocker"), b"").unwrap();

    let response = app.upload(&resume(b"replacement")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Storage error");
    assert!(body["error"].is_string());

    assert_eq!(app.stored_files().len(), 1);
    assert_eq!(body_bytes(app.get_resume().await).await, Bytes::from_static(b"previous"));
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let app = TestApp::configured(StubMailer::default(), |config| {
        config.max_upload_bytes = 1024;
    })
    .await;

    let response = app.upload(&resume(&[b'x'; 8 * 1024])).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.stored_files().is_empty());
    assert_eq!(app.get_resume().await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn recorded_but_deleted_file_is_404() {
    let app = TestApp::new().await;
    app.upload(&resume(b"soon gone")).await;

    for name in app.stored_files() {
        std::fs::remove_file(app.upload_dir.join(name)).unwrap();
    }

    assert_eq!(app.get_resume().await.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Contact Relay
// ============================================================================

#[tokio::test]
async fn contact_form_is_relayed_in_order() {
    let app = TestApp::new().await;

    let response = app.send_json(contact()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "Email sent successfully!");

    let sent = app.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, RECIPIENT);

    let positions: Vec<usize> = [
        "Ada Lovelace",
        "ada@example.com",
        "+44 20 0000 0000",
        "Analyst",
        "Let's talk engines.",
    ]
    .iter()
    .map(|value| sent[0].body.find(value).unwrap())
    .collect();

    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn contact_form_accepts_urlencoded_bodies() {
    let app = TestApp::new().await;

    let response = app
        .call(
            Request::post("/send-email")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(
                    "name=Ada&email=not-an-email&phone=x&profession=y&message=hello+there",
                ))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.mailer.sent.lock().unwrap()[0]
        .body
        .contains("Message: hello there"));
}

#[tokio::test]
async fn numeric_contact_values_are_relayed_as_text() {
    let app = TestApp::new().await;
    let mut payload = contact();
    payload["phone"] = json!(5551234);

    let response = app.send_json(payload).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.mailer.sent.lock().unwrap()[0]
        .body
        .contains("Phone: 5551234"));
}

#[tokio::test]
async fn unsupported_contact_content_type_is_bad_request() {
    let app = TestApp::new().await;

    let response = app
        .call(
            Request::post("/send-email")
                .header(CONTENT_TYPE, "text/plain")
                .body(Body::from("name=Ada"))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_contact_field_is_bad_request() {
    let app = TestApp::new().await;
    let mut payload = contact();
    payload.as_object_mut().unwrap().remove("profession");

    let response = app.send_json(payload).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["message"],
        "Missing required field: profession"
    );
    assert!(app.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn mail_failure_is_500_and_leaves_uploads_alone() {
    let app = TestApp::with_mailer(StubMailer {
        failure: Some(MailError::Permanent("535 bad credentials".into())),
        ..StubMailer::default()
    })
    .await;
    app.upload(&resume(b"keep me")).await;
    let before = app.state.uploads.get().await;

    let response = app.send_json(contact()).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Error sending email");
    assert!(body["error"].as_str().unwrap().contains("535 bad credentials"));

    assert_eq!(app.state.uploads.get().await, before);
    assert_eq!(app.stored_files().len(), 1);
    assert_eq!(body_bytes(app.get_resume().await).await, Bytes::from_static(b"keep me"));
}

// ============================================================================
// Misc
// ============================================================================

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new().await;

    let response = app
        .call(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "ok" }));
}
