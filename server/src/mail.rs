//! # Outbound Mail
//!
//! Contact submissions leave the service as a single plain-text email sent
//! through an authenticated SMTP relay.
//!
//! ## Failure Classes
//!
//! - **Transient**: 4xx replies, connection drops, timeouts. Worth retrying.
//! - **Permanent**: 5xx replies such as rejected credentials or recipients.
//! - **Build**: the message itself could not be assembled (bad address).
//!
//! [`RetryingMailer`] retries transient failures with exponential backoff and
//! surfaces everything else immediately.
use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{self, authentication::Credentials},
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::SmtpConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("Temporary mail failure: {0}")]
    Transient(String),

    #[error("Mail rejected: {0}")]
    Permanent(String),

    #[error("Invalid message: {0}")]
    Build(String),
}

impl MailError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MailError::Transient(_))
    }
}

impl From<smtp::Error> for MailError {
    fn from(e: smtp::Error) -> Self {
        if e.is_permanent() || e.is_client() {
            MailError::Permanent(e.to_string())
        } else {
            MailError::Transient(e.to_string())
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| MailError::Build(format!("sender {}: {e}", config.from)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| MailError::Build(format!("relay {}: {e}", config.host)))?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(config.timeout))
            .build();

        info!("Mail relay configured for {} as {}", config.host, config.from);

        Ok(Self { transport, from })
    }

    fn build(&self, email: &Email) -> Result<Message, MailError> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|e| MailError::Build(format!("recipient {}: {e}", email.to)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let message = self.build(email)?;
        let response = self.transport.send(message).await?;

        debug!("Relay accepted message: {:?}", response.code());

        Ok(())
    }
}

pub struct RetryingMailer<M> {
    inner: M,
    max_retries: u32,
    base_delay: Duration,
}

impl<M: Mailer> RetryingMailer<M> {
    pub fn new(inner: M, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[async_trait]
impl<M: Mailer> Mailer for RetryingMailer<M> {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let mut attempt = 0;

        loop {
            match self.inner.send(email).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    warn!("{e}, retrying in {delay:?}");

                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
