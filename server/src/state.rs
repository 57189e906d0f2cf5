use std::sync::Arc;

use crate::{
    config::Config,
    error::StartupError,
    mail::{Mailer, RetryingMailer, SmtpMailer},
    storage::Storage,
    upload::UploadState,
};

pub struct AppState {
    pub config: Config,
    pub uploads: UploadState,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, StartupError> {
        let mailer = RetryingMailer::new(
            SmtpMailer::new(&config.smtp)?,
            config.smtp.max_retries,
            config.smtp.retry_base,
        );

        Self::with_mailer(config, Arc::new(mailer)).await
    }

    pub async fn with_mailer(
        config: Config,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Arc<Self>, StartupError> {
        let uploads = UploadState::open(Storage::new(&config.upload_dir)).await?;

        Ok(Arc::new(Self {
            config,
            uploads,
            mailer,
        }))
    }
}
