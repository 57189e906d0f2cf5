//! # Current Resume
//!
//! Exactly one resume is served at a time. The name of that file is held in
//! memory and mirrored to a `.current` sidecar in the upload directory so a
//! restart picks the same file back up.
//!
//! ## Replacement Order
//!
//! 1. New upload fully written and persisted under its final name
//! 2. Sidecar rewritten to name the new file
//! 3. Previous file deleted
//!
//! A failure at step 1 or 2 leaves the previous resume recorded and served.
//! The whole sequence runs under one lock on its own task, so neither a
//! concurrent upload nor a dropped request can leave a file unrecorded.
use std::{
    io::{self, ErrorKind, Write},
    path::PathBuf,
    sync::Arc,
};

use tempfile::NamedTempFile;
use tokio::{fs, sync::Mutex, task::spawn_blocking};
use tracing::{info, warn};

use crate::storage::{PendingFile, Storage, StoredFile};

const SIDECAR: &str = ".current";

pub struct UploadState {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Storage,
    current: Mutex<Option<String>>,
}

impl UploadState {
    /// Restores the recorded resume from the sidecar, if it still exists on disk.
    pub async fn open(storage: Storage) -> io::Result<Self> {
        let current = match fs::read_to_string(storage.dir().join(SIDECAR)).await {
            Ok(contents) => {
                let filename = contents.trim().to_string();

                if filename.is_empty() {
                    None
                } else if storage.resolve(&filename).await.is_some() {
                    info!("Restored current resume {filename}");
                    Some(filename)
                } else {
                    warn!("Recorded resume {filename} no longer exists, starting empty");
                    None
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                current: Mutex::new(current),
            }),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub async fn get(&self) -> Option<String> {
        self.inner.current.lock().await.clone()
    }

    /// Records `filename` as current without touching any previous file.
    pub async fn set(&self, filename: Option<String>) -> io::Result<()> {
        let mut current = self.inner.current.lock().await;

        self.inner.persist(filename.as_deref()).await?;
        *current = filename;

        Ok(())
    }

    /// Commits a finished upload and makes it the current resume.
    ///
    /// Runs to completion even if the caller stops polling.
    pub async fn replace(&self, pending: PendingFile) -> io::Result<StoredFile> {
        let inner = self.inner.clone();

        tokio::spawn(async move { inner.replace(pending).await })
            .await
            .map_err(io::Error::other)?
    }
}

impl Inner {
    async fn replace(&self, pending: PendingFile) -> io::Result<StoredFile> {
        let mut current = self.current.lock().await;

        let stored = pending.commit().await?;

        if let Err(e) = self.persist(Some(&stored.filename)).await {
            warn!("Failed to record {}, keeping previous resume: {e}", stored.filename);

            if let Err(cleanup) = self.storage.delete(&stored.filename).await {
                warn!("Failed to remove unrecorded {}: {cleanup}", stored.filename);
            }

            return Err(e);
        }

        if let Some(previous) = current.replace(stored.filename.clone()) {
            match self.storage.delete(&previous).await {
                Ok(()) => info!("Removed superseded resume {previous}"),
                Err(e) => warn!("Failed to remove superseded resume {previous}: {e}"),
            }
        }

        Ok(stored)
    }

    async fn persist(&self, filename: Option<&str>) -> io::Result<()> {
        let dir = self.storage.dir().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let contents = filename.unwrap_or_default().to_string();

        spawn_blocking(move || write_sidecar(dir, &contents))
            .await
            .map_err(io::Error::other)?
    }
}

fn write_sidecar(dir: PathBuf, contents: &str) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(SIDECAR))?;

    Ok(())
}
