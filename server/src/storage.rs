//! # Upload Directory
//!
//! Every resume lives as a single file directly under the upload directory.
//!
//! ## Naming
//!
//! - `resume-<unix millis>-<random hex><.ext>`
//! - Extension comes from the client filename, lowercased, ASCII alphanumeric only
//! - Client supplied names never reach the filesystem otherwise
//!
//! ## Writes
//!
//! Bytes are streamed into a hidden `NamedTempFile` in the upload directory
//! which is persisted under its final name only once it has been flushed and
//! synced. A servable name therefore always points at a complete file, and an
//! abandoned upload is removed along with its temp file.
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use axum::body::Bytes;
use tempfile::{Builder, TempPath};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    task::spawn_blocking,
};
use tracing::{debug, warn};

pub const FILE_PREFIX: &str = "resume-";
const PART_PREFIX: &str = ".upload-";
const PART_SUFFIX: &str = ".part";
const MAX_EXTENSION_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Opens a temp file for a new upload, creating the directory on first use.
    pub async fn create(&self, original_name: Option<&str>) -> io::Result<PendingFile> {
        fs::create_dir_all(&self.dir).await?;

        let filename = generate_filename(original_name);
        let dir = self.dir.clone();

        let tmp = spawn_blocking(move || {
            Builder::new()
                .prefix(PART_PREFIX)
                .suffix(PART_SUFFIX)
                .tempfile_in(dir)
        })
        .await
        .map_err(io::Error::other)??;

        let (file, temp_path) = tmp.into_parts();
        debug!("Receiving upload into {}", temp_path.display());

        Ok(PendingFile {
            file: File::from_std(file),
            temp_path,
            final_path: self.dir.join(&filename),
            filename,
            len: 0,
        })
    }

    /// Writes a whole byte stream and commits it under a fresh name.
    pub async fn save<I>(&self, chunks: I, original_name: Option<&str>) -> io::Result<StoredFile>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut pending = self.create(original_name).await?;

        for chunk in chunks {
            pending.write(&chunk).await?;
        }

        pending.commit().await
    }

    /// Removes a stored file. A file that is already gone counts as removed.
    pub async fn delete(&self, filename: &str) -> io::Result<()> {
        if !is_plain_name(filename) {
            return Ok(());
        }

        match fs::remove_file(self.dir.join(filename)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{filename} already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn resolve(&self, filename: &str) -> Option<PathBuf> {
        if !is_plain_name(filename) {
            warn!("Refusing to resolve suspicious filename {filename:?}");
            return None;
        }

        let path = self.dir.join(filename);

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Some(path),
            _ => None,
        }
    }
}

/// An upload that has been written to disk but is not yet servable.
///
/// Dropping it without calling [`PendingFile::commit`] deletes the temp file.
#[derive(Debug)]
pub struct PendingFile {
    file: File,
    temp_path: TempPath,
    final_path: PathBuf,
    filename: String,
    len: u64,
}

impl PendingFile {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.len += chunk.len() as u64;

        Ok(())
    }

    pub async fn commit(self) -> io::Result<StoredFile> {
        let Self {
            mut file,
            temp_path,
            final_path,
            filename,
            ..
        } = self;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let target = final_path.clone();
        spawn_blocking(move || temp_path.persist(target))
            .await
            .map_err(io::Error::other)??;

        Ok(StoredFile {
            filename,
            path: final_path,
        })
    }

    pub async fn discard(self) {
        let Self { file, temp_path, .. } = self;
        drop(file);

        let path_display = temp_path.display().to_string();
        match spawn_blocking(move || temp_path.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to remove {path_display}: {e}"),
            Err(e) => warn!("Failed to remove {path_display}: {e}"),
        }
    }
}

pub fn generate_filename(original_name: Option<&str>) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: u32 = rand::random();

    format!(
        "{FILE_PREFIX}{millis}-{suffix:08x}{}",
        original_name.map(extension_of).unwrap_or_default()
    )
}

/// Extension of the last path component, including the leading dot.
fn extension_of(original_name: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);

    match base.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => String::new(),
    }
}

fn is_plain_name(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains(['/', '\\'])
        && filename != ".."
}
