//! Temporary staging: put document bytes on disk for the engine.
//!
//! The engine only accepts file paths, so every conversion writes its bytes
//! to a uniquely named file in a scratch directory. The file carries the
//! document's extension (engines sniff formats by suffix) and is fully
//! written, flushed and synced before the path is handed out.
//!
//! A [`StagedDocument`] owns its file. Call [`StagedDocument::release`] when
//! the conversion is over; if the owner is dropped instead (request
//! cancelled, panic) the file is removed in the background.

use crate::cleanup::{release_with_retry, release_with_retry_blocking, RetryPolicy};
use crate::error::Doc2MdError;
use bytes::Bytes;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const PREFIX: &str = "doc2md-";

/// A document staged on disk, removed when released or dropped.
#[derive(Debug)]
pub struct StagedDocument {
    path: PathBuf,
    extension: String,
    policy: RetryPolicy,
    released: bool,
}

impl StagedDocument {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Remove the staged file, retrying per the cleanup policy.
    ///
    /// Never fails; a file that cannot be removed is logged and left behind.
    pub async fn release(mut self) {
        self.released = true;
        release_with_retry(&self.path, self.policy).await;
    }
}

impl Drop for StagedDocument {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let path = std::mem::take(&mut self.path);
        let policy = self.policy;
        debug!(path = %path.display(), "Staged document dropped without release");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || release_with_retry_blocking(&path, policy));
            }
            Err(_) => {
                release_with_retry_blocking(&path, policy);
            }
        }
    }
}

/// Create `dir` (and parents) if it does not exist yet.
pub async fn ensure_dir(dir: &Path) -> Result<(), Doc2MdError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| Doc2MdError::Staging {
            dir: dir.to_path_buf(),
            source,
        })
}

/// Write `bytes` to a fresh file in `dir` whose name ends with `extension`.
pub async fn stage(dir: &Path, bytes: Bytes, extension: &str) -> Result<StagedDocument, Doc2MdError> {
    stage_with_policy(dir, bytes, extension, RetryPolicy::default()).await
}

pub async fn stage_with_policy(
    dir: &Path,
    bytes: Bytes,
    extension: &str,
    policy: RetryPolicy,
) -> Result<StagedDocument, Doc2MdError> {
    let owned_dir = dir.to_path_buf();
    let suffix = extension.to_string();

    let path = tokio::task::spawn_blocking(move || write_staged(&owned_dir, &bytes, &suffix))
        .await
        .map_err(|e| Doc2MdError::Internal(format!("Staging task panicked: {e}")))?
        .map_err(|source| Doc2MdError::Staging {
            dir: dir.to_path_buf(),
            source,
        })?;

    debug!(path = %path.display(), "Staged document");
    Ok(StagedDocument {
        path,
        extension: extension.to_string(),
        policy,
        released: false,
    })
}

fn write_staged(dir: &Path, bytes: &[u8], suffix: &str) -> std::io::Result<PathBuf> {
    let mut tmp = tempfile::Builder::new()
        .prefix(PREFIX)
        .suffix(suffix)
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    // Persist past the NamedTempFile guard; StagedDocument owns removal now.
    let (file, path) = tmp.keep().map_err(|e| e.error)?;
    drop(file);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn stage_writes_complete_file_with_extension() {
        let dir = tempfile::tempdir().unwrap();
        let staged = stage(dir.path(), Bytes::from_static(b"%PDF-1.7 body"), ".pdf")
            .await
            .unwrap();

        assert!(staged.path().starts_with(dir.path()));
        let name = staged.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("doc2md-"), "got {name}");
        assert!(name.ends_with(".pdf"), "got {name}");
        assert_eq!(staged.extension(), ".pdf");
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"%PDF-1.7 body");

        staged.release().await;
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn concurrent_stages_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let a = stage(dir.path(), Bytes::from_static(b"a"), ".docx").await.unwrap();
        let b = stage(dir.path(), Bytes::from_static(b"b"), ".docx").await.unwrap();
        assert_ne!(a.path(), b.path());
        a.release().await;
        b.release().await;
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn dropped_document_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let staged = stage(dir.path(), Bytes::from_static(b"x"), ".html").await.unwrap();
        let path = staged.path().to_path_buf();
        drop(staged);

        for _ in 0..50 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
    }

    #[test]
    fn drop_outside_runtime_removes_inline() {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let staged = rt
            .block_on(stage(dir.path(), Bytes::from_static(b"x"), ".pdf"))
            .unwrap();
        let path = staged.path().to_path_buf();
        drop(rt);
        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_dir_is_a_staging_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = stage(&dir.path().join("nope"), Bytes::from_static(b"x"), ".pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, Doc2MdError::Staging { .. }));
    }

    #[tokio::test]
    async fn ensure_dir_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
