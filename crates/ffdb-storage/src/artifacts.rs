//! Raw payload archive. Every source response is kept on disk, addressed by
//! its content hash, before any of it is normalized.

use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedPayload {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// `<season>/<source_id>/<scope>/<sha256>.json`
    pub fn payload_path(season: i32, source_id: &str, scope: &str, content_hash: &str) -> PathBuf {
        PathBuf::from(season.to_string())
            .join(sanitize_segment(source_id))
            .join(sanitize_segment(scope))
            .join(format!("{content_hash}.json"))
    }

    /// Write `bytes` once. Identical payloads for the same season, source and
    /// scope land on the same path and are reported as deduplicated.
    pub async fn archive(
        &self,
        season: i32,
        source_id: &str,
        scope: &str,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedPayload> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = Self::payload_path(season, source_id, scope, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        let archived = |deduplicated| ArchivedPayload {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            debug!(path = %relative_path.display(), "payload already archived");
            return Ok(archived(true));
        }

        let temp_path = parent.join(format!(".{}.partial", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("creating partial payload {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing partial payload {}", temp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("syncing partial payload {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "moving payload {} into place at {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        debug!(path = %relative_path.display(), bytes = bytes.len(), "payload archived");
        Ok(archived(false))
    }
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            ArtifactStore::sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn path_segments_are_filesystem_safe() {
        let path = ArtifactStore::payload_path(2024, "espn", "draft picks/1", "abc");
        assert_eq!(path, PathBuf::from("2024/espn/draft_picks_1/abc.json"));
    }

    #[tokio::test]
    async fn identical_payloads_are_stored_once() {
        let dir = tempdir().expect("tempdir");
        let archive = ArtifactStore::new(dir.path());

        let first = archive
            .archive(2024, "espn", "players", br#"{"players":[]}"#)
            .await
            .expect("first archive");
        let second = archive
            .archive(2024, "espn", "players", br#"{"players":[]}"#)
            .await
            .expect("second archive");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert_eq!(
            std::fs::read(&first.absolute_path).expect("read back"),
            br#"{"players":[]}"#
        );
    }
}
