//! Per-cycle decision artifacts
//!
//! `prompt_input.txt`, `raw_output.txt` and `processed_output.json` are
//! overwritten each cycle with the same temp-then-rename write as the state
//! repository. The processed output doubles as the "previous decision" fed
//! to the next cycle.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::domain::Decision;
use crate::error::{BotError, Result};

pub const PROMPT_FILE: &str = "prompt_input.txt";
pub const RAW_FILE: &str = "raw_output.txt";
pub const PROCESSED_FILE: &str = "processed_output.json";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self) -> [PathBuf; 3] {
        [PROMPT_FILE, RAW_FILE, PROCESSED_FILE].map(|name| self.dir.join(name))
    }

    async fn write_atomic(&self, name: &str, body: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(body).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        debug!("Wrote artifact {}", path.display());
        Ok(())
    }

    pub async fn write_prompt(&self, prompt: &str) -> Result<()> {
        self.write_atomic(PROMPT_FILE, prompt.as_bytes()).await
    }

    pub async fn write_raw(&self, raw: &str) -> Result<()> {
        self.write_atomic(RAW_FILE, raw.as_bytes()).await
    }

    pub async fn write_processed(&self, decisions: &[Decision]) -> Result<()> {
        let body = serde_json::to_vec_pretty(decisions)?;
        self.write_atomic(PROCESSED_FILE, &body).await
    }

    /// Processed output of the last cycle, if one was written
    pub async fn previous_processed(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.dir.join(PROCESSED_FILE)).await {
            Ok(body) if body.trim().is_empty() => Ok(None),
            Ok(body) => Ok(Some(body.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BotError::Io(e)),
        }
    }

    /// Remove every artifact; returns how many files existed
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.paths() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BotError::Io(e)),
            }
        }
        info!("Cleared {} decision artifacts", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> ArtifactStore {
        let dir = std::env::temp_dir().join(format!(
            "candlebot_artifacts_{}_{}",
            name,
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        ArtifactStore::new(dir)
    }

    #[tokio::test]
    async fn test_write_read_clear() {
        let store = temp_store("cycle");
        assert_eq!(store.previous_processed().await.unwrap(), None);

        store.write_prompt("SYSTEM MESSAGE:\n...").await.unwrap();
        store.write_raw("[{\"action\":\"HOLD\"}]").await.unwrap();
        store.write_processed(&[Decision::hold()]).await.unwrap();

        let previous = store.previous_processed().await.unwrap().unwrap();
        assert!(previous.contains("\"HOLD\""));
        assert!(store.paths().iter().all(|p| p.exists()));

        assert_eq!(store.clear().await.unwrap(), 3);
        assert_eq!(store.clear().await.unwrap(), 0);
        assert_eq!(store.previous_processed().await.unwrap(), None);

        let _ = tokio::fs::remove_dir_all(store.dir()).await;
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_file() {
        let store = temp_store("overwrite");
        store.write_raw("first").await.unwrap();
        store.write_raw("second").await.unwrap();

        let body = tokio::fs::read_to_string(store.dir().join(RAW_FILE)).await.unwrap();
        assert_eq!(body, "second");
        assert!(!store.dir().join(format!("{}.tmp", RAW_FILE)).exists());

        let _ = tokio::fs::remove_dir_all(store.dir()).await;
    }
}
