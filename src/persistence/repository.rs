//! Key/value repository for small JSON state records.
//!
//! Every write is atomic: the record is written to a temp file, flushed,
//! then renamed over the committed file. A reader sees either the previous
//! committed value or the new one, never a partial write.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{BotError, Result};

#[async_trait]
pub trait StateRepository: Send + Sync {
    /// `Ok(None)` when no record exists; `CorruptState` when one exists but
    /// cannot be decoded.
    async fn load(&self, key: &str) -> Result<Option<Value>>;

    async fn store(&self, key: &str, value: &Value) -> Result<()>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// All committed records, keyed by storage name
    async fn list(&self) -> Result<Vec<(String, Value)>>;
}

/// One JSON file per key under a state directory
pub struct FileStateRepository {
    dir: PathBuf,
}

impl FileStateRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys are free-form (`strategy:rsi|period-14`), file names are not.
    /// Unsafe characters are replaced and a short digest of the raw key keeps
    /// distinct keys from colliding after replacement.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let file = if safe == key {
            format!("{}.json", key)
        } else {
            let digest = hex::encode(Sha256::digest(key.as_bytes()));
            format!("{}-{}.json", safe, &digest[..8])
        };
        self.dir.join(file)
    }
}

#[async_trait]
impl StateRepository for FileStateRepository {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BotError::Io(e)),
        };
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| BotError::CorruptState {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn store(&self, key: &str, value: &Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(value)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        debug!("Stored state record {} at {}", key, path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BotError::Io(e)),
        }
    }

    async fn list(&self) -> Result<Vec<(String, Value)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BotError::Io(e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // Leftover temp files from an interrupted write are not records
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let body = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str(&body) {
                Ok(value) => out.push((name.to_string(), value)),
                Err(e) => debug!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

/// Process-local repository. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStateRepository {
    records: RwLock<HashMap<String, Value>>,
}

impl MemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateRepository for MemoryStateRepository {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, value: &Value) -> Result<()> {
        self.records
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, Value)>> {
        let mut out: Vec<_> = self
            .records
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    pub(crate) fn temp_state_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "candlebot_{}_{}",
            tag,
            Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ))
    }

    #[tokio::test]
    async fn test_file_roundtrip_and_remove() {
        let dir = temp_state_dir("repo_roundtrip");
        let repo = FileStateRepository::new(&dir);

        assert!(repo.load("position").await.unwrap().is_none());

        let value = json!({"in_uptrend": true, "lock_counter": 2});
        repo.store("position", &value).await.unwrap();
        assert_eq!(repo.load("position").await.unwrap(), Some(value));
        assert!(dir.join("position.json").exists());

        repo.remove("position").await.unwrap();
        repo.remove("position").await.unwrap();
        assert!(repo.load("position").await.unwrap().is_none());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_interrupted_write_keeps_committed_value() {
        let dir = temp_state_dir("repo_crash");
        let repo = FileStateRepository::new(&dir);
        let committed = json!({"lock_counter": 1});
        repo.store("strategy:atr_stop", &committed).await.unwrap();

        // Simulate a crash between temp write and rename
        let tmp = repo.path_for("strategy:atr_stop").with_extension("json.tmp");
        tokio::fs::write(&tmp, b"{\"lock_coun").await.unwrap();

        assert_eq!(repo.load("strategy:atr_stop").await.unwrap(), Some(committed));
        assert_eq!(repo.list().await.unwrap().len(), 1);

        // The next write replaces the stale temp file
        let next = json!({"lock_counter": 0});
        repo.store("strategy:atr_stop", &next).await.unwrap();
        assert_eq!(repo.load("strategy:atr_stop").await.unwrap(), Some(next));
        assert!(!tmp.exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_corrupt_record_reported() {
        let dir = temp_state_dir("repo_corrupt");
        let repo = FileStateRepository::new(&dir);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(repo.path_for("position"), b"not json").await.unwrap();

        let err = repo.load("position").await.unwrap_err();
        assert!(matches!(err, BotError::CorruptState { .. }));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn test_path_for_distinguishes_sanitized_keys() {
        let repo = FileStateRepository::new("/tmp/x");
        let a = repo.path_for("strategy:rsi|period-14");
        let b = repo.path_for("strategy:rsi_period-14");
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with(".json"));
        assert_eq!(repo.path_for("position"), PathBuf::from("/tmp/x/position.json"));
    }

    #[tokio::test]
    async fn test_memory_repository() {
        let repo = MemoryStateRepository::new();
        repo.store("a", &json!(1)).await.unwrap();
        repo.store("b", &json!(2)).await.unwrap();
        assert_eq!(repo.load("a").await.unwrap(), Some(json!(1)));
        assert_eq!(repo.list().await.unwrap().len(), 2);
        repo.remove("a").await.unwrap();
        assert!(repo.load("a").await.unwrap().is_none());
    }
}
