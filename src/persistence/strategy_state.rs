use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use super::StateRepository;
use crate::error::Result;

/// Typed view over one worker's state record.
///
/// Reads never fail: a missing record yields the default state, and an
/// unreadable one is logged and replaced by the default as well.
#[derive(Clone)]
pub struct StrategyStateStore {
    repo: Arc<dyn StateRepository>,
    key: String,
}

impl StrategyStateStore {
    pub fn new(repo: Arc<dyn StateRepository>, identity: &str) -> Self {
        Self {
            repo,
            key: Self::key_for(identity),
        }
    }

    pub fn key_for(identity: &str) -> String {
        format!("strategy:{}", identity)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load<S>(&self) -> S
    where
        S: DeserializeOwned + Default,
    {
        match self.repo.load(&self.key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        "State record {} does not match its schema ({}), resetting to defaults",
                        self.key, e
                    );
                    S::default()
                }
            },
            Ok(None) => S::default(),
            Err(e) => {
                warn!("Could not read state record {} ({}), resetting to defaults", self.key, e);
                S::default()
            }
        }
    }

    pub async fn save<S: Serialize>(&self, state: &S) -> Result<()> {
        let value = serde_json::to_value(state)?;
        self.repo.store(&self.key, &value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::repository::tests::temp_state_dir;
    use crate::persistence::{FileStateRepository, MemoryStateRepository};
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Hysteresis {
        in_uptrend: bool,
        lock_counter: u32,
    }

    #[tokio::test]
    async fn test_missing_record_yields_default() {
        let store = StrategyStateStore::new(Arc::new(MemoryStateRepository::new()), "rsi|");
        let state: Hysteresis = store.load().await;
        assert_eq!(state, Hysteresis::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = StrategyStateStore::new(Arc::new(MemoryStateRepository::new()), "atr_stop|");
        let state = Hysteresis {
            in_uptrend: false,
            lock_counter: 2,
        };
        store.save(&state).await.unwrap();
        assert_eq!(store.load::<Hysteresis>().await, state);
    }

    #[tokio::test]
    async fn test_corrupt_file_resets_to_default() {
        let dir = temp_state_dir("strategy_corrupt");
        let repo = Arc::new(FileStateRepository::new(&dir));
        let store = StrategyStateStore::new(repo.clone(), "atr_stop|period-14");

        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(repo.path_for(store.key()), b"{{{").await.unwrap();
        assert_eq!(store.load::<Hysteresis>().await, Hysteresis::default());

        // Valid JSON with the wrong shape is treated the same way
        tokio::fs::write(repo.path_for(store.key()), b"[1, 2]").await.unwrap();
        assert_eq!(store.load::<Hysteresis>().await, Hysteresis::default());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
