//! The single global position record.
//!
//! At most one position exists. It is only mutated through a
//! [`PositionGuard`], which holds the store lock; each mutation is persisted
//! before the in-memory copy changes, so reads never run ahead of disk.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use super::StateRepository;
use crate::domain::OrderSide;
use crate::error::Result;

pub const POSITION_KEY: &str = "position";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: OrderSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    #[serde(rename = "timestamp")]
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.opened_at
    }

    /// A position exactly `ttl` old is already expired.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) >= ttl
    }
}

/// Result of applying a SELL fill to the tracked position
#[derive(Debug, Clone, PartialEq)]
pub enum SellOutcome {
    NoPosition,
    Closed(Position),
    Reduced { remaining: Decimal },
}

pub struct PositionStore {
    repo: Arc<dyn StateRepository>,
    slot: Mutex<Option<Position>>,
}

impl PositionStore {
    /// Load the persisted record. An unreadable record is discarded with a
    /// warning: trading continues as if flat.
    pub async fn load(repo: Arc<dyn StateRepository>) -> Result<Self> {
        let position = match repo.load(POSITION_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<Position>(value) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Discarding unreadable position record: {}", e);
                    repo.remove(POSITION_KEY).await?;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Discarding unreadable position record: {}", e);
                repo.remove(POSITION_KEY).await?;
                None
            }
        };

        if let Some(ref p) = position {
            info!(
                "Recovered position: {} {} @ {} opened {}",
                p.side, p.size, p.entry_price, p.opened_at
            );
        }

        Ok(Self {
            repo,
            slot: Mutex::new(position),
        })
    }

    /// Snapshot of the current position. Waits for any mutation in progress.
    pub async fn current(&self) -> Option<Position> {
        self.slot.lock().await.clone()
    }

    /// Exclusive access for a read-modify-write sequence
    pub async fn lock(&self) -> PositionGuard<'_> {
        PositionGuard {
            slot: self.slot.lock().await,
            repo: self.repo.as_ref(),
        }
    }

    /// Drop the position if it reached the TTL. Returns the purged record.
    pub async fn purge_if_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<Position>> {
        let mut guard = self.lock().await;
        let expired = guard
            .position()
            .filter(|p| p.is_expired(now, ttl))
            .cloned();
        let Some(purged) = expired else {
            return Ok(None);
        };

        guard.clear().await?;
        info!(
            "Purged stale position opened {} (age {}m, ttl {}m)",
            purged.opened_at,
            purged.age(now).num_minutes(),
            ttl.num_minutes()
        );
        Ok(Some(purged))
    }
}

pub struct PositionGuard<'a> {
    slot: MutexGuard<'a, Option<Position>>,
    repo: &'a dyn StateRepository,
}

impl PositionGuard<'_> {
    pub fn position(&self) -> Option<&Position> {
        self.slot.as_ref()
    }

    /// Create or overwrite the position
    pub async fn replace(&mut self, position: Position) -> Result<()> {
        self.repo
            .store(POSITION_KEY, &serde_json::to_value(&position)?)
            .await?;
        *self.slot = Some(position);
        Ok(())
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.repo.remove(POSITION_KEY).await?;
        *self.slot = None;
        Ok(())
    }

    /// A sell of at least the tracked size closes the position; a smaller
    /// one reduces it.
    pub async fn apply_sell(&mut self, quantity: Decimal) -> Result<SellOutcome> {
        let Some(current) = self.slot.clone() else {
            return Ok(SellOutcome::NoPosition);
        };

        if quantity >= current.size {
            self.clear().await?;
            return Ok(SellOutcome::Closed(current));
        }

        let remaining = current.size - quantity;
        self.replace(Position {
            size: remaining,
            ..current
        })
        .await?;
        Ok(SellOutcome::Reduced { remaining })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::repository::tests::temp_state_dir;
    use crate::persistence::{FileStateRepository, MemoryStateRepository};
    use rust_decimal_macros::dec;

    fn position(opened_at: DateTime<Utc>) -> Position {
        Position {
            side: OrderSide::Buy,
            size: dec!(0.006),
            entry_price: dec!(50000),
            opened_at,
        }
    }

    #[test]
    fn test_ttl_boundary_is_expired() {
        let now = Utc::now();
        let ttl = Duration::hours(4);
        assert!(position(now - ttl).is_expired(now, ttl));
        assert!(!position(now - ttl + Duration::seconds(1)).is_expired(now, ttl));
    }

    #[test]
    fn test_persisted_format() {
        let p = position("2024-05-01T12:00:00Z".parse().unwrap());
        let value = serde_json::to_value(&p).unwrap();
        assert_eq!(value["side"], "BUY");
        assert_eq!(value["timestamp"], "2024-05-01T12:00:00Z");
        assert!(value.get("size").is_some());
        assert!(value.get("entry_price").is_some());
    }

    #[tokio::test]
    async fn test_purge_removes_record() {
        let dir = temp_state_dir("position_purge");
        let repo = Arc::new(FileStateRepository::new(&dir));
        let store = PositionStore::load(repo.clone()).await.unwrap();

        let now = Utc::now();
        store
            .lock()
            .await
            .replace(position(now - Duration::hours(5)))
            .await
            .unwrap();
        assert!(repo.path_for(POSITION_KEY).exists());

        let purged = store.purge_if_expired(now, Duration::hours(4)).await.unwrap();
        assert!(purged.is_some());
        assert!(store.current().await.is_none());
        assert!(!repo.path_for(POSITION_KEY).exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_fresh_position_survives_purge() {
        let store = PositionStore::load(Arc::new(MemoryStateRepository::new()))
            .await
            .unwrap();
        let now = Utc::now();
        store
            .lock()
            .await
            .replace(position(now - Duration::hours(1)))
            .await
            .unwrap();
        assert!(store
            .purge_if_expired(now, Duration::hours(4))
            .await
            .unwrap()
            .is_none());
        assert!(store.current().await.is_some());
    }

    #[tokio::test]
    async fn test_sell_reduces_then_closes() {
        let store = PositionStore::load(Arc::new(MemoryStateRepository::new()))
            .await
            .unwrap();
        let mut guard = store.lock().await;
        assert_eq!(guard.apply_sell(dec!(1)).await.unwrap(), SellOutcome::NoPosition);

        guard.replace(position(Utc::now())).await.unwrap();
        assert_eq!(
            guard.apply_sell(dec!(0.002)).await.unwrap(),
            SellOutcome::Reduced {
                remaining: dec!(0.004)
            }
        );
        assert!(matches!(
            guard.apply_sell(dec!(0.004)).await.unwrap(),
            SellOutcome::Closed(_)
        ));
        assert!(guard.position().is_none());
    }

    #[tokio::test]
    async fn test_reload_recovers_position() {
        let repo: Arc<dyn StateRepository> = Arc::new(MemoryStateRepository::new());
        let p = position("2024-05-01T12:00:00Z".parse().unwrap());
        {
            let store = PositionStore::load(repo.clone()).await.unwrap();
            store.lock().await.replace(p.clone()).await.unwrap();
        }
        let reloaded = PositionStore::load(repo).await.unwrap();
        assert_eq!(reloaded.current().await, Some(p));
    }

    #[tokio::test]
    async fn test_corrupt_record_discarded() {
        let dir = temp_state_dir("position_corrupt");
        let repo = Arc::new(FileStateRepository::new(&dir));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(repo.path_for(POSITION_KEY), b"{\"side\":").await.unwrap();

        let store = PositionStore::load(repo.clone()).await.unwrap();
        assert!(store.current().await.is_none());
        assert!(!repo.path_for(POSITION_KEY).exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
