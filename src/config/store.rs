use arc_swap::ArcSwap;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use super::{AppConfig, DeviceConfig, NegotiationConfig, StreamerConfig};
use crate::error::{AppError, Result};

const SECTION_STREAM: &str = "stream";
const SECTION_DEVICE: &str = "device";
const SECTION_NEGOTIATION: &str = "negotiation";

/// Configuration store backed by SQLite
///
/// Each top-level section of [`AppConfig`] is stored as one JSON row so that,
/// for example, changing the device orientation never rewrites the streamer
/// parameters. Reads go through an `ArcSwap` snapshot and never touch the database.
#[derive(Clone)]
pub struct ConfigStore {
    pool: Pool<Sqlite>,
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// Section that changed ("stream", "device" or "negotiation")
    pub key: String,
}

impl ConfigStore {
    /// Open (or create) the store at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        // Single writer on a small device; one spare connection for reads
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&db_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let config = AppConfig {
            stream: Self::load_section::<StreamerConfig>(&pool, SECTION_STREAM).await?,
            device: Self::load_section::<DeviceConfig>(&pool, SECTION_DEVICE).await?,
            negotiation: Self::load_section::<NegotiationConfig>(&pool, SECTION_NEGOTIATION)
                .await?,
        };

        let (change_tx, _) = broadcast::channel(16);

        Ok(Self {
            pool,
            cache: Arc::new(ArcSwap::from_pointee(config)),
            change_tx,
        })
    }

    /// Load one section, writing its default when the row does not exist yet
    async fn load_section<T>(pool: &Pool<Sqlite>, key: &str) -> Result<T>
    where
        T: Default + Serialize + DeserializeOwned,
    {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(pool)
            .await?;

        match row {
            Some((json,)) => serde_json::from_str(&json)
                .map_err(|e| AppError::Config(format!("Invalid '{}' section: {}", key, e))),
            None => {
                debug!("Config section '{}' missing, writing defaults", key);
                let value = T::default();
                Self::save_section(pool, key, &value).await?;
                Ok(value)
            }
        }
    }

    async fn save_section<T: Serialize>(pool: &Pool<Sqlite>, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO config (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
        )
        .bind(key)
        .bind(&json)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Current configuration snapshot (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Current streamer parameters (lock-free)
    pub fn streamer(&self) -> StreamerConfig {
        self.cache.load().stream.clone()
    }

    /// Replace the whole configuration
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        let current = self.cache.load_full();
        self.persist(&current, &config).await?;
        self.cache.store(Arc::new(config));
        Ok(())
    }

    /// Read-modify-write; last writer wins
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let current = self.cache.load_full();
        let mut config = (*current).clone();
        f(&mut config);

        self.persist(&current, &config).await?;
        self.cache.store(Arc::new(config));
        Ok(())
    }

    /// Write the sections that differ between `old` and `new`, then notify
    async fn persist(&self, old: &AppConfig, new: &AppConfig) -> Result<()> {
        let mut changed = Vec::new();

        if serde_json::to_value(&old.stream)? != serde_json::to_value(&new.stream)? {
            Self::save_section(&self.pool, SECTION_STREAM, &new.stream).await?;
            changed.push(SECTION_STREAM);
        }
        if serde_json::to_value(&old.device)? != serde_json::to_value(&new.device)? {
            Self::save_section(&self.pool, SECTION_DEVICE, &new.device).await?;
            changed.push(SECTION_DEVICE);
        }
        if serde_json::to_value(&old.negotiation)? != serde_json::to_value(&new.negotiation)? {
            Self::save_section(&self.pool, SECTION_NEGOTIATION, &new.negotiation).await?;
            changed.push(SECTION_NEGOTIATION);
        }

        for key in changed {
            debug!("Config section '{}' updated", key);
            let _ = self.change_tx.send(ConfigChange {
                key: key.to_string(),
            });
        }

        Ok(())
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_store() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let store = ConfigStore::new(&db_path).await.unwrap();

        let config = store.get();
        assert_eq!(config.stream.signaling_port, 8001);
        assert!(!config.device.cam_flip);

        let mut changes = store.subscribe();
        store
            .update(|c| {
                c.stream.codec = "h265".to_string();
                c.stream.port = 9000;
            })
            .await
            .unwrap();
        assert_eq!(changes.recv().await.unwrap().key, "stream");

        store.update(|c| c.device.cam_mirror = true).await.unwrap();
        assert_eq!(changes.recv().await.unwrap().key, "device");
        assert!(changes.try_recv().is_err());

        // A fresh store over the same file sees the persisted values
        let store2 = ConfigStore::new(&db_path).await.unwrap();
        let streamer = store2.streamer();
        assert_eq!(streamer.codec, "h265");
        assert_eq!(streamer.port, 9000);
        assert!(store2.get().device.cam_mirror);
    }

    #[tokio::test]
    async fn test_unchanged_update_is_silent() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("quiet.db")).await.unwrap();
        let mut changes = store.subscribe();

        store.update(|_| {}).await.unwrap();
        assert!(changes.try_recv().is_err());
    }
}
