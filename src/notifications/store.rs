//! File-backed set of push subscriptions.
//!
//! The JSON file is the source of truth: every operation reads it, and every
//! mutation rewrites it whole. All read-modify-write cycles go through one
//! mutex owned by the store so concurrent requests and the notifier's prune
//! never lose each other's updates.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::models::Subscription;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read subscription store {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write subscription store {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Subscription store {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize subscriptions: {0}")]
    Serialize(#[source] serde_json::Error),
}

pub struct SubscriptionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SubscriptionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds `subscription` unless an identical entry is already stored.
    ///
    /// Unparseable store content is an error here; it is never replaced.
    pub async fn add(&self, subscription: Subscription) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;

        let mut subscriptions = match self.read_text().await? {
            Some(text) => self.parse(&text)?,
            None => Vec::new(),
        };
        if subscriptions.contains(&subscription) {
            debug!(endpoint = %subscription.endpoint, "Subscription already stored.");
            return Ok(false);
        }

        info!(endpoint = %subscription.endpoint, "Adding push subscription.");
        subscriptions.push(subscription);
        self.persist(&subscriptions).await?;
        Ok(true)
    }

    /// Removes every entry whose endpoint is `endpoint`. Returns false, without
    /// writing, when nothing matched.
    pub async fn remove(&self, endpoint: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;

        let Some(text) = self.read_text().await? else {
            return Ok(false);
        };
        let mut subscriptions = match self.parse(&text) {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                // Nothing can match, and the file is left as it is.
                warn!(
                    error = %e,
                    "Subscription store is unreadable; treating it as empty for removal."
                );
                Vec::new()
            }
        };

        let original_count = subscriptions.len();
        subscriptions.retain(|s| s.endpoint != endpoint);
        if subscriptions.len() == original_count {
            return Ok(false);
        }

        info!(
            endpoint = %endpoint,
            removed = original_count - subscriptions.len(),
            "Removed push subscription."
        );
        self.persist(&subscriptions).await?;
        Ok(true)
    }

    /// The store file's text exactly as it is on disk. A missing file reads
    /// as the empty string.
    pub async fn list_raw(&self) -> Result<String, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_text().await?.unwrap_or_default())
    }

    /// True when the file is missing or has zero length. Cheap enough to call
    /// before every broadcast.
    pub async fn is_absent_or_empty(&self) -> bool {
        match fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        }
    }

    /// Every stored subscription. Missing or blank files are empty sets.
    pub async fn load(&self) -> Result<Vec<Subscription>, StoreError> {
        let _guard = self.lock.lock().await;
        match self.read_text().await? {
            Some(text) => self.parse(&text),
            None => Ok(Vec::new()),
        }
    }

    /// Drops the given subscriptions from the current file contents and
    /// returns how many entries were removed. Entries added since the caller
    /// loaded its copy are kept.
    pub async fn prune(&self, dead: &[Subscription]) -> Result<usize, StoreError> {
        if dead.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock.lock().await;

        let mut subscriptions = match self.read_text().await? {
            Some(text) => self.parse(&text)?,
            None => return Ok(0),
        };
        let original_count = subscriptions.len();
        subscriptions.retain(|s| !dead.contains(s));
        let removed = original_count - subscriptions.len();
        if removed > 0 {
            self.persist(&subscriptions).await?;
        }
        Ok(removed)
    }

    async fn read_text(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn parse(&self, text: &str) -> Result<Vec<Subscription>, StoreError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(text).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    // Writes a sibling temp file and renames it over the store, so readers
    // and crashes only ever see a complete file.
    async fn persist(&self, subscriptions: &[Subscription]) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(subscriptions).map_err(StoreError::Serialize)?;
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "subscriptions.json".into());
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        fs::write(&tmp_path, contents).await.map_err(write_err)?;
        fs::rename(&tmp_path, &self.path).await.map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::testing::subscription;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> SubscriptionStore {
        SubscriptionStore::new(dir.path().join("subscriptions.json"))
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let sub = subscription("https://push.example.com/a");

        assert!(store.add(sub.clone()).await.unwrap());
        assert!(!store.add(sub.clone()).await.unwrap());

        assert_eq!(store.load().await.unwrap(), vec![sub]);
    }

    #[tokio::test]
    async fn test_add_treats_empty_file_as_empty_set() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "").unwrap();

        assert!(store.add(subscription("https://push.example.com/a")).await.unwrap());
        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rotated_keys_are_a_distinct_entry() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let original = subscription("https://push.example.com/a");
        let mut rotated = original.clone();
        rotated.keys.auth = "rotated-auth".to_string();

        assert!(store.add(original).await.unwrap());
        assert!(store.add(rotated).await.unwrap());
        assert_eq!(store.load().await.unwrap().len(), 2);

        // Removal by endpoint clears both.
        assert!(store.remove("https://push.example.com/a").await.unwrap());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_endpoint_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.add(subscription("https://push.example.com/a")).await.unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        assert!(!store.remove("https://push.example.com/missing").await.unwrap());

        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_remove_on_missing_file_returns_false() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        assert!(!store.remove("https://push.example.com/a").await.unwrap());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_add_and_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{not json").unwrap();

        let result = store.add(subscription("https://push.example.com/a")).await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));

        assert!(!store.remove("https://push.example.com/a").await.unwrap());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn test_list_raw_returns_file_text_verbatim() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.list_raw().await.unwrap(), "");

        std::fs::write(store.path(), "  [ ]  \n").unwrap();
        assert_eq!(store.list_raw().await.unwrap(), "  [ ]  \n");
    }

    #[tokio::test]
    async fn test_prune_keeps_entries_added_after_load() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let dead = subscription("https://push.example.com/dead");
        let live = subscription("https://push.example.com/live");
        store.add(dead.clone()).await.unwrap();
        store.add(live.clone()).await.unwrap();

        let late = subscription("https://push.example.com/late");
        store.add(late.clone()).await.unwrap();

        assert_eq!(store.prune(&[dead]).await.unwrap(), 1);
        assert_eq!(store.load().await.unwrap(), vec![live, late]);
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_not_lost() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add(subscription(&format!("https://push.example.com/{i}")))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(store.load().await.unwrap().len(), 20);
        assert!(!dir.path().join("subscriptions.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_unknown_fields_survive_a_rewrite() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let sub: Subscription = serde_json::from_str(concat!(
            r#"{"endpoint":"https://push.example.com/a","expirationTime":null,"#,
            r#""keys":{"p256dh":"pk","auth":"ak","aes128gcm":"x"}}"#
        ))
        .unwrap();

        store.add(sub.clone()).await.unwrap();
        store.add(subscription("https://push.example.com/b")).await.unwrap();

        let raw = store.list_raw().await.unwrap();
        assert!(raw.contains("expirationTime"));
        assert!(raw.contains("aes128gcm"));

        let reloaded = store.load().await.unwrap();
        assert_eq!(reloaded[0], sub);
        assert_eq!(reloaded[0].keys.extra["aes128gcm"], "x");
    }
}
