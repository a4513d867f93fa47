use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{CacheTier, TierFuture};

/// Durable file-per-entry tier; survives process restart.
///
/// Each entry lives in `<dir>/<md5 of key>.json` holding the payload and
/// its absolute expiry. Stale files are deleted by the read that finds
/// them; nothing scans the directory in the background.
pub struct DiskTier {
    dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    /// Unix seconds.
    expires_at: u64,
    value: String,
}

impl DiskTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{:x}.json", md5::compute(key)))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

impl CacheTier for DiskTier {
    fn name(&self) -> &'static str {
        "l3"
    }

    fn get<'a>(&'a self, key: &'a str) -> TierFuture<'a, Option<String>> {
        Box::pin(async move {
            let path = self.entry_path(key);
            let raw = tokio::fs::read_to_string(&path).await.ok()?;

            let entry: DiskEntry = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(_) => {
                    // A corrupt entry behaves like a stale one.
                    let _ = tokio::fs::remove_file(&path).await;
                    return None;
                }
            };

            if entry.expires_at <= unix_now() {
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
            Some(entry.value)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> TierFuture<'a, ()> {
        Box::pin(async move {
            if let Err(error) = tokio::fs::create_dir_all(&self.dir).await {
                warn!(dir = %self.dir.display(), "cannot create cache dir: {error}");
                return;
            }

            let entry = DiskEntry {
                expires_at: unix_now().saturating_add(ttl.as_secs().max(1)),
                value,
            };
            let raw = match serde_json::to_string(&entry) {
                Ok(raw) => raw,
                Err(_) => return,
            };

            if let Err(error) = tokio::fs::write(self.entry_path(key), raw).await {
                warn!(key, "disk cache write failed: {error}");
            }
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> TierFuture<'a, ()> {
        Box::pin(async move {
            let _ = tokio::fs::remove_file(self.entry_path(key)).await;
        })
    }

    fn entry_count<'a>(&'a self) -> TierFuture<'a, usize> {
        Box::pin(async move {
            let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
                return 0;
            };
            let mut count = 0;
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.path().extension().is_some_and(|ext| ext == "json") {
                    count += 1;
                }
            }
            count
        })
    }

    fn clear<'a>(&'a self) -> TierFuture<'a, ()> {
        Box::pin(async move {
            let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
                return;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.path().extension().is_some_and(|ext| ext == "json") {
                    let _ = tokio::fs::remove_file(entry.path()).await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn survives_reopening_the_same_directory() {
        let dir = tempfile::tempdir().expect("tempdir");

        {
            let tier = DiskTier::new(dir.path());
            tier.set("k", String::from("v"), Duration::from_secs(60)).await;
        }

        let reopened = DiskTier::new(dir.path());
        assert_eq!(reopened.get("k").await.as_deref(), Some("v"));
        assert_eq!(reopened.entry_count().await, 1);
    }

    #[tokio::test]
    async fn stale_entry_file_is_deleted_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tier = DiskTier::new(dir.path());

        tier.set("k", String::from("v"), Duration::from_secs(1)).await;

        // Rewrite the entry with an expiry in the past instead of sleeping.
        let path = tier.entry_path("k");
        let forged = serde_json::to_string(&DiskEntry {
            expires_at: 1,
            value: String::from("v"),
        })
        .expect("serializes");
        tokio::fs::write(&path, forged).await.expect("write");

        assert!(tier.get("k").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn corrupt_entry_behaves_like_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tier = DiskTier::new(dir.path());

        tier.set("k", String::from("v"), Duration::from_secs(60)).await;
        tokio::fs::write(tier.entry_path("k"), "not json")
            .await
            .expect("write");

        assert!(tier.get("k").await.is_none());
        assert_eq!(tier.entry_count().await, 0);
    }

    #[tokio::test]
    async fn clear_removes_every_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tier = DiskTier::new(dir.path());

        tier.set("a", String::from("1"), Duration::from_secs(60)).await;
        tier.set("b", String::from("2"), Duration::from_secs(60)).await;
        assert_eq!(tier.entry_count().await, 2);

        tier.clear().await;
        assert_eq!(tier.entry_count().await, 0);
    }
}
