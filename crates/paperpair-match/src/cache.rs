//! Flat on-disk cache for model responses, keyed by a hash of the prompt
//! plus generation options. Entries expire by age; expired files are
//! deleted on read.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry<T> {
    stored_at: u64, // Unix timestamp secs
    value: T,
}

fn key_to_path(dir: &Path, key: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let hash = hasher.finish();
    dir.join(format!("{hash:016x}.json"))
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl ResponseCache {
    /// Cache rooted at the platform cache dir under `paperpair/<namespace>`.
    pub fn new(namespace: &str, ttl: Duration) -> Self {
        let dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("paperpair")
            .join(namespace);
        let _ = std::fs::create_dir_all(&dir);
        Self { dir, ttl }
    }

    /// Cache rooted at an explicit directory (tests, alternate layouts).
    pub fn at(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        let dir = dir.into();
        let _ = std::fs::create_dir_all(&dir);
        Self { dir, ttl }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = key_to_path(&self.dir, key);
        let data = tokio::fs::read(&path).await.ok()?;
        let entry: CacheEntry<T> = serde_json::from_slice(&data).ok()?;
        if now_secs().saturating_sub(entry.stored_at) > self.ttl.as_secs() {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        Some(entry.value)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let path = key_to_path(&self.dir, key);
        let entry = CacheEntry {
            stored_at: now_secs(),
            value,
        };
        if let Ok(data) = serde_json::to_vec(&entry) {
            let _ = tokio::fs::write(&path, data).await;
        }
    }

    /// Remove every entry. Returns how many files were deleted.
    pub async fn clear(&self) -> usize {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return 0;
        };
        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().is_some_and(|ext| ext == "json")
                && tokio::fs::remove_file(entry.path()).await.is_ok()
            {
                removed += 1;
            }
        }
        removed
    }
}

/// Cache key for one generation: the prompt and every option that affects
/// the output.
pub fn request_key(model: &str, prompt: &str, temperature: f64, max_tokens: u32) -> String {
    format!("{model}\u{1}{temperature}\u{1}{max_tokens}\u{1}{prompt}")
}
