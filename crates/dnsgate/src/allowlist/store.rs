use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use arc_swap::ArcSwap;
use sha1::Digest as _;
use tokio::sync::Mutex;

use super::{parse_allowlist, AllowList};

/// Outcome of a reload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStatus {
    /// A new version was published
    Updated { version: u64, entries: usize },
    /// Source content didn't change, the active version is kept
    Unchanged { version: u64 },
    /// Source is unavailable, the last good version keeps being served
    Stale { version: u64 },
    /// Source is unavailable on a cold start, the offline copy was published
    FromCache { version: u64, entries: usize },
}

/// Source of the active allow-list.
///
/// `current` is called for every filtering decision and must be cheap;
/// `reload` is triggered from outside the packet path.
pub trait AllowListStore: Send + Sync + 'static {
    fn current(&self) -> Arc<AllowList>;

    fn reload(&self) -> impl Future<Output = anyhow::Result<ReloadStatus>> + Send;
}

/// Allow-list backed by a list file, with an offline copy of the last good
/// content so that a restart without access to the source still filters
/// with the last known list.
pub struct FileAllowListStore {
    source: PathBuf,
    cache_path: Option<PathBuf>,
    active: ArcSwap<AllowList>,
    /// Checksum of the published content. Also serializes reloads.
    last_checksum: Mutex<Option<[u8; 20]>>,
}

impl FileAllowListStore {
    pub fn new(source: impl Into<PathBuf>, cache_path: Option<PathBuf>) -> Self {
        FileAllowListStore {
            source: source.into(),
            cache_path,
            active: ArcSwap::from_pointee(AllowList::empty()),
            last_checksum: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn publish(&self, entries: Vec<String>) -> Arc<AllowList> {
        let version = self.active.load().version() + 1;
        let list = Arc::new(AllowList::new(entries, version));

        list.single_label_entries().for_each(|entry| {
            tracing::warn!(
                entry,
                version,
                "Allow-list entry is a single label and allows every domain under it"
            );
        });

        self.active.store(list.clone());
        list
    }

    async fn load_cache(&self, last_checksum: &mut Option<[u8; 20]>) -> anyhow::Result<ReloadStatus> {
        let cache_path = self
            .cache_path
            .as_ref()
            .context("no offline copy of the allow-list is configured")?;
        let data = tokio::fs::read_to_string(cache_path)
            .await
            .with_context(|| format!("error while reading the offline allow-list {:?}", cache_path))?;

        let list = self.publish(parse_allowlist(&data));
        *last_checksum = Some(sha1::Sha1::digest(data.as_bytes()).into());

        Ok(ReloadStatus::FromCache {
            version: list.version(),
            entries: list.len(),
        })
    }

    async fn write_cache(&self, data: &str) -> anyhow::Result<()> {
        let Some(cache_path) = self.cache_path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = cache_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("error while creating the cache directory {:?}", parent))?;
        }

        // Write next to the target and rename so that a crash never leaves a torn copy
        let tmp_path = cache_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, data)
            .await
            .with_context(|| format!("error while writing {:?}", tmp_path))?;
        tokio::fs::rename(&tmp_path, cache_path)
            .await
            .with_context(|| format!("error while replacing {:?}", cache_path))
    }
}

impl AllowListStore for FileAllowListStore {
    fn current(&self) -> Arc<AllowList> {
        self.active.load_full()
    }

    async fn reload(&self) -> anyhow::Result<ReloadStatus> {
        let mut last_checksum = self.last_checksum.lock().await;

        let data = match tokio::fs::read_to_string(&self.source).await {
            Ok(data) => data,
            Err(e) => {
                let version = self.active.load().version();
                if version > 0 {
                    tracing::warn!(path = ?self.source, version, "Allow-list is unavailable, serving the last loaded version: {}", e);
                    return Ok(ReloadStatus::Stale { version });
                }

                tracing::warn!(path = ?self.source, "Allow-list is unavailable, falling back to the offline copy: {}", e);
                return self
                    .load_cache(&mut last_checksum)
                    .await
                    .with_context(|| format!("error while opening the allow-list {:?}: {}", self.source, e));
            }
        };

        let checksum: [u8; 20] = sha1::Sha1::digest(data.as_bytes()).into();
        if *last_checksum == Some(checksum) {
            let version = self.active.load().version();
            tracing::debug!(path = ?self.source, version, "Checksums matched, no need to update the allow-list");
            return Ok(ReloadStatus::Unchanged { version });
        }

        let list = self.publish(parse_allowlist(&data));
        *last_checksum = Some(checksum);

        if let Err(e) = self.write_cache(&data).await {
            tracing::warn!("Failed to store the offline copy of the allow-list: {:#}", e);
        }

        Ok(ReloadStatus::Updated {
            version: list.version(),
            entries: list.len(),
        })
    }
}

/// Allow-list held in memory only, replaced programmatically.
pub struct InMemoryAllowListStore {
    active: ArcSwap<AllowList>,
}

impl InMemoryAllowListStore {
    /// Publishes `entries` as version 1.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        InMemoryAllowListStore {
            active: ArcSwap::from_pointee(AllowList::new(entries, 1)),
        }
    }

    /// Publishes a new version and returns its number.
    pub fn replace<I, S>(&self, entries: I) -> u64
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries: Vec<String> = entries.into_iter().map(|entry| entry.as_ref().to_owned()).collect();
        let previous = self
            .active
            .rcu(|current| Arc::new(AllowList::new(&entries, current.version() + 1)));
        previous.version() + 1
    }
}

impl AllowListStore for InMemoryAllowListStore {
    fn current(&self) -> Arc<AllowList> {
        self.active.load_full()
    }

    async fn reload(&self) -> anyhow::Result<ReloadStatus> {
        // Nothing external to fetch from
        Ok(ReloadStatus::Unchanged {
            version: self.active.load().version(),
        })
    }
}
