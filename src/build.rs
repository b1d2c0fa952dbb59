//! The builder: one cache-load → crawl → process → persist cycle per
//! instance. `build()` is memoized; a second call observes the same resolved
//! index without touching the filesystem again.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use tracing::debug;

use crate::cache;
use crate::config::{self, HasteConfig};
use crate::crawl;
use crate::digest;
use crate::error::{HasteError, Result};
use crate::index::HasteIndex;
use crate::paths;
use crate::reconcile;
use crate::watch::WatchSource;

/// Delivered to subscribers registered via [`HasteMap::events`].
#[derive(Debug, Clone)]
pub enum BuildEvent {
    Ready {
        index: Arc<HasteIndex>,
        stats: BuildStats,
    },
    Error {
        kind: String,
        detail: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub tracked_files: usize,
    pub changed_files: usize,
    pub removed_files: usize,
    pub duplicate_ids: usize,
}

pub struct HasteMap {
    config: HasteConfig,
    source: Box<dyn WatchSource>,
    cache_path: PathBuf,
    cancelled: Arc<AtomicBool>,
    subscribers: Vec<mpsc::Sender<BuildEvent>>,
    built: Option<Arc<HasteIndex>>,
}

impl std::fmt::Debug for HasteMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HasteMap")
            .field("config", &self.config)
            .field("cache_path", &self.cache_path)
            .field("cancelled", &self.cancelled)
            .field("subscribers", &self.subscribers.len())
            .field("built", &self.built)
            .finish()
    }
}

impl HasteMap {
    pub fn new(mut config: HasteConfig, source: Box<dyn WatchSource>) -> Result<Self> {
        config.roots = config::dedup_roots(&config.roots);
        for root in &config.roots {
            if !root.starts_with(&config.root_dir) {
                return Err(HasteError::InvalidConfiguration(format!(
                    "root {} is not under {}",
                    root.display(),
                    config.root_dir.display()
                )));
            }
        }

        let cache_path = cache_path_for(&config);
        Ok(Self {
            config,
            source,
            cache_path,
            cancelled: Arc::new(AtomicBool::new(false)),
            subscribers: Vec::new(),
            built: None,
        })
    }

    /// Where this builder persists its index.
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Subscribe to build events. Register before calling [`HasteMap::build`].
    pub fn events(&mut self) -> mpsc::Receiver<BuildEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Setting the returned flag aborts an in-progress build at its next
    /// checkpoint; nothing is persisted for a cancelled build.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Build (or return the already-built) index. Only a successful index is
    /// memoized; a failed build surfaces its error and may be retried.
    pub fn build(&mut self) -> Result<Arc<HasteIndex>> {
        if let Some(index) = &self.built {
            return Ok(index.clone());
        }

        match self.build_once() {
            Ok((index, stats)) => {
                debug!(
                    tracked = stats.tracked_files,
                    changed = stats.changed_files,
                    removed = stats.removed_files,
                    duplicates = stats.duplicate_ids,
                    "index ready"
                );
                self.built = Some(index.clone());
                self.emit(&BuildEvent::Ready {
                    index: index.clone(),
                    stats,
                });
                Ok(index)
            }
            Err(err) => {
                self.emit(&BuildEvent::Error {
                    kind: err.kind().to_string(),
                    detail: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn build_once(&mut self) -> Result<(Arc<HasteIndex>, BuildStats)> {
        let mut index = if self.config.reset_cache {
            HasteIndex::new()
        } else {
            cache::load(&self.cache_path)
        };

        self.check_cancelled()?;
        let delta = crawl::crawl(&self.config, self.source.as_mut(), &mut index)?;
        self.check_cancelled()?;

        let changed_count = delta.changed.as_ref().map(|changed| changed.len());
        let work_needed = changed_count.is_none_or(|n| n > 0) || !delta.removed.is_empty();

        if work_needed {
            reconcile::reconcile(
                &self.config,
                &mut index,
                delta.changed,
                &delta.removed,
                &self.cancelled,
            )?;
            self.check_cancelled()?;
            self.persist(&index)?;
        }

        let stats = BuildStats {
            tracked_files: index.files.len(),
            changed_files: changed_count.unwrap_or(index.files.len()),
            removed_files: delta.removed.len(),
            duplicate_ids: index.duplicates.len(),
        };
        Ok((Arc::new(index), stats))
    }

    /// Only visited entries are authoritative; anything the build did not
    /// reach is left out of the persisted index.
    fn persist(&self, index: &HasteIndex) -> Result<()> {
        let mut persisted = index.clone();
        persisted.files.retain(|_, meta| meta.visited);
        cache::store(&self.cache_path, &persisted)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            Err(HasteError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&mut self, event: &BuildEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// The cache name encodes the builder id, the root directory and every
/// option that changes what the index contains, so incompatible
/// configurations never share a file.
fn cache_path_for(config: &HasteConfig) -> PathBuf {
    let root_hash = digest::sha1_hex(config.root_dir.to_string_lossy().as_bytes());
    let cache_id = format!("haste-map-{}-{}", config.id, &root_hash[..32]);

    let rel_roots: Vec<String> = config
        .roots
        .iter()
        .map(|root| paths::relative(&config.root_dir, root))
        .collect();
    let extra = vec![
        env!("CARGO_PKG_VERSION").to_string(),
        config.id.clone(),
        rel_roots.join(":"),
        config.extensions.join(","),
        config.platforms.join(","),
        config.compute_sha1.to_string(),
        config.compute_dependencies.to_string(),
        config.retain_all_files.to_string(),
    ];
    cache::cache_file_path(&config.cache_directory, &cache_id, &extra)
}
