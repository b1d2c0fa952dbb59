//! Directory-walk adapter: a [`WatchSource`] for hosts without a watch
//! daemon. Every query is answered with a full snapshot of the tree
//! (`is_fresh_instance` is always true), so incremental work falls back to
//! the crawler's snapshot merge.

use ignore::WalkBuilder;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use super::{FileChange, FileQuery, QueryResponse, WatchSource, WatchedRoot};
use crate::index::ClockSpec;

pub struct FsWalkSource {
    clock_serial: AtomicU64,
}

impl FsWalkSource {
    pub fn new() -> Self {
        Self {
            clock_serial: AtomicU64::new(0),
        }
    }
}

impl Default for FsWalkSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchSource for FsWalkSource {
    fn watch_project(&mut self, root: &Path) -> anyhow::Result<WatchedRoot> {
        Ok(WatchedRoot {
            watch_root: root.to_path_buf(),
            relative_path: None,
        })
    }

    fn query(&self, watch_root: &Path, query: &FileQuery) -> anyhow::Result<QueryResponse> {
        let suffixes = query.expression.suffixes();
        let dirnames = query.expression.dirnames();

        let mut walker = WalkBuilder::new(watch_root);
        walker
            .hidden(!query.include_dotfiles)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .follow_links(false);

        let mut files = Vec::new();
        for entry in walker.build() {
            let entry = entry?;
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }

            let Ok(rel) = entry.path().strip_prefix(watch_root) else {
                continue;
            };
            if !dirnames.is_empty() && !dirnames.iter().any(|dir| rel.starts_with(dir)) {
                continue;
            }
            if !suffixes.is_empty() {
                let ext = rel
                    .extension()
                    .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
                match ext {
                    Some(ext) if suffixes.contains(&ext) => {}
                    _ => continue,
                }
            }

            let metadata = entry.metadata()?;
            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_millis() as i64)
                .unwrap_or(0);

            files.push(FileChange {
                name: rel.to_string_lossy().replace('\\', "/"),
                exists: true,
                mtime_ms,
                size: metadata.len(),
                sha1hex: None,
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        let serial = self.clock_serial.fetch_add(1, Ordering::Relaxed);
        Ok(QueryResponse {
            clock: ClockSpec::Local(format!("c:fswalk:{serial}")),
            is_fresh_instance: true,
            files,
        })
    }
}
