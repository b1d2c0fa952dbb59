//! The reconciler: applies crawl deltas and worker results to the module
//! map and the duplicates index. All mutations happen on the calling thread
//! (single logical writer); worker completion order must not affect the
//! resulting `(files, map, duplicates)`, only the order of collision
//! warnings.

use std::ops::ControlFlow;
use std::path::{Path, MAIN_SEPARATOR};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::config::HasteConfig;
use crate::error::{HasteError, Result};
use crate::index::{FileMap, HasteIndex, ModuleEntry, GENERIC_PLATFORM};
use crate::pool;
use crate::worker::{self, WorkerMetadata};

struct Task {
    rel: String,
    crawl_sha1: Option<String>,
}

/// Apply one crawl's outcome to the index. `changed == None` means the delta
/// could not be determined; every tracked file becomes a candidate and the
/// module map is rebuilt from scratch. Any removal also forces the rebuild,
/// since a removed file may have been the sole claimant of a name.
pub(crate) fn reconcile(
    config: &HasteConfig,
    index: &mut HasteIndex,
    changed: Option<FileMap>,
    removed: &FileMap,
    cancelled: &AtomicBool,
) -> Result<()> {
    let full_pass = changed.is_none() || !removed.is_empty();
    if full_pass {
        index.map.clear();
        index.mocks.clear();
    }

    for (rel, meta) in removed {
        recover_duplicates(index, rel, &meta.haste_id);
    }

    let candidates: Vec<String> = if full_pass {
        index.files.keys().cloned().collect()
    } else {
        changed.map(FileMap::into_keys).into_iter().flatten().collect()
    };

    let mut tasks: Vec<Task> = Vec::new();
    for rel in candidates {
        let Some(meta) = index.files.get(&rel) else {
            continue;
        };

        let abs = config.root_dir.join(&rel);
        if !config.retain_all_files && in_node_modules(&abs) {
            // Tracked so consumers can stat it, but never parsed.
            if let Some(meta) = index.files.get_mut(&rel) {
                meta.visited = true;
            }
            continue;
        }

        if meta.visited {
            // Already-processed metadata re-announces itself without a
            // worker round trip.
            if !meta.haste_id.is_empty() {
                let id = meta.haste_id.clone();
                let entry = ModuleEntry::new(rel.clone(), worker::kind_for_path(&rel));
                set_module(index, &id, entry);
            }
            continue;
        }

        tasks.push(Task {
            crawl_sha1: meta.sha1.clone(),
            rel,
        });
    }

    let concurrency = if config.max_workers == 0 {
        pool::default_concurrency()
    } else {
        config.max_workers
    };

    let mut failure: Option<HasteError> = None;
    pool::run_tasks(
        tasks,
        concurrency,
        config.force_in_band,
        |task| worker::process_file(config, &task.rel, task.crawl_sha1.clone()),
        |task, result| {
            if cancelled.load(Ordering::Relaxed) {
                failure.get_or_insert(HasteError::Cancelled);
                return ControlFlow::Break(());
            }
            match result {
                Ok(meta) => {
                    commit_worker_result(index, &task.rel, meta);
                    ControlFlow::Continue(())
                }
                Err(err) if err.is_recoverable_read() => {
                    warn!("dropping {}: {err}", task.rel);
                    index.files.remove(&task.rel);
                    ControlFlow::Continue(())
                }
                Err(err) => {
                    failure = Some(err);
                    ControlFlow::Break(())
                }
            }
        },
    );

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn in_node_modules(abs: &Path) -> bool {
    let fragment = format!("{sep}node_modules{sep}", sep = MAIN_SEPARATOR);
    abs.to_string_lossy().contains(&fragment)
}

/// Fold one worker result into the index.
pub(crate) fn commit_worker_result(index: &mut HasteIndex, rel: &str, meta: WorkerMetadata) {
    let named = match index.files.get_mut(rel) {
        Some(file) => {
            file.visited = true;
            file.dependencies = meta.dependencies.unwrap_or_default();
            if let Some(sha1) = meta.sha1 {
                file.sha1 = Some(sha1);
            }
            match (meta.id, meta.module) {
                (Some(id), Some(module)) => {
                    file.haste_id = id.clone();
                    Some((id, module))
                }
                _ => None,
            }
        }
        None => None,
    };

    if let Some((id, module)) = named {
        set_module(index, &id, module);
    }
}

/// Claim `id` for `entry`, demoting to the duplicates index on collision.
/// Duplicate-entry maps are rewritten copy-on-write per id so a consumer
/// holding a previous snapshot never observes a half-updated entry.
pub(crate) fn set_module(index: &mut HasteIndex, id: &str, entry: ModuleEntry) {
    let platform = GENERIC_PLATFORM;
    let existing = index.map.get(id).and_then(|m| m.get(platform)).cloned();

    match existing {
        Some(existing) if existing.relative_path != entry.relative_path => {
            warn!(
                "module naming collision: {id} is claimed by both {} and {}",
                existing.relative_path, entry.relative_path
            );

            if let Some(module_map) = index.map.get_mut(id) {
                module_map.remove(platform);
                if module_map.is_empty() {
                    index.map.remove(id);
                }
            }

            let mut dups_by_platform = index.duplicates.get(id).cloned().unwrap_or_default();
            let mut dups = dups_by_platform.get(platform).cloned().unwrap_or_default();
            dups.insert(existing.relative_path, existing.kind);
            dups.insert(entry.relative_path, entry.kind);
            dups_by_platform.insert(platform.to_string(), dups);
            index.duplicates.insert(id.to_string(), dups_by_platform);
        }
        Some(_) => {
            // Same file; refresh the entry in place.
            if let Some(module_map) = index.map.get_mut(id) {
                module_map.insert(platform.to_string(), entry);
            }
        }
        None => {
            // A name already under contest stays contested: later claimants
            // join the duplicates rather than repopulating the map.
            let contested = index
                .duplicates
                .get(id)
                .is_some_and(|by_platform| by_platform.contains_key(platform));
            if contested {
                let mut dups_by_platform =
                    index.duplicates.get(id).cloned().unwrap_or_default();
                let mut dups = dups_by_platform.get(platform).cloned().unwrap_or_default();
                dups.insert(entry.relative_path, entry.kind);
                dups_by_platform.insert(platform.to_string(), dups);
                index.duplicates.insert(id.to_string(), dups_by_platform);
                return;
            }
            index
                .map
                .entry(id.to_string())
                .or_default()
                .insert(platform.to_string(), entry);
        }
    }
}

/// A colliding file went away: shrink its duplicates entry and, when exactly
/// one contender survives, promote it back into the module map. Tracking
/// every contender (rather than a count) is what makes this promotion
/// possible.
pub(crate) fn recover_duplicates(index: &mut HasteIndex, removed_rel: &str, module_name: &str) {
    let platform = GENERIC_PLATFORM;
    let Some(dups_by_platform) = index.duplicates.get(module_name) else {
        return;
    };
    let Some(dups) = dups_by_platform.get(platform) else {
        return;
    };

    let mut dups_by_platform = dups_by_platform.clone();
    let mut dups = dups.clone();
    dups.remove(removed_rel);

    if dups.len() != 1 {
        dups_by_platform.insert(platform.to_string(), dups);
        index
            .duplicates
            .insert(module_name.to_string(), dups_by_platform);
        return;
    }

    if let Some((last_path, last_kind)) = dups.iter().next() {
        index
            .map
            .entry(module_name.to_string())
            .or_default()
            .insert(
                platform.to_string(),
                ModuleEntry::new(last_path.clone(), *last_kind),
            );
    }
    dups_by_platform.remove(platform);
    if dups_by_platform.is_empty() {
        index.duplicates.remove(module_name);
    } else {
        index
            .duplicates
            .insert(module_name.to_string(), dups_by_platform);
    }
}
