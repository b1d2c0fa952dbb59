//! The crawler: asks the watch source for the delta since the persisted
//! clocks and merges it into the previous file map. A fresh-instance reply
//! turns the merge into a snapshot diff; otherwise the previous map is
//! carried forward and only reported paths are touched.

use std::path::PathBuf;
use std::thread;
use tracing::debug;

use crate::config::HasteConfig;
use crate::digest;
use crate::error::{HasteError, Result};
use crate::index::{ClockSpec, FileMap, FileMetaData, HasteIndex};
use crate::paths;
use crate::watch::{
    collect_watch_roots, extension_expression, extension_globs, Expr, FileQuery, QueryField,
    QueryResponse, WatchSource,
};

/// What a crawl produced beyond the updated `files`/`clocks` in the index.
/// `changed` is `None` when the delta could not be determined; consumers then
/// treat every tracked file as a candidate.
#[derive(Debug)]
pub(crate) struct CrawlDelta {
    pub changed: Option<FileMap>,
    pub removed: FileMap,
    pub is_fresh: bool,
}

struct RootQuery {
    watch_root: PathBuf,
    rel_root: String,
    query: FileQuery,
}

pub(crate) fn crawl(
    config: &HasteConfig,
    source: &mut dyn WatchSource,
    index: &mut HasteIndex,
) -> Result<CrawlDelta> {
    let watch_roots =
        collect_watch_roots(source, &config.roots).map_err(HasteError::CrawlFailed)?;

    let suffix_set = source.supports_suffix_set();
    let sha1_field = config.compute_sha1 && source.supports_content_sha1();

    let mut planned = Vec::with_capacity(watch_roots.len());
    for (watch_root, rel_paths) in &watch_roots {
        let rel_root = paths::relative(&config.root_dir, watch_root);
        let since = index.clocks.get(&rel_root).cloned();

        let mut fields = vec![
            QueryField::Name,
            QueryField::Exists,
            QueryField::MtimeMs,
            QueryField::Size,
        ];
        if sha1_field {
            fields.push(QueryField::ContentSha1Hex);
        }

        let mut expression = extension_expression(&config.extensions, suffix_set);
        if !rel_paths.is_empty() {
            let dirs = rel_paths
                .iter()
                .map(|rel| Expr::Dirname(rel.to_string_lossy().replace('\\', "/")))
                .collect();
            expression = Expr::AllOf(vec![expression, Expr::AnyOf(dirs)]);
        }

        planned.push(RootQuery {
            watch_root: watch_root.clone(),
            rel_root,
            query: FileQuery {
                include_dotfiles: since.is_none(),
                since,
                expression,
                fields,
                globs: extension_globs(&config.extensions, rel_paths),
            },
        });
    }

    let responses = execute_queries(&*source, &planned);
    let mut results = Vec::with_capacity(planned.len());
    for outcome in responses {
        results.push(outcome.map_err(HasteError::CrawlFailed)?);
    }

    // An SCM-based query never signals a history reset for its root.
    let is_fresh = planned.iter().zip(&results).any(|(rq, response)| {
        let scm_query = rq.query.since.as_ref().is_some_and(ClockSpec::is_scm);
        !scm_query && response.is_fresh_instance
    });

    let previous_files = std::mem::take(&mut index.files);
    let (mut files, mut removed) = if is_fresh {
        (FileMap::new(), previous_files.clone())
    } else {
        (previous_files.clone(), FileMap::new())
    };
    let mut changed = FileMap::new();

    for (rq, response) in planned.iter().zip(results) {
        for file in response.files {
            let abs = rq.watch_root.join(paths::normalize_separators(&file.name));
            if config.ignore_pattern.is_match(&abs.to_string_lossy()) {
                continue;
            }
            let rel = paths::relative(&config.root_dir, &abs);

            if !file.exists {
                if previous_files.contains_key(&rel) {
                    files.remove(&rel);
                    if !is_fresh {
                        if let Some(prev) = previous_files.get(&rel) {
                            removed.insert(rel.clone(), prev.clone());
                        }
                    }
                }
                continue;
            }

            let sha1 = file.sha1hex.filter(|s| digest::is_valid_sha1_hex(s));
            let entry = match previous_files.get(&rel) {
                // Same mtime: nothing happened to this file.
                Some(prev) if prev.mtime_ms == file.mtime_ms => prev.clone(),
                // Same content, bumped mtime: keep the metadata, track the
                // new mtime so the next crawl short-circuits on it.
                Some(prev) if sha1.is_some() && prev.sha1 == sha1 => {
                    let mut kept = prev.clone();
                    kept.mtime_ms = file.mtime_ms;
                    kept
                }
                _ => FileMetaData::pristine(file.mtime_ms, file.size, sha1),
            };

            if is_fresh {
                removed.remove(&rel);
            }
            changed.insert(rel.clone(), entry.clone());
            files.insert(rel, entry);
        }

        if let Some(clock) = response.clock.local_clock() {
            index
                .clocks
                .insert(rq.rel_root.clone(), ClockSpec::Local(clock.to_string()));
        }
    }

    debug!(
        tracked = files.len(),
        changed = changed.len(),
        removed = removed.len(),
        is_fresh, "crawl merged"
    );

    index.files = files;
    Ok(CrawlDelta {
        changed: Some(changed),
        removed,
        is_fresh,
    })
}

/// One query per watch root, in parallel when there is more than one.
fn execute_queries(
    source: &dyn WatchSource,
    planned: &[RootQuery],
) -> Vec<anyhow::Result<QueryResponse>> {
    if planned.len() <= 1 {
        return planned
            .iter()
            .map(|rq| source.query(&rq.watch_root, &rq.query))
            .collect();
    }

    thread::scope(|scope| {
        let handles: Vec<_> = planned
            .iter()
            .map(|rq| scope.spawn(move || source.query(&rq.watch_root, &rq.query)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("watch query thread panicked")))
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::{FileChange, WatchedRoot};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    /// Scripted source: each root watches itself whole; queries pop canned
    /// responses in root order and are recorded for inspection.
    struct ScriptedSource {
        responses: Mutex<VecDeque<QueryResponse>>,
        recorded: Mutex<Vec<FileQuery>>,
        fail: bool,
    }

    impl ScriptedSource {
        fn new(responses: Vec<QueryResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                recorded: Mutex::new(Vec::new()),
                fail: false,
            }
        }
    }

    impl WatchSource for ScriptedSource {
        fn watch_project(&mut self, root: &Path) -> anyhow::Result<WatchedRoot> {
            Ok(WatchedRoot {
                watch_root: root.to_path_buf(),
                relative_path: None,
            })
        }

        fn query(&self, _watch_root: &Path, query: &FileQuery) -> anyhow::Result<QueryResponse> {
            if self.fail {
                anyhow::bail!("watch service went away");
            }
            self.recorded.lock().unwrap().push(query.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no scripted response left"))
        }
    }

    fn change(name: &str, mtime_ms: i64) -> FileChange {
        FileChange {
            name: name.to_string(),
            exists: true,
            mtime_ms,
            size: 1,
            sha1hex: None,
        }
    }

    fn gone(name: &str) -> FileChange {
        FileChange {
            name: name.to_string(),
            exists: false,
            mtime_ms: 0,
            size: 0,
            sha1hex: None,
        }
    }

    fn response(fresh: bool, clock: &str, files: Vec<FileChange>) -> QueryResponse {
        QueryResponse {
            clock: ClockSpec::Local(clock.to_string()),
            is_fresh_instance: fresh,
            files,
        }
    }

    fn config() -> HasteConfig {
        let mut config = HasteConfig::new("/project", "crawl-tests");
        config.extensions = vec!["js".into()];
        config
    }

    fn tracked(mtime_ms: i64) -> FileMetaData {
        let mut meta = FileMetaData::pristine(mtime_ms, 1, None);
        meta.visited = true;
        meta
    }

    #[test]
    fn fresh_instance_reports_omitted_files_as_removed() {
        let mut index = HasteIndex::new();
        index.files.insert("a.js".into(), tracked(10));
        index.files.insert("b.js".into(), tracked(10));
        index.files.insert("c.js".into(), tracked(10));

        let mut source = ScriptedSource::new(vec![response(
            true,
            "c:1",
            vec![change("a.js", 10), change("b.js", 10)],
        )]);

        let delta = crawl(&config(), &mut source, &mut index).unwrap();
        assert!(delta.is_fresh);
        assert_eq!(
            delta.removed.keys().collect::<Vec<_>>(),
            vec!["c.js"],
            "omitted file lands in removed"
        );
        assert_eq!(index.files.len(), 2);
        // Unchanged survivors keep their processed metadata.
        assert!(index.files["a.js"].visited);
    }

    #[test]
    fn incremental_merge_keeps_untouched_files() {
        let mut index = HasteIndex::new();
        index.files.insert("a.js".into(), tracked(10));
        index.files.insert("b.js".into(), tracked(10));
        index
            .clocks
            .insert("".into(), ClockSpec::Local("c:0".into()));

        let mut source = ScriptedSource::new(vec![response(
            false,
            "c:1",
            vec![change("b.js", 20), change("new.js", 5)],
        )]);

        let delta = crawl(&config(), &mut source, &mut index).unwrap();
        assert!(!delta.is_fresh);
        assert!(delta.removed.is_empty());

        let changed = delta.changed.unwrap();
        assert_eq!(changed.keys().collect::<Vec<_>>(), vec!["b.js", "new.js"]);
        assert!(!changed["b.js"].visited, "bumped mtime forces reprocessing");
        assert!(!changed["new.js"].visited);
        assert!(index.files["a.js"].visited, "untouched file survives as-is");
        assert_eq!(index.files.len(), 3);
    }

    #[test]
    fn deleted_file_is_removed_from_the_map() {
        let mut index = HasteIndex::new();
        index.files.insert("a.js".into(), tracked(10));
        index
            .clocks
            .insert("".into(), ClockSpec::Local("c:0".into()));

        let mut source = ScriptedSource::new(vec![response(false, "c:1", vec![gone("a.js")])]);

        let delta = crawl(&config(), &mut source, &mut index).unwrap();
        assert!(index.files.is_empty());
        assert_eq!(delta.removed.keys().collect::<Vec<_>>(), vec!["a.js"]);
    }

    #[test]
    fn matching_sha1_refreshes_mtime_without_reprocessing() {
        let digest = "a".repeat(40);
        let mut index = HasteIndex::new();
        let mut meta = tracked(10);
        meta.sha1 = Some(digest.clone());
        meta.haste_id = "Foo".into();
        index.files.insert("a.js".into(), meta);
        index
            .clocks
            .insert("".into(), ClockSpec::Local("c:0".into()));

        let mut source = ScriptedSource::new(vec![response(
            false,
            "c:1",
            vec![FileChange {
                name: "a.js".into(),
                exists: true,
                mtime_ms: 99,
                size: 1,
                sha1hex: Some(digest.clone()),
            }],
        )]);

        crawl(&config(), &mut source, &mut index).unwrap();
        let merged = &index.files["a.js"];
        assert_eq!(merged.mtime_ms, 99);
        assert!(merged.visited, "identical content does not reset metadata");
        assert_eq!(merged.haste_id, "Foo");
    }

    #[test]
    fn invalid_sha1_from_the_service_is_discarded() {
        let mut index = HasteIndex::new();
        let mut source = ScriptedSource::new(vec![response(
            true,
            "c:1",
            vec![FileChange {
                name: "a.js".into(),
                exists: true,
                mtime_ms: 1,
                size: 1,
                sha1hex: Some("NOT-A-DIGEST".into()),
            }],
        )]);

        crawl(&config(), &mut source, &mut index).unwrap();
        assert_eq!(index.files["a.js"].sha1, None);
    }

    #[test]
    fn clocks_update_per_watch_root() {
        let mut index = HasteIndex::new();
        let mut source = ScriptedSource::new(vec![response(true, "c:42", vec![])]);

        crawl(&config(), &mut source, &mut index).unwrap();
        assert_eq!(index.clocks[""], ClockSpec::Local("c:42".into()));
    }

    #[test]
    fn scm_response_clock_persists_its_inner_local_clock() {
        let mut index = HasteIndex::new();
        let mut source = ScriptedSource::new(vec![QueryResponse {
            clock: ClockSpec::Scm {
                mergebase_with: "main".into(),
                mergebase: "abc".into(),
                clock: Some("c:77".into()),
            },
            is_fresh_instance: false,
            files: vec![],
        }]);

        crawl(&config(), &mut source, &mut index).unwrap();
        assert_eq!(index.clocks[""], ClockSpec::Local("c:77".into()));
    }

    #[test]
    fn scm_since_suppresses_the_fresh_instance_signal() {
        let mut index = HasteIndex::new();
        index.files.insert("a.js".into(), tracked(10));
        index.clocks.insert(
            "".into(),
            ClockSpec::Scm {
                mergebase_with: "main".into(),
                mergebase: String::new(),
                clock: None,
            },
        );

        let mut source = ScriptedSource::new(vec![response(true, "c:1", vec![])]);

        let delta = crawl(&config(), &mut source, &mut index).unwrap();
        assert!(!delta.is_fresh);
        assert!(delta.removed.is_empty());
        assert_eq!(index.files.len(), 1);
    }

    #[test]
    fn dotfiles_are_requested_only_without_a_since_clock() {
        let mut index = HasteIndex::new();
        let mut source = ScriptedSource::new(vec![response(true, "c:1", vec![])]);
        crawl(&config(), &mut source, &mut index).unwrap();
        assert!(source.recorded.lock().unwrap()[0].include_dotfiles);

        let mut source = ScriptedSource::new(vec![response(false, "c:2", vec![])]);
        crawl(&config(), &mut source, &mut index).unwrap();
        let recorded = source.recorded.lock().unwrap();
        assert!(!recorded[0].include_dotfiles);
        assert_eq!(
            recorded[0].since,
            Some(ClockSpec::Local("c:1".into())),
            "second crawl queries since the persisted clock"
        );
    }

    #[test]
    fn ignored_paths_never_enter_the_file_map() {
        let mut index = HasteIndex::new();
        let mut source = ScriptedSource::new(vec![response(
            true,
            "c:1",
            vec![change(".git/config.js", 1), change("kept.js", 1)],
        )]);

        crawl(&config(), &mut source, &mut index).unwrap();
        assert_eq!(index.files.keys().collect::<Vec<_>>(), vec!["kept.js"]);
    }

    #[test]
    fn query_failure_fails_the_whole_crawl() {
        let mut index = HasteIndex::new();
        index.files.insert("a.js".into(), tracked(10));
        let mut source = ScriptedSource::new(vec![]);
        source.fail = true;

        let err = crawl(&config(), &mut source, &mut index).unwrap_err();
        assert!(matches!(err, HasteError::CrawlFailed(_)));
    }
}
