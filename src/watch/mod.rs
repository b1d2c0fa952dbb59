//! The watch-source capability: everything the crawler needs from a
//! filesystem-watch service, abstracted so the daemon protocol stays out of
//! the core. [`fs_walk::FsWalkSource`] is the built-in non-daemon adapter.

pub mod fs_walk;

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::index::ClockSpec;

// ── Query model ──────────────────────────────────────────────────────────────

/// Fields the crawler asks for on each reported file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryField {
    Name,
    Exists,
    MtimeMs,
    Size,
    ContentSha1Hex,
}

impl QueryField {
    pub fn wire_name(self) -> &'static str {
        match self {
            QueryField::Name => "name",
            QueryField::Exists => "exists",
            QueryField::MtimeMs => "mtime_ms",
            QueryField::Size => "size",
            QueryField::ContentSha1Hex => "content.sha1hex",
        }
    }
}

/// File-matching expression tree. Adapters for wire protocols serialize it
/// with [`Expr::to_wire`]; in-process adapters interpret it directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    AllOf(Vec<Expr>),
    AnyOf(Vec<Expr>),
    /// Regular files only.
    FileType,
    Suffix(String),
    /// Set form of `Suffix`; requires the `suffix-set` capability and is
    /// semantically identical to an `AnyOf` of single suffixes.
    SuffixSet(Vec<String>),
    Dirname(String),
}

impl Expr {
    pub fn to_wire(&self) -> Value {
        match self {
            Expr::AllOf(terms) => {
                let mut arr = vec![json!("allof")];
                arr.extend(terms.iter().map(Expr::to_wire));
                Value::Array(arr)
            }
            Expr::AnyOf(terms) => {
                let mut arr = vec![json!("anyof")];
                arr.extend(terms.iter().map(Expr::to_wire));
                Value::Array(arr)
            }
            Expr::FileType => json!(["type", "f"]),
            Expr::Suffix(ext) => json!(["suffix", ext]),
            Expr::SuffixSet(exts) => json!(["suffix", exts]),
            Expr::Dirname(dir) => json!(["dirname", dir]),
        }
    }

    /// All suffixes this expression can match, regardless of which of the two
    /// equivalent forms encodes them.
    pub fn suffixes(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_suffixes(&mut out);
        out
    }

    fn collect_suffixes(&self, out: &mut Vec<String>) {
        match self {
            Expr::AllOf(terms) | Expr::AnyOf(terms) => {
                for term in terms {
                    term.collect_suffixes(out);
                }
            }
            Expr::Suffix(ext) => out.push(ext.clone()),
            Expr::SuffixSet(exts) => out.extend(exts.iter().cloned()),
            Expr::FileType | Expr::Dirname(_) => {}
        }
    }

    /// All directory constraints in the expression.
    pub fn dirnames(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_dirnames(&mut out);
        out
    }

    fn collect_dirnames(&self, out: &mut Vec<String>) {
        match self {
            Expr::AllOf(terms) | Expr::AnyOf(terms) => {
                for term in terms {
                    term.collect_dirnames(out);
                }
            }
            Expr::Dirname(dir) => out.push(dir.clone()),
            _ => {}
        }
    }
}

/// Build the file-matching expression for the configured extensions, using
/// the set form when the source advertises it.
pub fn extension_expression(extensions: &[String], suffix_set: bool) -> Expr {
    let suffix_term = if suffix_set {
        Expr::SuffixSet(extensions.to_vec())
    } else {
        Expr::AnyOf(extensions.iter().cloned().map(Expr::Suffix).collect())
    };
    Expr::AllOf(vec![Expr::FileType, suffix_term])
}

/// `**/*.{ext}` globs, scoped under each relative path when any are given.
/// Glob separators are always `/`.
pub(crate) fn extension_globs(extensions: &[String], rel_paths: &[PathBuf]) -> Vec<String> {
    if rel_paths.is_empty() {
        return extensions.iter().map(|ext| format!("**/*.{ext}")).collect();
    }
    rel_paths
        .iter()
        .flat_map(|rel| {
            let rel = rel.to_string_lossy().replace('\\', "/");
            extensions
                .iter()
                .map(move |ext| format!("{rel}/**/*.{ext}"))
        })
        .collect()
}

/// One crawl query against a single watch root.
#[derive(Debug, Clone)]
pub struct FileQuery {
    /// Changes since this clock; absent means "all files".
    pub since: Option<ClockSpec>,
    pub expression: Expr,
    pub fields: Vec<QueryField>,
    pub globs: Vec<String>,
    pub include_dotfiles: bool,
}

// ── Responses ────────────────────────────────────────────────────────────────

/// One reported file. `name` is relative to the watch root and may use the
/// reporting service's separator convention; `mtime_ms` is already normalized
/// to integer milliseconds by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub name: String,
    pub exists: bool,
    pub mtime_ms: i64,
    pub size: u64,
    pub sha1hex: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub clock: ClockSpec,
    /// The service's history was reset; this response is a full snapshot.
    pub is_fresh_instance: bool,
    pub files: Vec<FileChange>,
}

/// How the service watches a requested root: the actual watched directory
/// plus the requested root's path relative to it (`None` when they coincide).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedRoot {
    pub watch_root: PathBuf,
    pub relative_path: Option<PathBuf>,
}

// ── Capability ───────────────────────────────────────────────────────────────

pub trait WatchSource: Send + Sync {
    /// Whether [`Expr::SuffixSet`] may appear in query expressions.
    fn supports_suffix_set(&self) -> bool {
        false
    }

    /// Whether queries may request [`QueryField::ContentSha1Hex`].
    fn supports_content_sha1(&self) -> bool {
        false
    }

    /// Start (or reuse) a watch covering `root`.
    fn watch_project(&mut self, root: &Path) -> anyhow::Result<WatchedRoot>;

    /// List files under `watch_root` matching the query.
    fn query(&self, watch_root: &Path, query: &FileQuery) -> anyhow::Result<QueryResponse>;
}

/// Resolve every configured root and group the relative paths by watch root.
///
/// An empty list of relative paths means "watched whole". Once a watch root
/// has been seen with an empty relative path, later relative paths under it
/// are dropped: the whole-root watch already covers them.
pub fn collect_watch_roots(
    source: &mut dyn WatchSource,
    roots: &[PathBuf],
) -> anyhow::Result<BTreeMap<PathBuf, Vec<PathBuf>>> {
    let mut grouped: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    let mut watched_whole: std::collections::BTreeSet<PathBuf> = Default::default();

    for root in roots {
        let watched = source.watch_project(root)?;
        let rel = watched
            .relative_path
            .filter(|rel| !rel.as_os_str().is_empty());
        match rel {
            None => {
                watched_whole.insert(watched.watch_root.clone());
                grouped.entry(watched.watch_root).or_default().clear();
            }
            Some(rel) => {
                if watched_whole.contains(&watched.watch_root) {
                    continue;
                }
                grouped.entry(watched.watch_root).or_default().push(rel);
            }
        }
    }

    for (root, rels) in &mut grouped {
        if watched_whole.contains(root) {
            rels.clear();
        }
    }

    Ok(grouped)
}
