use regex::Regex;
use std::fmt;
use std::path::{PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

use crate::worker::{DependencyExtractor, HasteImpl};

const DEFAULT_EXTENSIONS: &[&str] = &["js", "json", "jsx", "node", "ts", "tsx"];
const VCS_DIRECTORIES: &[&str] = &[".git", ".hg", ".sl"];

/// Builder options. Construct with [`HasteConfig::new`] and override fields
/// as needed; `HasteMap::new` validates and normalizes the result.
#[derive(Clone)]
pub struct HasteConfig {
    /// Absolute base path; every stored path is relative to it.
    pub root_dir: PathBuf,
    /// Subtrees to index. Each must live under `root_dir`; duplicates are
    /// removed preserving first-occurrence order.
    pub roots: Vec<PathBuf>,
    /// File extensions to index, without the dot.
    pub extensions: Vec<String>,
    /// Reserved. Accepted and folded into the cache fingerprint only.
    pub platforms: Vec<String>,
    /// Upper bound on parallel worker tasks. `0` means one per logical CPU.
    pub max_workers: usize,
    /// Track a content digest for every file.
    pub compute_sha1: bool,
    /// Extract declared dependencies for parseable files.
    pub compute_dependencies: bool,
    /// Process files under `node_modules` like any other file.
    pub retain_all_files: bool,
    /// Run workers on the calling thread regardless of `max_workers`.
    pub force_in_band: bool,
    /// Ignore any existing cache file for this build.
    pub reset_cache: bool,
    /// Namespace component of the cache file name.
    pub id: String,
    /// Directory holding the cache file.
    pub cache_directory: PathBuf,
    /// Applied to normalized absolute paths during the crawl.
    pub ignore_pattern: Regex,
    /// Derives a haste name for files that do not declare one via
    /// `package.json`.
    pub haste_impl: Option<Arc<dyn HasteImpl>>,
    /// Replaces the built-in dependency extractor.
    pub dependency_extractor: Option<Arc<dyn DependencyExtractor>>,
}

impl HasteConfig {
    pub fn new(root_dir: impl Into<PathBuf>, id: impl Into<String>) -> Self {
        let root_dir = root_dir.into();
        Self {
            roots: vec![root_dir.clone()],
            root_dir,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            platforms: Vec::new(),
            max_workers: 0,
            compute_sha1: false,
            compute_dependencies: true,
            retain_all_files: false,
            force_in_band: false,
            reset_cache: false,
            id: id.into(),
            cache_directory: std::env::temp_dir(),
            ignore_pattern: default_ignore_pattern(),
            haste_impl: None,
            dependency_extractor: None,
        }
    }
}

impl fmt::Debug for HasteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HasteConfig")
            .field("root_dir", &self.root_dir)
            .field("roots", &self.roots)
            .field("extensions", &self.extensions)
            .field("platforms", &self.platforms)
            .field("max_workers", &self.max_workers)
            .field("compute_sha1", &self.compute_sha1)
            .field("compute_dependencies", &self.compute_dependencies)
            .field("retain_all_files", &self.retain_all_files)
            .field("force_in_band", &self.force_in_band)
            .field("reset_cache", &self.reset_cache)
            .field("id", &self.id)
            .field("cache_directory", &self.cache_directory)
            .field("ignore_pattern", &self.ignore_pattern.as_str())
            .field("haste_impl", &self.haste_impl.is_some())
            .field("dependency_extractor", &self.dependency_extractor.is_some())
            .finish()
    }
}

/// Version-control metadata directories are never interesting to track.
pub(crate) fn default_ignore_pattern() -> Regex {
    let sep = regex::escape(&MAIN_SEPARATOR.to_string());
    let alternatives: Vec<String> = VCS_DIRECTORIES
        .iter()
        .map(|dir| format!("{sep}{}{sep}", regex::escape(dir)))
        .collect();
    // The alternation over escaped literals is always a valid pattern.
    Regex::new(&alternatives.join("|")).unwrap_or_else(|_| Regex::new("$^").expect("empty pattern"))
}

/// Remove duplicate roots preserving first-occurrence order.
pub(crate) fn dedup_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    roots
        .iter()
        .filter(|root| seen.insert(root.as_path()))
        .cloned()
        .collect()
}
