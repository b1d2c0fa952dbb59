//! Incremental, cache-backed index of a source tree.
//!
//! A [`HasteMap`] records, for every tracked file, a content fingerprint,
//! its declared dependencies and (where applicable) a globally-unique module
//! name — the "haste name" — so a consumer can resolve `require("name")` to
//! a path without walking the tree. Names are either unambiguous (present in
//! [`HasteIndex::map`]) or contested (present in [`HasteIndex::duplicates`],
//! which consumers must refuse to resolve).
//!
//! One `build()` performs a single cycle: restore the persisted index, ask
//! the configured [`WatchSource`] for the delta since the stored clocks,
//! process changed files on a bounded worker pool, reconcile module-name
//! claims, and persist the result atomically.
//!
//! ```no_run
//! use hastemap::{FsWalkSource, HasteConfig, HasteMap};
//!
//! # fn main() -> hastemap::Result<()> {
//! let config = HasteConfig::new("/repo", "my-project");
//! let mut haste_map = HasteMap::new(config, Box::new(FsWalkSource::new()))?;
//! let index = haste_map.build()?;
//! if let Some(entry) = index.module("Banana") {
//!     println!("Banana lives at {}", entry.relative_path);
//! }
//! # Ok(())
//! # }
//! ```

mod build;
pub mod cache;
mod config;
mod crawl;
pub mod digest;
mod error;
mod extract;
mod index;
mod paths;
mod pool;
mod reconcile;
pub mod watch;
mod worker;

pub use build::{BuildEvent, BuildStats, HasteMap};
pub use config::HasteConfig;
pub use error::{HasteError, Result};
pub use extract::default_extract;
pub use index::{
    ClockMap, ClockSpec, DuplicatesEntry, DuplicatesIndex, FileMap, FileMetaData, HasteIndex,
    MockMap, ModuleEntry, ModuleKind, ModuleMap, PlatformMap, DEPENDENCY_DELIM, GENERIC_PLATFORM,
    NATIVE_PLATFORM, PACKAGE_JSON,
};
pub use watch::fs_walk::FsWalkSource;
pub use watch::{
    collect_watch_roots, extension_expression, Expr, FileChange, FileQuery, QueryField,
    QueryResponse, WatchSource, WatchedRoot,
};
pub use worker::{DependencyExtractor, HasteImpl};
