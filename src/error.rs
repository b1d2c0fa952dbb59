use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = HasteError> = std::result::Result<T, E>;

/// Failure taxonomy of the index builder. Watch-source and plugin causes are
/// embedder-supplied and therefore opaque; they are carried as
/// [`anyhow::Error`] payloads.
#[derive(Debug, Error)]
pub enum HasteError {
    /// The persisted cache could not be decoded. Recovered internally by
    /// starting from an empty index; surfaces only through logging.
    #[error("cache file {0} is missing, corrupt or from another version")]
    CacheUnreadable(PathBuf),

    /// A watch-source query failed on at least one root. No partial crawl
    /// result is kept.
    #[error("crawling the filesystem failed")]
    CrawlFailed(#[source] anyhow::Error),

    /// A `package.json` under a configured root is not valid JSON.
    #[error("cannot parse {} as JSON manifest", .0.display())]
    InvalidPackageJson(PathBuf),

    /// A tracked file could not be read while processing.
    #[error("cannot read {}", .path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An embedder-supplied plugin (haste name resolver or dependency
    /// extractor) returned an error.
    #[error("{plugin} plugin failed")]
    PluginFailure {
        plugin: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The build was cancelled before completion; nothing was persisted.
    #[error("build cancelled")]
    Cancelled,

    /// Writing the cache file (temp file or final rename) failed.
    #[error("failed to persist cache to {}", .path.display())]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Builder construction rejected the supplied options.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl HasteError {
    /// Stable machine-readable tag, used in emitted error events.
    pub fn kind(&self) -> &'static str {
        match self {
            HasteError::CacheUnreadable(_) => "cache-unreadable",
            HasteError::CrawlFailed(_) => "crawl-failed",
            HasteError::InvalidPackageJson(_) => "invalid-package-json",
            HasteError::FileUnreadable { .. } => "file-unreadable",
            HasteError::PluginFailure { .. } => "plugin-failure",
            HasteError::Cancelled => "cancelled",
            HasteError::CacheWrite { .. } => "cache-write",
            HasteError::InvalidConfiguration(_) => "invalid-configuration",
        }
    }

    /// A read failure the build recovers from by dropping the file from the
    /// index: the file vanished between crawl and processing, or is not
    /// accessible to this process.
    pub fn is_recoverable_read(&self) -> bool {
        match self {
            HasteError::FileUnreadable { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}
