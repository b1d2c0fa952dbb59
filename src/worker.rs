//! Per-file metadata extraction. Pure with respect to the index: a worker
//! sees only a path, the builder configuration and (optionally) a digest the
//! crawl already supplied, and produces a [`WorkerMetadata`] the reconciler
//! commits. Workers run concurrently, so nothing here touches shared state.

use std::fs;
use std::path::Path;

use crate::config::HasteConfig;
use crate::digest;
use crate::error::{HasteError, Result};
use crate::extract::{dedup_preserving_order, default_extract};
use crate::index::{ModuleEntry, ModuleKind, PACKAGE_JSON};
use crate::paths;

/// Derives a haste name from a file path. `Ok(None)` means the file claims
/// no name.
pub trait HasteImpl: Send + Sync {
    fn haste_name(&self, path: &Path) -> anyhow::Result<Option<String>>;
}

/// Replaces the built-in dependency grammar. `default_extract` is the
/// built-in extractor, passed so a plugin can extend rather than reimplement
/// the base set.
pub trait DependencyExtractor: Send + Sync {
    fn extract(
        &self,
        source: &str,
        path: &Path,
        default_extract: &dyn Fn(&str) -> Vec<String>,
    ) -> anyhow::Result<Vec<String>>;
}

/// Tracked but never parsed: assets and data files. `package.json` is the
/// sole JSON exception, handled before this list applies.
const ASSET_EXTENSIONS: &[&str] = &[
    "json", // data
    "bmp", "gif", "ico", "jpeg", "jpg", "png", "svg", "tiff", "tif", "webp", // images
    "avi", "mp4", "mpeg", "mpg", "ogv", "webm", "3gp", "3g2", // video
    "aac", "midi", "mid", "mp3", "oga", "wav", // audio
    "eot", "otf", "ttf", "woff", "woff2", // fonts
];

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct WorkerMetadata {
    pub id: Option<String>,
    pub module: Option<ModuleEntry>,
    pub dependencies: Option<Vec<String>>,
    pub sha1: Option<String>,
}

/// The module kind a path commits under: `package.json` files are packages,
/// everything else is a plain module.
pub(crate) fn kind_for_path(rel_path: &str) -> ModuleKind {
    match Path::new(rel_path).file_name() {
        Some(name) if name == PACKAGE_JSON => ModuleKind::Package,
        _ => ModuleKind::Module,
    }
}

fn is_asset_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| ASSET_EXTENSIONS.contains(&ext.as_str()))
}

/// File contents, read at most once and only when a branch needs them.
struct LazyContent<'a> {
    path: &'a Path,
    bytes: Option<Vec<u8>>,
}

impl LazyContent<'_> {
    fn get(&mut self) -> Result<&[u8]> {
        if self.bytes.is_none() {
            let data = fs::read(self.path).map_err(|source| HasteError::FileUnreadable {
                path: self.path.to_path_buf(),
                source,
            })?;
            self.bytes = Some(data);
        }
        Ok(self.bytes.as_deref().unwrap_or_default())
    }
}

/// Process one file: haste name, module entry, dependency list and digest,
/// per the configured flags. `crawl_sha1` short-circuits digest computation
/// when the watch service already reported one.
pub(crate) fn process_file(
    config: &HasteConfig,
    rel_path: &str,
    crawl_sha1: Option<String>,
) -> Result<WorkerMetadata> {
    let abs = paths::resolve(&config.root_dir, rel_path);
    let mut content = LazyContent {
        path: &abs,
        bytes: None,
    };
    let mut metadata = WorkerMetadata::default();

    let is_package_json = abs
        .file_name()
        .is_some_and(|name| name == PACKAGE_JSON);

    if is_package_json {
        let manifest: serde_json::Value = serde_json::from_slice(content.get()?)
            .map_err(|_| HasteError::InvalidPackageJson(abs.clone()))?;
        if let Some(name) = manifest.get("name").and_then(|name| name.as_str()) {
            metadata.id = Some(name.to_string());
            metadata.module = Some(ModuleEntry::new(rel_path, ModuleKind::Package));
        }
    } else if !is_asset_path(&abs) {
        if let Some(haste_impl) = &config.haste_impl {
            let id = haste_impl
                .haste_name(&abs)
                .map_err(|source| HasteError::PluginFailure {
                    plugin: "haste_impl",
                    source,
                })?;
            if let Some(id) = id {
                metadata.id = Some(id);
                metadata.module = Some(ModuleEntry::new(rel_path, ModuleKind::Module));
            }
        }

        if config.compute_dependencies {
            let text = String::from_utf8_lossy(content.get()?).into_owned();
            let raw = match &config.dependency_extractor {
                Some(extractor) => extractor
                    .extract(&text, &abs, &default_extract)
                    .map_err(|source| HasteError::PluginFailure {
                        plugin: "dependency_extractor",
                        source,
                    })?,
                None => default_extract(&text),
            };
            metadata.dependencies = Some(dedup_preserving_order(raw));
        }
    }

    if config.compute_sha1 {
        metadata.sha1 = match crawl_sha1 {
            Some(sha1) => Some(sha1),
            None => Some(digest::sha1_hex(content.get()?)),
        };
    }

    Ok(metadata)
}
