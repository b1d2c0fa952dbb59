//! Cache persistence.
//!
//! The index persists as a single versioned JSON file at a path derived from
//! the builder's identity. Loading is infallible from the caller's point of
//! view: any missing, corrupt or version-mismatched file yields a fresh empty
//! index. Stores go through a temp file and an atomic rename so a crashed
//! writer never leaves a partial cache behind.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::digest;
use crate::error::{HasteError, Result};
use crate::index::HasteIndex;

/// Bumped whenever the on-disk shape changes; older files are rebuilt.
const CACHE_FORMAT_VERSION: u32 = 1;

lazy_static! {
    static ref NON_WORD_RE: Regex = Regex::new(r"\W").expect("valid non-word regex");
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    version: u32,
    index: HasteIndex,
}

/// Deterministic cache location: `{dir}/{sanitize(id)}-{sha1(extra)[..32]}`.
/// `sanitize` replaces every non-word character with `-`; `extra` components
/// are concatenated into the fingerprint so that any change to them moves the
/// cache to a different file.
pub fn cache_file_path(cache_dir: &Path, id: &str, extra: &[String]) -> PathBuf {
    let sanitized = NON_WORD_RE.replace_all(id, "-");
    let fingerprint = digest::sha1_hex(extra.concat().as_bytes());
    cache_dir.join(format!("{}-{}", sanitized, &fingerprint[..32]))
}

/// Restore a previously persisted index, or an empty one when anything about
/// the file is off. The failure reason is logged, never surfaced.
pub fn load(path: &Path) -> HasteIndex {
    match try_load(path) {
        Ok(index) => index,
        Err(err) => {
            debug!("starting from an empty index: {err}");
            HasteIndex::new()
        }
    }
}

fn try_load(path: &Path) -> Result<HasteIndex> {
    let bytes = fs::read(path).map_err(|_| HasteError::CacheUnreadable(path.to_path_buf()))?;
    let envelope: CacheEnvelope = serde_json::from_slice(&bytes)
        .map_err(|_| HasteError::CacheUnreadable(path.to_path_buf()))?;
    if envelope.version != CACHE_FORMAT_VERSION {
        return Err(HasteError::CacheUnreadable(path.to_path_buf()));
    }
    Ok(envelope.index)
}

/// Persist `index` at `path` via temp-file-then-rename.
pub fn store(path: &Path, index: &HasteIndex) -> Result<()> {
    let write_err = |source| HasteError::CacheWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let envelope = CacheEnvelope {
        version: CACHE_FORMAT_VERSION,
        index: index.clone(),
    };
    let bytes = serde_json::to_vec(&envelope).map_err(|err| HasteError::CacheWrite {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
    })?;

    // Same directory as the destination so the rename cannot cross devices.
    let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    let mut tmp = fs::File::create(&tmp_path).map_err(write_err)?;
    tmp.write_all(&bytes).map_err(write_err)?;
    tmp.sync_all().map_err(write_err)?;
    drop(tmp);
    fs::rename(&tmp_path, path).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ClockSpec, FileMetaData, ModuleEntry, ModuleKind, GENERIC_PLATFORM};
    use tempfile::TempDir;

    fn populated_index() -> HasteIndex {
        let mut index = HasteIndex::new();
        index
            .clocks
            .insert("".into(), ClockSpec::Local("c:12:34".into()));
        index.files.insert(
            "a.js".into(),
            FileMetaData {
                haste_id: "Foo".into(),
                mtime_ms: 100,
                size: 42,
                visited: true,
                dependencies: vec!["./b".into(), "react".into()],
                sha1: Some("da39a3ee5e6b4b0d3255bfef95601890afd80709".into()),
            },
        );
        index.files.insert(
            "b.js".into(),
            FileMetaData {
                haste_id: String::new(),
                mtime_ms: 101,
                size: 7,
                visited: true,
                dependencies: Vec::new(),
                sha1: None,
            },
        );
        index.map.entry("Foo".into()).or_default().insert(
            GENERIC_PLATFORM.into(),
            ModuleEntry::new("a.js", ModuleKind::Module),
        );
        index
            .duplicates
            .entry("Dup".into())
            .or_default()
            .entry(GENERIC_PLATFORM.into())
            .or_default()
            .extend([
                ("x.js".to_string(), ModuleKind::Module),
                ("y.js".to_string(), ModuleKind::Module),
            ]);
        index
    }

    #[test]
    fn path_is_deterministic_and_sanitized() {
        let dir = Path::new("/tmp");
        let extra = vec!["v1".to_string(), "roots".to_string()];
        let a = cache_file_path(dir, "haste map @2", &extra);
        let b = cache_file_path(dir, "haste map @2", &extra);
        assert_eq!(a, b);

        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("haste-map--2-"));
        let hash_part = name.rsplit('-').next().unwrap();
        assert_eq!(hash_part.len(), 32);
    }

    #[test]
    fn path_changes_with_extra_components() {
        let dir = Path::new("/tmp");
        let a = cache_file_path(dir, "id", &["one".to_string()]);
        let b = cache_file_path(dir, "id", &["two".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn store_then_load_round_trips_exactly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache");
        let index = populated_index();

        store(&path, &index).unwrap();
        assert_eq!(load(&path), index);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(load(&dir.path().join("absent")), HasteIndex::new());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache");
        fs::write(&path, b"{not json").unwrap();
        assert_eq!(load(&path), HasteIndex::new());
    }

    #[test]
    fn version_mismatch_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache");
        let stale = serde_json::json!({
            "version": CACHE_FORMAT_VERSION + 1,
            "index": HasteIndex::new(),
        });
        fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();
        assert_eq!(load(&path), HasteIndex::new());
    }

    #[test]
    fn store_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("cache");
        store(&path, &HasteIndex::new()).unwrap();
        assert_eq!(load(&path), HasteIndex::new());
    }

    #[test]
    fn store_leaves_no_temp_file_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache");
        store(&path, &populated_index()).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cache".to_string()]);
    }
}
