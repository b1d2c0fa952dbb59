//! Data model of the persisted index.
//!
//! Every collection is a `BTreeMap` so iteration order is deterministic
//! wherever it is observable (serialization, tests, diagnostics).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Platform tag used for every module; per-platform specialization is
/// reserved in the data model but not populated.
pub const GENERIC_PLATFORM: &str = "g";
/// Reserved platform tag for native specializations.
pub const NATIVE_PLATFORM: &str = "native";

/// Delimiter byte between entries of a persisted dependency list.
pub const DEPENDENCY_DELIM: char = '\0';

/// The one JSON file that is parsed rather than treated as an asset.
pub const PACKAGE_JSON: &str = "package.json";

// ── Module entries ───────────────────────────────────────────────────────────

/// Wire constants: `Module = 0`, `Package = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ModuleKind {
    Module,
    Package,
}

impl From<ModuleKind> for u8 {
    fn from(kind: ModuleKind) -> u8 {
        match kind {
            ModuleKind::Module => 0,
            ModuleKind::Package => 1,
        }
    }
}

impl TryFrom<u8> for ModuleKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(ModuleKind::Module),
            1 => Ok(ModuleKind::Package),
            other => Err(format!("unknown module kind {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub relative_path: String,
    pub kind: ModuleKind,
}

impl ModuleEntry {
    pub fn new(relative_path: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind,
        }
    }
}

// ── File metadata ────────────────────────────────────────────────────────────

/// Per-file record. `haste_id` is the empty string when the file claims no
/// module name; `sha1` distinguishes absent from any stored digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    pub haste_id: String,
    pub mtime_ms: i64,
    pub size: u64,
    pub visited: bool,
    #[serde(with = "dependency_list")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

impl FileMetaData {
    /// A freshly crawled, not-yet-processed entry.
    pub fn pristine(mtime_ms: i64, size: u64, sha1: Option<String>) -> Self {
        Self {
            haste_id: String::new(),
            mtime_ms,
            size,
            visited: false,
            dependencies: Vec::new(),
            sha1,
        }
    }
}

/// Dependency lists persist as a single NUL-joined string.
mod dependency_list {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::DEPENDENCY_DELIM;

    pub fn serialize<S: Serializer>(deps: &[String], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&deps.join(&DEPENDENCY_DELIM.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
        let joined = String::deserialize(de)?;
        if joined.is_empty() {
            return Ok(Vec::new());
        }
        Ok(joined.split(DEPENDENCY_DELIM).map(String::from).collect())
    }
}

// ── Clocks ───────────────────────────────────────────────────────────────────

/// A point in a watch service's change log. Persisted clocks are always
/// `Local`; the SCM form only appears in queries and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClockSpec {
    Local(String),
    Scm {
        mergebase_with: String,
        #[serde(default)]
        mergebase: String,
        #[serde(default)]
        clock: Option<String>,
    },
}

impl ClockSpec {
    pub fn is_scm(&self) -> bool {
        matches!(self, ClockSpec::Scm { .. })
    }

    /// The string-valued local clock carried by this value, if any.
    pub fn local_clock(&self) -> Option<&str> {
        match self {
            ClockSpec::Local(clock) => Some(clock),
            ClockSpec::Scm { clock, .. } => clock.as_deref(),
        }
    }
}

// ── Aggregate maps ───────────────────────────────────────────────────────────

pub type FileMap = BTreeMap<String, FileMetaData>;
pub type PlatformMap = BTreeMap<String, ModuleEntry>;
pub type ModuleMap = BTreeMap<String, PlatformMap>;
pub type DuplicatesEntry = BTreeMap<String, ModuleKind>;
pub type DuplicatesIndex = BTreeMap<String, BTreeMap<String, DuplicatesEntry>>;
pub type ClockMap = BTreeMap<String, ClockSpec>;
pub type MockMap = BTreeMap<String, String>;

/// The top-level persisted artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HasteIndex {
    pub clocks: ClockMap,
    pub files: FileMap,
    pub map: ModuleMap,
    pub duplicates: DuplicatesIndex,
    /// Reserved; never populated by the builder.
    pub mocks: MockMap,
}

impl HasteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a haste id to its generic-platform entry, if unambiguous.
    pub fn module(&self, id: &str) -> Option<&ModuleEntry> {
        self.map.get(id)?.get(GENERIC_PLATFORM)
    }

    /// Whether resolving `id` must be refused because multiple files claim it.
    pub fn is_duplicate(&self, id: &str) -> bool {
        self.duplicates.contains_key(id)
    }
}
