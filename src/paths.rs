use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Rewrite both separator conventions to the host one. Watch services report
/// names with their own separator; everything stored in the index uses the
/// host convention.
pub(crate) fn normalize_separators(path: &str) -> String {
    path.replace(['/', '\\'], &MAIN_SEPARATOR.to_string())
}

/// Compute `path` relative to `root` as a normalized string.
///
/// The common case (path lexically under root) is a cheap prefix strip; paths
/// outside the root fall back to a component walk that emits `..` segments.
pub(crate) fn relative(root: &Path, path: &Path) -> String {
    if let Ok(stripped) = path.strip_prefix(root) {
        return stripped.to_string_lossy().into_owned();
    }

    let root_parts: Vec<Component> = root.components().collect();
    let path_parts: Vec<Component> = path.components().collect();
    let common = root_parts
        .iter()
        .zip(path_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..root_parts.len() {
        out.push("..");
    }
    for part in &path_parts[common..] {
        out.push(part);
    }
    out.to_string_lossy().into_owned()
}

/// Resolve a relative index path back to an absolute one under `root`.
pub(crate) fn resolve(root: &Path, rel: &str) -> PathBuf {
    root.join(rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_both_separator_styles() {
        let expected = format!("a{sep}b{sep}c", sep = MAIN_SEPARATOR);
        assert_eq!(normalize_separators("a/b\\c"), expected);
    }

    #[test]
    fn relative_strips_root_prefix() {
        let root = Path::new("/project");
        assert_eq!(relative(root, Path::new("/project/src/a.js")), "src/a.js");
    }

    #[test]
    fn relative_of_root_itself_is_empty() {
        let root = Path::new("/project");
        assert_eq!(relative(root, Path::new("/project")), "");
    }

    #[test]
    fn relative_walks_up_for_outside_paths() {
        let root = Path::new("/project/sub");
        assert_eq!(
            relative(root, Path::new("/project/other/x.js")),
            format!("..{sep}other{sep}x.js", sep = MAIN_SEPARATOR)
        );
    }

    #[test]
    fn resolve_round_trips() {
        let root = Path::new("/project");
        let rel = relative(root, Path::new("/project/src/a.js"));
        assert_eq!(resolve(root, &rel), Path::new("/project/src/a.js"));
    }
}
