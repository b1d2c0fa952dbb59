//! Built-in dependency extractor.
//!
//! Recognizes the common static and dynamic module-reference forms of
//! JavaScript-family sources. Embedders with richer grammars plug in a
//! [`DependencyExtractor`](crate::worker::DependencyExtractor) and may call
//! back into [`default_extract`] for the base set.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    // import defaultExport, { a, b } from 'specifier'
    // export { a } from 'specifier'
    static ref IMPORT_FROM_RE: Regex =
        Regex::new(r#"\b(?:import|export)\s[^'"]*?\bfrom\s*['"]([^'"]+)['"]"#)
            .expect("valid import-from regex");
    // require('specifier'), import('specifier'), require.resolve('specifier')
    static ref CALL_RE: Regex =
        Regex::new(r#"\b(?:require(?:\.resolve)?|import)\s*\(\s*['"]([^'"]+)['"]\s*\)"#)
            .expect("valid require-call regex");
    // import 'side-effect-only'
    static ref BARE_IMPORT_RE: Regex =
        Regex::new(r#"\bimport\s*['"]([^'"]+)['"]"#).expect("valid bare import regex");
}

/// Extract the ordered, de-duplicated list of module specifiers referenced
/// by `source`. Order is first occurrence in the text.
pub fn default_extract(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in source.lines() {
        for re in [&*IMPORT_FROM_RE, &*CALL_RE, &*BARE_IMPORT_RE] {
            for cap in re.captures_iter(line) {
                out.push(cap[1].to_string());
            }
        }
    }
    dedup_preserving_order(out)
}

/// Drop repeats, keeping the first occurrence of each specifier. Empty
/// specifiers never make it into the index.
pub(crate) fn dedup_preserving_order(specifiers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    specifiers
        .into_iter()
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_static_imports() {
        let source = r#"
            import React from 'react';
            import { join } from "path";
            export { helper } from './helper';
        "#;
        assert_eq!(default_extract(source), vec!["react", "path", "./helper"]);
    }

    #[test]
    fn extracts_requires_and_dynamic_imports() {
        let source = r#"
            const fs = require('fs');
            const lazy = import('./lazy');
            const resolved = require.resolve('pkg');
        "#;
        assert_eq!(default_extract(source), vec!["fs", "./lazy", "pkg"]);
    }

    #[test]
    fn extracts_side_effect_imports() {
        assert_eq!(default_extract("import './polyfill';"), vec!["./polyfill"]);
    }

    #[test]
    fn deduplicates_preserving_first_occurrence() {
        let source = r#"
            import a from 'b';
            import c from 'a';
            const again = require('b');
        "#;
        assert_eq!(default_extract(source), vec!["b", "a"]);
    }

    #[test]
    fn ignores_unquoted_or_empty_specifiers() {
        assert!(default_extract("const x = require(someVariable);").is_empty());
        assert!(default_extract("import '';").is_empty());
    }
}
