//! Pass 1: inject import-map entries and globals for known libraries.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::ArtifactPass;
use crate::artifact::import_map::{self, ImportMap};
use crate::artifact::{ArtifactBundle, PostProcessError};

/// A library the shell knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownLibrary {
    pub specifier: &'static str,
    pub url: &'static str,
    /// Global name the library is exposed under, if code may use it bare.
    pub global: Option<&'static str>,
    /// Other specifiers this library needs loaded alongside it.
    pub requires: &'static [&'static str],
}

pub const KNOWN_LIBRARIES: &[KnownLibrary] = &[
    KnownLibrary {
        specifier: "react",
        url: "https://esm.sh/react@18.3.1",
        global: Some("React"),
        requires: &[],
    },
    KnownLibrary {
        specifier: "react-dom",
        url: "https://esm.sh/react-dom@18.3.1",
        global: Some("ReactDOM"),
        requires: &["react"],
    },
    KnownLibrary {
        specifier: "react-dom/client",
        url: "https://esm.sh/react-dom@18.3.1/client",
        global: None,
        requires: &["react", "react-dom"],
    },
    KnownLibrary {
        specifier: "recharts",
        url: "https://esm.sh/recharts@2.12.7",
        global: None,
        requires: &["react", "react-dom"],
    },
    KnownLibrary {
        specifier: "lucide-react",
        url: "https://esm.sh/lucide-react@0.424.0",
        global: None,
        requires: &["react"],
    },
    KnownLibrary {
        specifier: "framer-motion",
        url: "https://esm.sh/framer-motion@11.3.8",
        global: None,
        requires: &["react", "react-dom"],
    },
    KnownLibrary {
        specifier: "d3",
        url: "https://esm.sh/d3@7.9.0",
        global: Some("d3"),
        requires: &[],
    },
    KnownLibrary {
        specifier: "three",
        url: "https://esm.sh/three@0.167.0",
        global: Some("THREE"),
        requires: &[],
    },
];

static IMPORT_SPECIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:\bfrom|\bimport)\s*\(?\s*["']([^"']+)["']"#)
        .expect("import specifier regex must compile")
});

fn library(specifier: &str) -> Option<&'static KnownLibrary> {
    KNOWN_LIBRARIES.iter().find(|lib| lib.specifier == specifier)
}

fn global_marker(global: &str) -> String {
    format!("data-kiln-global=\"{global}\"")
}

/// Libraries referenced by the code: imported by specifier, or used through
/// their global name (`React.`, `d3.`, `THREE.`), plus what they require.
fn detect(code: &str) -> BTreeSet<&'static str> {
    let mut found = BTreeSet::new();
    for caps in IMPORT_SPECIFIER_RE.captures_iter(code) {
        let spec = &caps[1];
        if let Some(lib) = library(spec) {
            found.insert(lib.specifier);
        }
    }
    for lib in KNOWN_LIBRARIES {
        if let Some(global) = lib.global {
            if code.contains(&format!("{global}.")) {
                found.insert(lib.specifier);
            }
        }
    }
    let mut required: Vec<&'static str> = found.iter().copied().collect();
    while let Some(spec) = required.pop() {
        if let Some(lib) = library(spec) {
            for &dep in lib.requires {
                if found.insert(dep) {
                    required.push(dep);
                }
            }
        }
    }
    found
}

/// Injects load declarations and global-exposure scripts. Idempotent: entries
/// and globals already present are left untouched.
pub struct DependencyInjection;

impl ArtifactPass for DependencyInjection {
    fn name(&self) -> &'static str {
        "dependency_injection"
    }

    fn apply(&self, bundle: &mut ArtifactBundle) -> Result<(), PostProcessError> {
        let doc = &bundle.transformed_code;
        let code_without_map = match import_map::locate_element(doc) {
            Some(range) => format!("{}{}", &doc[..range.start], &doc[range.end..]),
            None => doc.clone(),
        };
        let detected = detect(&code_without_map);
        if detected.is_empty() {
            return Ok(());
        }

        let existing = import_map::read(doc)?;
        let had_map = existing.is_some();
        let mut map = existing.unwrap_or_else(ImportMap::default);
        let mut changed = false;
        for spec in &detected {
            if let Some(lib) = library(spec) {
                changed |= map.insert_if_absent(lib.specifier, lib.url);
            }
        }

        let mut next = doc.clone();
        if changed || !had_map {
            import_map::write(&mut next, &map);
        }

        let globals: String = detected
            .iter()
            .filter_map(|spec| library(spec))
            .filter_map(|lib| lib.global.map(|g| (lib.specifier, g)))
            .filter(|(_, global)| !next.contains(&global_marker(global)))
            .map(|(spec, global)| {
                format!(
                    "<script type=\"module\" {}>import * as __kilnModule from \"{spec}\"; window.{global} = __kilnModule.default ?? __kilnModule;</script>\n",
                    global_marker(global)
                )
            })
            .collect();
        if !globals.is_empty() {
            let at = import_map::locate_element(&next)
                .map(|range| range.end)
                .unwrap_or(0);
            let insert = if next[at..].starts_with('\n') {
                at + 1
            } else {
                at
            };
            next.insert_str(insert, &globals);
        }

        bundle
            .detected_dependencies
            .extend(detected.iter().map(|s| s.to_string()));
        bundle.transformed_code = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactMode;

    #[test]
    fn detects_imports_globals_and_required_libraries() {
        let found = detect("import { LineChart } from 'recharts';\nconst s = d3.select('svg');");

        assert!(found.contains("recharts"));
        assert!(found.contains("react"));
        assert!(found.contains("react-dom"));
        assert!(found.contains("d3"));
        assert!(!found.contains("three"));
    }

    #[test]
    fn injects_entries_and_globals_once() {
        let mut bundle = ArtifactBundle::from_generated(
            "import { LineChart } from 'recharts';\nexport default function App() { return React.createElement(LineChart); }",
            ArtifactMode::React,
            "Chart",
        );

        DependencyInjection.apply(&mut bundle).unwrap();
        let once = bundle.transformed_code.clone();
        DependencyInjection.apply(&mut bundle).unwrap();

        assert_eq!(bundle.transformed_code, once);
        let map = import_map::read(&once).unwrap().unwrap();
        assert_eq!(map.imports["recharts"], "https://esm.sh/recharts@2.12.7");
        assert_eq!(map.imports["react-dom/client"], "https://esm.sh/react-dom@18.3.1/client");
        assert_eq!(once.matches("data-kiln-global=\"React\"").count(), 1);
        assert!(bundle.detected_dependencies.contains("recharts"));
    }

    #[test]
    fn existing_entries_are_not_overwritten() {
        let mut bundle = ArtifactBundle::from_document(
            "<html><head><script type=\"importmap\">{\"imports\":{\"d3\":\"https://cdn.example/d3.js\"}}</script></head><body><script type=\"module\">import * as d3 from 'd3';</script></body></html>",
        );

        DependencyInjection.apply(&mut bundle).unwrap();

        let map = import_map::read(&bundle.transformed_code).unwrap().unwrap();
        assert_eq!(map.imports["d3"], "https://cdn.example/d3.js");
    }

    #[test]
    fn code_without_known_libraries_is_unchanged() {
        let mut bundle = ArtifactBundle::from_generated("<p>plain</p>", ArtifactMode::Html, "t");
        let before = bundle.transformed_code.clone();

        DependencyInjection.apply(&mut bundle).unwrap();

        assert_eq!(bundle.transformed_code, before);
    }
}
