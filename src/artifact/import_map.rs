//! Locating, parsing and rewriting a bundle's import map.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::PostProcessError;

static IMPORT_MAP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script\b[^>]*\btype\s*=\s*["']importmap["'][^>]*>(.*?)</script\s*>"#)
        .expect("import map regex must compile")
});

static FIRST_SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<script\b").expect("script tag regex must compile"));

/// Parsed import map. Only `imports` is interpreted; `scopes` is carried through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportMap {
    #[serde(default)]
    pub imports: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<serde_json::Value>,
}

impl ImportMap {
    pub fn parse(text: &str) -> Result<Self, PostProcessError> {
        serde_json::from_str(text).map_err(|e| PostProcessError::ImportMap(e.to_string()))
    }

    /// Insert unless the specifier is already mapped. Returns whether it was added.
    pub fn insert_if_absent(&mut self, specifier: &str, url: &str) -> bool {
        if self.imports.contains_key(specifier) {
            return false;
        }
        self.imports.insert(specifier.to_string(), url.to_string());
        true
    }

    /// Stable pretty JSON with back-ticks escaped, so the map text never
    /// contains a raw back-tick.
    pub fn to_canonical_json(&self) -> String {
        let json = serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string());
        json.replace('`', "\\u0060")
    }
}

/// Byte range of the first import map's JSON content.
pub fn locate(document: &str) -> Option<Range<usize>> {
    IMPORT_MAP_RE
        .captures(document)
        .and_then(|caps| caps.get(1))
        .map(|m| m.range())
}

/// Byte range of the whole first import map element.
pub fn locate_element(document: &str) -> Option<Range<usize>> {
    IMPORT_MAP_RE.find(document).map(|m| m.range())
}

/// Parse the document's import map, if it has one.
pub fn read(document: &str) -> Result<Option<ImportMap>, PostProcessError> {
    match locate(document) {
        Some(range) => ImportMap::parse(&document[range]).map(Some),
        None => Ok(None),
    }
}

/// Replace the import map content, or insert a new import map before the
/// first script (else before `</head>`, else at the start).
pub fn write(document: &mut String, map: &ImportMap) {
    let content = format!("\n{}\n", map.to_canonical_json());
    if let Some(range) = locate(document) {
        document.replace_range(range, &content);
        return;
    }
    let element = format!("<script type=\"importmap\">{content}</script>\n");
    let at = FIRST_SCRIPT_RE
        .find(document)
        .map(|m| m.start())
        .or_else(|| document.find("</head>"))
        .unwrap_or(0);
    document.insert_str(at, &element);
}
