//! Pass 3: make every esm.sh module share one React instance.
//!
//! Each esm.sh URL for a non-runtime package gets `?external=react,react-dom`
//! so the CDN leaves React imports bare and the import map resolves them to
//! the single runtime copy. URLs that already carry a query are left alone.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::ArtifactPass;
use crate::artifact::import_map;
use crate::artifact::{ArtifactBundle, PostProcessError};

pub const EXTERNAL_QUERY: &str = "?external=react,react-dom";

const RUNTIME_PACKAGES: &[&str] = &["react", "react-dom"];
const RUNTIME_URLS: &[(&str, &str)] = &[
    ("react", "https://esm.sh/react@18.3.1"),
    ("react-dom", "https://esm.sh/react-dom@18.3.1"),
];

/// A whole import-map value. The package group keeps a scope prefix intact.
static MAP_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://esm\.sh/((?:@[^/]+/)?[^/@?]+)(@[^/?]+)?(/[^?]*)?$")
        .expect("import map url regex must compile")
});

/// A quoted URL inside code. A query string stops the match before the quote.
static CODE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(https://esm\.sh/)((?:@[A-Za-z0-9_.-]+/)?[A-Za-z0-9_.-]+)(@[A-Za-z0-9_.^~-]+)?((?:/[A-Za-z0-9_.@-]+)*)(\\?["'`])"#,
    )
    .expect("module url regex must compile")
});

static CSP_META_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(<meta\b[^>]*http-equiv\s*=\s*["']Content-Security-Policy["'][^>]*\bcontent\s*=\s*")([^"]*)(")"#,
    )
    .expect("csp meta regex must compile")
});

fn is_runtime(package: &str) -> bool {
    RUNTIME_PACKAGES.contains(&package)
}

/// The externalized form of an import-map value, if it needs one. Prefix
/// mappings (values ending in `/`) resolve by concatenation and are skipped.
fn externalize_map_url(url: &str) -> Option<String> {
    if url.ends_with('/') {
        return None;
    }
    let caps = MAP_URL_RE.captures(url)?;
    if is_runtime(&caps[1]) {
        return None;
    }
    Some(format!("{url}{EXTERNAL_QUERY}"))
}

fn externalize_code(text: &str) -> Option<String> {
    let mut changed = false;
    let rewritten = CODE_URL_RE.replace_all(text, |caps: &Captures| {
        if is_runtime(&caps[2]) {
            return caps[0].to_string();
        }
        changed = true;
        let version = caps.get(3).map_or("", |m| m.as_str());
        let path = caps.get(4).map_or("", |m| m.as_str());
        format!("{}{}{version}{path}{EXTERNAL_QUERY}{}", &caps[1], &caps[2], &caps[5])
    });
    changed.then(|| rewritten.into_owned())
}

/// Add `data:` to `script-src`. `None` if it is already allowed or there is
/// no `script-src` directive.
fn relax_policy(policy: &str) -> Option<String> {
    let mut relaxed = false;
    let directives: Vec<String> = policy
        .split(';')
        .map(|directive| {
            let trimmed = directive.trim();
            let is_script_src = trimmed.split_whitespace().next() == Some("script-src");
            if is_script_src && !trimmed.split_whitespace().any(|token| token == "data:") {
                relaxed = true;
                format!("{} data:", directive.trim_end())
            } else {
                directive.to_string()
            }
        })
        .collect();
    relaxed.then(|| directives.join(";"))
}

fn relax_csp(document: &str) -> Option<String> {
    let caps = CSP_META_RE.captures(document)?;
    let policy = relax_policy(&caps[2])?;
    let content = caps.get(2)?.range();
    let mut next = document.to_string();
    next.replace_range(content, &policy);
    Some(next)
}

pub struct DependencyDedupe;

impl ArtifactPass for DependencyDedupe {
    fn name(&self) -> &'static str {
        "dependency_dedupe"
    }

    fn apply(&self, bundle: &mut ArtifactBundle) -> Result<(), PostProcessError> {
        let doc = &bundle.transformed_code;
        let mut changed = false;

        // Parse before touching anything so a bad map leaves the bundle as-is.
        let mut next = match import_map::read(doc)? {
            Some(mut map) => {
                let mut map_changed = false;
                for url in map.imports.values_mut() {
                    if let Some(external) = externalize_map_url(url) {
                        *url = external;
                        map_changed = true;
                    }
                }
                if map_changed {
                    for (specifier, url) in RUNTIME_URLS {
                        map.insert_if_absent(specifier, url);
                    }
                }
                let mut next = doc.clone();
                import_map::write(&mut next, &map);
                changed |= map_changed;
                next
            }
            None => doc.clone(),
        };

        let (head, element, tail) = match import_map::locate_element(&next) {
            Some(range) => (
                next[..range.start].to_string(),
                next[range.clone()].to_string(),
                next[range.end..].to_string(),
            ),
            None => (next.clone(), String::new(), String::new()),
        };
        let head_fixed = externalize_code(&head);
        let tail_fixed = externalize_code(&tail);
        if head_fixed.is_some() || tail_fixed.is_some() {
            changed = true;
            next = format!(
                "{}{element}{}",
                head_fixed.unwrap_or(head),
                tail_fixed.unwrap_or(tail)
            );
        }

        if changed {
            if let Some(relaxed) = relax_csp(&next) {
                next = relaxed;
            }
        }

        bundle.transformed_code = next;
        Ok(())
    }
}
