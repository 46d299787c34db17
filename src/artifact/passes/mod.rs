//! The four post-processing passes.

mod dedupe;
mod dependencies;
mod syntax;
mod unescape;

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{ArtifactBundle, PostProcessError};

pub use dedupe::{DependencyDedupe, EXTERNAL_QUERY};
pub use dependencies::{DependencyInjection, KnownLibrary, KNOWN_LIBRARIES};
pub use syntax::SyntaxNormalization;
pub use unescape::LiteralUnescape;

/// One text→text pass over a bundle.
pub trait ArtifactPass: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrite `bundle.transformed_code`. On error the bundle must be unchanged.
    fn apply(&self, bundle: &mut ArtifactBundle) -> Result<(), PostProcessError>;
}

/// Every `<script …>…</script>` element, matched non-greedily.
static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(<script\b[^>]*>)(.*?)(</script\s*>)").expect("script region regex must compile")
});

/// Rewrite the body of every script element. `f` gets the opening tag and body.
pub(crate) fn map_script_regions<F>(document: &str, mut f: F) -> String
where
    F: FnMut(&str, &str) -> Option<String>,
{
    SCRIPT_RE
        .replace_all(document, |caps: &Captures| {
            let open = &caps[1];
            let body = &caps[2];
            match f(open, body) {
                Some(new_body) => format!("{open}{new_body}{}", &caps[3]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

pub(crate) fn is_import_map_tag(open_tag: &str) -> bool {
    open_tag.to_ascii_lowercase().contains("importmap")
}

/// Apply `(regex, replacement)` rules in order; `None` if nothing changed.
pub(crate) fn apply_rules(text: &str, rules: &[(&Regex, &str)]) -> Option<String> {
    let mut current = text.to_string();
    let mut changed = false;
    for (re, replacement) in rules {
        let next = match re.replace_all(&current, *replacement) {
            Cow::Owned(s) => Some(s),
            Cow::Borrowed(_) => None,
        };
        if let Some(next) = next {
            current = next;
            changed = true;
        }
    }
    changed.then_some(current)
}
