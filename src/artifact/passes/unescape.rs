//! Pass 4: undo double escaping of template literals inside scripts.

use std::sync::LazyLock;

use regex::Regex;

use super::{map_script_regions, ArtifactPass};
use crate::artifact::{ArtifactBundle, PostProcessError};

/// `\`` and `\${` emitted where a bare back-tick or interpolation was meant.
static ESCAPED_TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\+(`|\$\{)").expect("escaped template regex must compile")
});

static ESCAPED_QUOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\\+(["'])"#).expect("escaped quote regex must compile"));

/// Runs over every script region, import map included. Must run after
/// [`DependencyDedupe`](super::DependencyDedupe), which parses the map.
pub struct LiteralUnescape;

impl LiteralUnescape {
    fn unescape(script: &str) -> Option<String> {
        let delimiters = ESCAPED_TEMPLATE_RE.replace_all(script, "${1}");
        let mut changed = !matches!(delimiters, std::borrow::Cow::Borrowed(_));

        let mut out = String::with_capacity(delimiters.len());
        for (i, segment) in delimiters.split('`').enumerate() {
            if i > 0 {
                out.push('`');
            }
            // Odd segments sit between back-ticks.
            if i % 2 == 1 {
                let unquoted = ESCAPED_QUOTE_RE.replace_all(segment, "${1}");
                changed |= !matches!(unquoted, std::borrow::Cow::Borrowed(_));
                out.push_str(&unquoted);
            } else {
                out.push_str(segment);
            }
        }
        changed.then_some(out)
    }
}

impl ArtifactPass for LiteralUnescape {
    fn name(&self) -> &'static str {
        "literal_unescape"
    }

    fn apply(&self, bundle: &mut ArtifactBundle) -> Result<(), PostProcessError> {
        bundle.transformed_code =
            map_script_regions(&bundle.transformed_code, |_, body| Self::unescape(body));
        Ok(())
    }
}
