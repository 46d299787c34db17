//! Pass 2: repair malformed import/export constructs models are known to emit.

use std::sync::LazyLock;

use regex::Regex;

use super::{apply_rules, is_import_map_tag, map_script_regions, ArtifactPass};
use crate::artifact::{ArtifactBundle, PostProcessError};

/// `import * from X from "m"` (wrong keyword where `as` belongs).
static WILDCARD_WRONG_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*\*\s*(?:from|like|of|is|to)\s+([A-Za-z_$][\w$]*)\s+from\s*(["'])"#)
        .expect("wildcard keyword regex must compile")
});

/// `import * X from "m"` (missing `as`).
static WILDCARD_MISSING_AS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*\*\s*([A-Za-z_$][\w$]*)\s+from\s*(["'])"#)
        .expect("wildcard alias regex must compile")
});

/// `export { * } from "m"`.
static BRACED_STAR_EXPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bexport\s*\{\s*\*\s*\}\s*from\b").expect("star export regex must compile")
});

/// `exports default X` (CommonJS-flavoured typo).
static EXPORTS_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[^.\w$])exports\s+default\b").expect("exports default regex must compile")
});

/// `import { a } form "m"`.
static FORM_TYPO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*\{([^}]*)\}\s*form\s*(["'])"#).expect("form typo regex must compile")
});

pub struct SyntaxNormalization;

impl SyntaxNormalization {
    fn normalize(code: &str) -> Option<String> {
        apply_rules(
            code,
            &[
                (&*WILDCARD_WRONG_KEYWORD_RE, "import * as ${1} from ${2}"),
                (&*WILDCARD_MISSING_AS_RE, "import * as ${1} from ${2}"),
                (&*BRACED_STAR_EXPORT_RE, "export * from"),
                (&*EXPORTS_DEFAULT_RE, "${1}export default"),
                (&*FORM_TYPO_RE, "import {${1}} from ${2}"),
            ],
        )
    }
}

impl ArtifactPass for SyntaxNormalization {
    fn name(&self) -> &'static str {
        "syntax_normalization"
    }

    fn apply(&self, bundle: &mut ArtifactBundle) -> Result<(), PostProcessError> {
        bundle.transformed_code = map_script_regions(&bundle.transformed_code, |open, body| {
            if is_import_map_tag(open) {
                return None;
            }
            Self::normalize(body)
        });
        Ok(())
    }
}
