//! Artifact bundles: generated code wrapped in a browser-executable shell.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Content policy for bundle shells. Module code loads from esm.sh.
pub const DEFAULT_CSP: &str = "default-src 'self'; script-src 'self' 'unsafe-inline' https://esm.sh; \
style-src 'self' 'unsafe-inline' https:; img-src * data: blob:; font-src https: data:; \
connect-src https://esm.sh";

static FULL_DOCUMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(<!doctype\s+html|<html[\s>])").expect("document detection regex must compile")
});

static DEFAULT_EXPORT_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"export\s+default\s+((?:async\s+)?(?:function\*?|class)\s+([A-Za-z_$][\w$]*))")
        .expect("default export declaration regex must compile")
});

static DEFAULT_EXPORT_IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"export\s+default\s+([A-Za-z_$][\w$]*)\s*;?")
        .expect("default export identifier regex must compile")
});

/// Artifact kinds the artifact tool accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArtifactMode {
    React,
    Html,
    Svg,
    Mermaid,
    Markdown,
    Code,
}

impl ArtifactMode {
    pub const ALL: &'static [&'static str] = &["react", "html", "svg", "mermaid", "markdown", "code"];

    /// Whether the mode is packaged as a bundle and post-processed.
    pub fn is_bundled(self) -> bool {
        matches!(self, Self::React | Self::Html)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::React | Self::Html => "html",
            Self::Svg => "svg",
            Self::Mermaid => "mmd",
            Self::Markdown => "md",
            Self::Code => "txt",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::React | Self::Html => "text/html; charset=utf-8",
            Self::Svg => "image/svg+xml",
            Self::Markdown => "text/markdown; charset=utf-8",
            Self::Mermaid | Self::Code => "text/plain; charset=utf-8",
        }
    }
}

/// A generated bundle being post-processed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArtifactBundle {
    pub raw_code: String,
    /// The full HTML document every pass rewrites.
    pub transformed_code: String,
    pub detected_dependencies: BTreeSet<String>,
    pub warnings: Vec<String>,
}

impl ArtifactBundle {
    /// Wrap an existing document without changes.
    pub fn from_document(document: impl Into<String>) -> Self {
        let document = document.into();
        Self {
            raw_code: document.clone(),
            transformed_code: document,
            ..Self::default()
        }
    }

    /// Package generated code for `mode` (react or html).
    pub fn from_generated(code: &str, mode: ArtifactMode, title: &str) -> Self {
        let transformed_code = match mode {
            ArtifactMode::Html if FULL_DOCUMENT_RE.is_match(code) => code.to_string(),
            ArtifactMode::Html => shell(title, code, None),
            _ => shell(title, "<div id=\"root\"></div>", Some(&with_react_mount(code))),
        };
        Self {
            raw_code: code.to_string(),
            transformed_code,
            ..Self::default()
        }
    }
}

fn shell(title: &str, body: &str, module_code: Option<&str>) -> String {
    let mut doc = String::new();
    doc.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    doc.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    doc.push_str(&format!(
        "<meta http-equiv=\"Content-Security-Policy\" content=\"{DEFAULT_CSP}\">\n"
    ));
    doc.push_str(&format!("<title>{}</title>\n", escape_html(title)));
    doc.push_str("<script type=\"importmap\">\n{\n  \"imports\": {}\n}\n</script>\n");
    doc.push_str("</head>\n<body>\n");
    doc.push_str(body);
    doc.push('\n');
    if let Some(code) = module_code {
        doc.push_str("<script type=\"module\">\n");
        doc.push_str(code);
        doc.push_str("\n</script>\n");
    }
    doc.push_str("</body>\n</html>\n");
    doc
}

/// Mount the default-exported component unless the code mounts itself.
fn with_react_mount(code: &str) -> String {
    if code.contains("createRoot") || code.contains("ReactDOM.render") {
        return code.to_string();
    }

    let (code, component) = if let Some(caps) = DEFAULT_EXPORT_DECL_RE.captures(code) {
        let name = caps[2].to_string();
        (DEFAULT_EXPORT_DECL_RE.replace(code, "${1}").into_owned(), name)
    } else if let Some(caps) = DEFAULT_EXPORT_IDENT_RE.captures(code) {
        let name = caps[1].to_string();
        (DEFAULT_EXPORT_IDENT_RE.replace(code, "").into_owned(), name)
    } else {
        return code.to_string();
    };

    format!(
        "{code}\n\nimport {{ createRoot as __kilnCreateRoot }} from \"react-dom/client\";\n\
         __kilnCreateRoot(document.getElementById(\"root\")).render(React.createElement({component}));"
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
