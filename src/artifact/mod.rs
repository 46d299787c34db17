//! Artifact post-processor: ordered text rewrites over a generated bundle.
//!
//! The pipeline is fixed: dependency injection, syntax normalization,
//! shared-dependency de-duplication, literal unescaping. De-duplication parses
//! the import map as JSON, and unescaping rewrites backslashes inside
//! back-tick spans in every script region (the import map included), so
//! unescaping must come last.

pub mod bundle;
pub mod import_map;
pub mod passes;

use thiserror::Error;
use tracing::warn;

pub use bundle::{ArtifactBundle, ArtifactMode};
pub use passes::{
    ArtifactPass, DependencyDedupe, DependencyInjection, LiteralUnescape, SyntaxNormalization,
};

/// Failure of a single pass. The bundle is left as it was before that pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PostProcessError {
    #[error("import map is not valid JSON: {0}")]
    ImportMap(String),
}

/// The ordered pass list.
pub struct PostProcessor {
    passes: Vec<Box<dyn ArtifactPass>>,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessor {
    pub fn new() -> Self {
        Self {
            passes: vec![
                Box::new(DependencyInjection),
                Box::new(SyntaxNormalization),
                Box::new(DependencyDedupe),
                Box::new(LiteralUnescape),
            ],
        }
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass in order. A failing pass is recorded as a warning on the
    /// bundle and the remaining passes still run.
    pub fn run(&self, bundle: &mut ArtifactBundle) {
        for pass in &self.passes {
            if let Err(e) = pass.apply(bundle) {
                warn!(pass = pass.name(), error = %e, "Artifact pass failed");
                bundle.warnings.push(format!("{}: {e}", pass.name()));
            }
        }
    }
}
