//! Tool executors and their collaborators.

pub mod artifact;
pub mod image;
pub mod search;
pub mod storage;
pub mod tool;
pub mod types;
pub mod validation;

use std::sync::Arc;

use crate::provider::ToolDefinition;

pub use artifact::{ArtifactGenerator, ArtifactRequest, ArtifactTool, ModelArtifactGenerator};
pub use image::{ImageGenerator, ImageTool, OpenAiImageGenerator};
pub use search::{HttpSearchService, SearchHit, SearchService, WebSearchTool};
pub use storage::{InMemoryObjectStore, ObjectStore};
pub use tool::{FnTool, ToolExecutionContext, ToolExecutor};
pub use types::{Deliverable, SideEffect, ToolExecutionResult, ToolParameters};

/// The tools declared to the model for a turn, looked up by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolExecutor>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn with(mut self, tool: Arc<dyn ToolExecutor>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolExecutor>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Declarations in registration order; `None` when there are no tools.
    pub fn definitions(&self) -> Option<Vec<ToolDefinition>> {
        if self.tools.is_empty() {
            return None;
        }
        Some(self.tools.iter().map(|t| t.definition()).collect())
    }
}
