//! Tool-related types: parameter schemas, execution results, side effects.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, KilnError};

/// JSON Schema-based parameter definition for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    /// JSON Schema object describing the parameters.
    pub schema: serde_json::Value,
}

impl ToolParameters {
    /// Create from a raw JSON Schema value.
    pub fn from_schema(schema: serde_json::Value) -> Self {
        Self { schema }
    }

    /// Create an empty parameter schema (no parameters accepted).
    pub fn empty() -> Self {
        Self {
            schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": false,
            }),
        }
    }

    /// Builder: create a closed object schema with properties.
    pub fn object() -> ParameterBuilder {
        ParameterBuilder {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }
}

/// Builder for constructing tool parameter schemas.
///
/// Built schemas set `additionalProperties: false`; unknown fields are rejected.
pub struct ParameterBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn property(mut self, name: impl Into<String>, schema: serde_json::Value, required: bool) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    /// Add a string property.
    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": "string",
                "description": description.into(),
            }),
            required,
        )
    }

    /// Add a string property with character-length bounds.
    pub fn bounded_string(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        min_length: usize,
        max_length: usize,
        required: bool,
    ) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": "string",
                "description": description.into(),
                "minLength": min_length,
                "maxLength": max_length,
            }),
            required,
        )
    }

    /// Add an integer property with inclusive bounds.
    pub fn integer(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        minimum: i64,
        maximum: i64,
        required: bool,
    ) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": "integer",
                "description": description.into(),
                "minimum": minimum,
                "maximum": maximum,
            }),
            required,
        )
    }

    /// Add a boolean property.
    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": "boolean",
                "description": description.into(),
            }),
            required,
        )
    }

    /// Add an enum (string) property.
    pub fn string_enum(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        values: &[&str],
        required: bool,
    ) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": "string",
                "description": description.into(),
                "enum": values,
            }),
            required,
        )
    }

    /// Add an array-of-strings property with an item cap.
    pub fn string_array(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        max_items: usize,
        required: bool,
    ) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": "array",
                "description": description.into(),
                "items": { "type": "string" },
                "maxItems": max_items,
            }),
            required,
        )
    }

    /// Build into ToolParameters.
    pub fn build(self) -> ToolParameters {
        ToolParameters {
            schema: serde_json::json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
                "additionalProperties": false,
            }),
        }
    }
}

/// A side effect an executor declares (committed or attempted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    ObjectStored { key: String, url: String },
    /// A declared write that did not complete; the payload was inlined instead.
    StorageFailed { key: String },
    SearchPerformed { provider: String, query: String },
}

/// Client-facing deliverable produced by an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Deliverable {
    Artifact(ArtifactDeliverable),
    Image(ImageDeliverable),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDeliverable {
    pub artifact_id: String,
    pub title: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Inline content when storage was unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDeliverable {
    pub image_id: String,
    pub prompt: String,
    /// Storage URL, or a `data:` URI when storage was unavailable.
    pub url: String,
    pub mime_type: String,
}

/// Outcome of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub success: bool,
    #[serde(rename = "result")]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub retryable: bool,
    #[serde(default)]
    pub side_effects: Vec<SideEffect>,
    /// A declared side effect failed; the payload is complete but inlined.
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverable: Option<Deliverable>,
}

impl ToolExecutionResult {
    pub fn success(payload: serde_json::Value) -> Self {
        Self {
            success: true,
            payload,
            error_kind: None,
            retryable: false,
            side_effects: Vec::new(),
            degraded: false,
            deliverable: None,
        }
    }

    /// Failed result carrying a client-safe message.
    pub fn failure(error: &KilnError) -> Self {
        Self {
            success: false,
            payload: serde_json::json!({
                "error": crate::output::sanitize::client_message(error),
            }),
            error_kind: Some(ErrorKind::from(error)),
            retryable: error.is_retryable(),
            side_effects: Vec::new(),
            degraded: false,
            deliverable: None,
        }
    }

    pub fn with_side_effect(mut self, effect: SideEffect) -> Self {
        if matches!(effect, SideEffect::StorageFailed { .. }) {
            self.degraded = true;
        }
        self.side_effects.push(effect);
        self
    }

    pub fn with_deliverable(mut self, deliverable: Deliverable) -> Self {
        self.deliverable = Some(deliverable);
        self
    }
}
