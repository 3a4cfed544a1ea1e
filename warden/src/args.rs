//! Tool arguments as they arrive from the orchestration layer.
//!
//! Agents send loosely typed JSON: booleans as strings, absent values as the
//! string `"null"`. Normalization happens here, explicitly, so the gateway
//! itself only ever sees typed values.

use crate::boundary::effective_subdirectory;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Case-insensitive string tokens accepted as `true`.
pub const TRUTHY_TOKENS: &[&str] = &["true", "1", "yes", "y", "on", "t"];

/// Whether a string token means `true`. Anything outside the truthy set is false.
pub fn is_truthy(token: &str) -> bool {
    let token = token.trim();
    TRUTHY_TOKENS
        .iter()
        .any(|truthy| truthy.eq_ignore_ascii_case(token))
}

/// The `overwrite` flag of a write request.
///
/// Deserializes from a JSON bool, a string token, a number (non-zero is true)
/// or null (false).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct OverwriteFlag(#[schemars(with = "serde_json::Value")] pub bool);

impl OverwriteFlag {
    pub fn get(self) -> bool {
        self.0
    }

    pub fn from_token(token: &str) -> Self {
        Self(is_truthy(token))
    }
}

impl From<bool> for OverwriteFlag {
    fn from(value: bool) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for OverwriteFlag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Text(String),
            Int(i64),
            Float(f64),
        }

        let raw = Option::<Raw>::deserialize(deserializer)?;
        Ok(Self(match raw {
            None => false,
            Some(Raw::Bool(value)) => value,
            Some(Raw::Text(token)) => is_truthy(&token),
            Some(Raw::Int(n)) => n != 0,
            Some(Raw::Float(n)) => n != 0.0,
        }))
    }
}

/// Arguments of the file writer tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct WriteRequest {
    /// File name, relative to the workspace (or to `subdirectory`).
    pub filename: String,
    /// Text written to the file.
    pub content: String,
    /// Optional subdirectory of the workspace. `"null"`/`"none"` mean none.
    #[serde(default, alias = "directory")]
    pub subdirectory: Option<String>,
    /// Replace an existing file. Accepts booleans and truthy string tokens.
    #[serde(default)]
    pub overwrite: OverwriteFlag,
}

impl WriteRequest {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            subdirectory: None,
            overwrite: OverwriteFlag::default(),
        }
    }

    pub fn with_subdirectory(mut self, subdirectory: impl Into<String>) -> Self {
        self.subdirectory = Some(subdirectory.into());
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = OverwriteFlag(overwrite);
        self
    }

    /// The subdirectory after token normalization.
    pub fn subdirectory(&self) -> Option<&str> {
        effective_subdirectory(self.subdirectory.as_deref())
    }
}

/// Arguments of the file reader tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ReadRequest {
    /// Path of the file, relative to the workspace.
    #[serde(alias = "file_path")]
    pub path: String,
}

impl ReadRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}
