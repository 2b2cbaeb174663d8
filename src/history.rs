//! Layer history records as the container engine reports them.
//!
//! [`LayerRecord`] mirrors one entry of the engine history API
//! (`GET /images/{name}/history`), newest layer first. Records built from an
//! image archive use the same shape so every source feeds the decoder alike.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

/// Identifier the engine reports for layers it has no local image for.
pub const MISSING_ID: &str = "<missing>";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    #[serde(rename = "Id", default)]
    pub id: String,
    /// Seconds since the Unix epoch.
    #[serde(rename = "Created", default)]
    pub created: i64,
    #[serde(rename = "CreatedBy", default, deserialize_with = "null_as_default")]
    pub created_by: String,
    #[serde(rename = "Tags", default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(rename = "Size", default)]
    pub size: i64,
    #[serde(rename = "Comment", default, deserialize_with = "null_as_default")]
    pub comment: String,
}

impl LayerRecord {
    pub fn new(id: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_by: created_by.into(),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_created(mut self, created: i64) -> Self {
        self.created = created;
        self
    }

    pub fn is_tagged(&self) -> bool {
        !self.tags.is_empty()
    }
}

// The engine emits `null` rather than `[]` for untagged layers.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses an engine history JSON array (newest first).
pub fn parse_history_json(content: &str) -> Result<Vec<LayerRecord>> {
    serde_json::from_str(content).context("Failed to parse image history JSON")
}

pub fn load_history_file<P: AsRef<Path>>(path: P) -> Result<Vec<LayerRecord>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    parse_history_json(&content)
}
