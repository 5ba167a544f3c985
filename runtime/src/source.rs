//! Discovered base image references and their replacements.

use std::path::Path;

use dockersource_core::error::{Result, WrapperError};
use serde::{Deserialize, Serialize};

/// Kind of build input a source record rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceType {
    /// Container image, spelled the way `--build-context` expects it
    #[serde(rename = "docker-image")]
    ContainerImage,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::ContainerImage => "docker-image",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unique base image reference found in a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    #[serde(rename = "type")]
    pub source_type: SourceType,

    #[serde(rename = "ref")]
    pub reference: String,

    /// Empty means "leave this reference alone"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replace: String,
}

impl ReferenceRecord {
    pub fn image(reference: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::ContainerImage,
            reference: reference.into(),
            replace: replace.into(),
        }
    }

    /// `--build-context` value binding this reference to its replacement.
    pub fn build_context(&self) -> Option<String> {
        if self.replace.is_empty() {
            return None;
        }
        Some(format!(
            "{}={}://{}",
            self.reference, self.source_type, self.replace
        ))
    }
}

/// Persisted substitution result (the "modfile").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionResult {
    pub sources: Vec<ReferenceRecord>,
}

impl SubstitutionResult {
    /// Build a result with records sorted and de-duplicated by reference.
    pub fn new(mut sources: Vec<ReferenceRecord>) -> Self {
        sources.sort_by(|a, b| a.reference.cmp(&b.reference));
        sources.dedup_by(|a, b| a.reference == b.reference);
        Self { sources }
    }

    /// Load a previously written result file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            WrapperError::ConfigError(format!(
                "error reading specified modfile path {}: {}",
                path.display(),
                e
            ))
        })?;
        let parsed: Self = serde_json::from_slice(&data).map_err(|e| {
            WrapperError::SerializationError(format!(
                "error parsing specified modfile {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::new(parsed.sources))
    }

    /// Tab-indented JSON, records sorted by reference.
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        String::from_utf8(buf).map_err(|e| WrapperError::SerializationError(e.to_string()))
    }

    /// `--build-context` flags for every record with a replacement.
    pub fn as_flags(&self) -> String {
        self.sources
            .iter()
            .filter_map(ReferenceRecord::build_context)
            .map(|ctx| format!("--build-context {}", ctx))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
