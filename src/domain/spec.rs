//! Pipeline submission documents.
//!
//! A PipelineSpec is the YAML form of a run request: an ordered list of
//! step names plus the argument mapping handed to every step. Step names
//! are validated against the step registry at submission, not here.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::run::StepArgs;

/// A pipeline submission document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name (informational)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Ordered list of step names to execute
    pub steps: Vec<String>,

    /// Arguments passed to every step
    #[serde(default)]
    pub args: StepArgs,
}

impl PipelineSpec {
    /// Load a spec from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline spec: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a spec from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline spec YAML")
    }

    /// Validate the spec shape
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Pipeline name cannot be empty");
        }

        if self.steps.is_empty() {
            anyhow::bail!("Pipeline must have at least one step");
        }

        Ok(())
    }
}
