use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_STAGE_CONCURRENCY: usize = 10;

fn default_concurrency() -> usize {
    DEFAULT_STAGE_CONCURRENCY
}

/// One stage of the scan chain: its name, the ordered plugins it runs, and
/// its worker-pool budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Everything the pipeline needs to know about one scan task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    pub id: String,
    pub name: String,
    pub target: String,
    pub stages: Vec<StageConfig>,
    /// stage name -> plugin name -> "-flag value" parameter string.
    #[serde(default)]
    pub parameters: HashMap<String, HashMap<String, String>>,
}

impl TaskOptions {
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read task file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse task file {}", path.display()))
    }

    /// The parameter string configured for (stage, plugin), or `""`.
    pub fn parameter_for(&self, stage: &str, plugin: &str) -> String {
        self.parameters
            .get(stage)
            .and_then(|plugins| plugins.get(plugin))
            .cloned()
            .unwrap_or_default()
    }
}
