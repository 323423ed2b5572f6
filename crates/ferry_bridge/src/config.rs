//! Bridge configuration

use crate::error::Result;
use rquickjs::Runtime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings applied when a bridge context is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub runtime: RuntimeSettings,
    /// Base directory for relative script paths.
    pub script_root: Option<PathBuf>,
}

/// Engine runtime limits. Unset fields keep the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub memory_limit: Option<usize>,
    pub max_stack_size: Option<usize>,
    pub gc_threshold: Option<usize>,
}

impl BridgeConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_script_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.script_root = Some(root.into());
        self
    }
}

impl RuntimeSettings {
    pub(crate) fn apply(&self, runtime: &Runtime) {
        if let Some(limit) = self.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = self.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        if let Some(threshold) = self.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
    }
}
