//! Script source locators

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a context's script comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// A script file. Relative paths resolve against `BridgeConfig::script_root`.
    Path(PathBuf),
    /// Source text with a name used in diagnostics.
    Inline { name: String, code: String },
}

impl ScriptSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ScriptSource::Path(path.into())
    }

    pub fn inline(name: impl Into<String>, code: impl Into<String>) -> Self {
        ScriptSource::Inline {
            name: name.into(),
            code: code.into(),
        }
    }

    pub fn locator(&self) -> String {
        self.to_string()
    }

    pub(crate) fn load(&self, config: &BridgeConfig) -> Result<String> {
        match self {
            ScriptSource::Inline { code, .. } => Ok(code.clone()),
            ScriptSource::Path(path) => read(&resolve(path, config)),
        }
    }
}

fn resolve(path: &Path, config: &BridgeConfig) -> PathBuf {
    match &config.script_root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path.to_path_buf(),
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| BridgeError::Load {
        locator: path.display().to_string(),
        source,
    })
}

impl fmt::Display for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptSource::Path(path) => write!(f, "{}", path.display()),
            ScriptSource::Inline { name, .. } => write!(f, "inline:{name}"),
        }
    }
}
