//! Ferry Fixtures
//!
//! Native declarations for the reference script in `assets/src.js`: its
//! globals ([`Src`]), the `SimpleObject` class, the `SimpleInterface`
//! interface and the `SpecialError` error class. The end-to-end tests in
//! `tests/` drive the bridge through these.

mod errors;
mod interface;
mod simple_object;
mod src;

pub use errors::SpecialError;
pub use interface::{expose_simple_interface, simple_interface_members, SimpleInterface, SimpleInterfaceMirror};
pub use simple_object::{SimpleObject, SimpleObjectOverrides};
pub use src::Src;

use ferry_bridge::{BridgeConfig, BridgeContext, Result, ScriptSource};
use std::path::PathBuf;

/// Directory holding the reference script.
pub fn script_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
}

pub fn config() -> BridgeConfig {
    BridgeConfig::default().with_script_root(script_root())
}

pub fn source() -> ScriptSource {
    ScriptSource::path("src.js")
}

/// Evaluates the reference script and registers its error classes.
pub fn load() -> Result<BridgeContext> {
    load_with(&config())
}

pub fn load_with(config: &BridgeConfig) -> Result<BridgeContext> {
    let bridge = BridgeContext::eval_with_config(&source(), config)?;
    bridge.with(|scope| SpecialError::register(scope))?;
    tracing::info!(context = %bridge.id(), "reference script loaded");
    Ok(bridge)
}
