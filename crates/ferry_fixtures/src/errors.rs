use ferry_bridge::{Result, Scope};
use thiserror::Error;

/// Native counterpart of the script's `SpecialError` class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SpecialError {
    pub message: String,
}

impl SpecialError {
    pub const CLASS: &'static str = "SpecialError";

    /// Registers the class so thrown instances come back as `SpecialError`.
    pub fn register(scope: &Scope<'_>) -> Result<()> {
        scope.register_error_class(Self::CLASS, |scope, thrown| {
            let message: Option<String> = thrown.get(scope, "message")?;
            Ok(SpecialError {
                message: message.unwrap_or_default(),
            })
        })
    }
}
