//! Error taxonomy for bridge operations

use crate::handle::ContextId;
use crate::proxy::BindingId;
use crate::value::AnyValue;
use std::fmt;
use thiserror::Error;

/// Result alias used across the bridge.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Errors surfaced by bridge operations.
///
/// Every error aborts the operation that detected it. Handles acquired by that
/// operation are released by normal scope exit.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// An engine call failed. Never retried.
    #[error("engine call failed: {0}")]
    Engine(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("member '{member}' is not callable")]
    NotCallable { member: String },

    #[error("member '{member}' not found")]
    NotFound { member: String },

    #[error("proxy binding {binding} is detached")]
    DetachedProxy { binding: BindingId },

    #[error("handle belongs to {found}, operation is bound to {expected}")]
    CrossContext { expected: ContextId, found: ContextId },

    /// The script raised an exception.
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("failed to load script '{locator}'")]
    Load {
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bridge configuration")]
    Config(#[from] serde_json::Error),
}

impl BridgeError {
    pub(crate) fn mismatch(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        BridgeError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub(crate) fn cross_context(expected: ContextId, found: ContextId) -> Self {
        BridgeError::CrossContext { expected, found }
    }
}

impl From<rquickjs::Error> for BridgeError {
    fn from(err: rquickjs::Error) -> Self {
        BridgeError::Engine(err.to_string())
    }
}

/// An exception thrown by script, translated at the bridge boundary.
///
/// When the thrown object is an instance of a registered error class, the
/// reconstructed native error is available through [`ScriptError::downcast_ref`].
#[derive(Debug)]
pub struct ScriptError {
    pub(crate) name: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) display: String,
    pub(crate) stack: Option<String>,
    pub(crate) thrown: AnyValue,
    pub(crate) native: Option<Box<dyn std::error::Error + 'static>>,
}

impl ScriptError {
    /// Constructor name of the thrown object (`"Error"`, `"TypeError"`, ...).
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The `message` property of the thrown object, if it had one.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Script string conversion of the thrown value, e.g. `"Error: boom"`.
    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// The thrown value itself.
    pub fn thrown(&self) -> &AnyValue {
        &self.thrown
    }

    /// The reconstructed native error, when the thrown object matched a
    /// registered error class.
    pub fn native(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.native.as_deref()
    }

    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.native.as_deref().and_then(|err| err.downcast_ref::<E>())
    }

    pub fn is<E: std::error::Error + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script error: {}", self.display)
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.native.as_deref()
    }
}
