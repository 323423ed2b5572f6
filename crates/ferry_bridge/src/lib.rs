//! Ferry Script Bridge
//!
//! Moves typed native values into and out of an embedded QuickJS engine.
//!
//! ## Architecture
//!
//! - **Handles:** every engine value held outside a call is a reference-counted
//!   slot in its context's handle table ([`OwnedHandle`])
//! - **Codec:** [`Marshal`] types convert to and from engine values by
//!   [`ValueShape`]
//! - **Properties:** member names resolve once per context into [`PropertyKey`]s
//! - **Proxies:** [`ObjectProxy`] wraps an engine object; bound proxies route
//!   script calls into native instances
//! - **Contexts:** [`BridgeContext`] owns one runtime and context, and hands
//!   native code a [`Scope`] while it is active
//!
//! Everything here is single-threaded: a context and all its handles stay on
//! the thread that created them.
//!
//! ```ignore
//! let bridge = BridgeContext::eval(&ScriptSource::path("assets/src.js"))?;
//! let flag: bool = bridge.with(|scope| scope.global("booleanConst"))?;
//! ```

pub mod class;
pub mod codec;
pub mod config;
pub mod context;
mod engine;
pub mod error;
pub mod handle;
pub mod property;
pub mod proxy;
pub mod source;
pub mod surface;
pub mod value;

pub use class::ScriptClass;
pub use codec::Marshal;
pub use config::{BridgeConfig, RuntimeSettings};
pub use context::{current_context, BridgeContext, Scope};
pub use error::{BridgeError, Result, ScriptError};
pub use handle::{ContextId, HandleId, HandleKind, HandleStats, OwnedHandle};
pub use property::{PropertyAccessor, PropertyKey};
pub use proxy::{arg, reply, BindingId, MemberSignature, MemberTable, NativeObject, ObjectProxy, ProxyBinding};
pub use source::ScriptSource;
pub use value::{AnyValue, MarshaledValue, ObjectRef, ValueShape};

pub use rquickjs;
