//! The `SimpleInterface` contract, from both sides

use ferry_bridge::{reply, MemberSignature, MemberTable, ObjectProxy, Result, Scope};
use std::rc::Rc;

pub trait SimpleInterface {
    fn void_no_arg_method(&self, scope: &Scope<'_>) -> Result<()>;
}

/// A script object implementing the interface.
pub struct SimpleInterfaceMirror {
    proxy: ObjectProxy,
}

impl SimpleInterfaceMirror {
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &ObjectProxy {
        &self.proxy
    }
}

impl SimpleInterface for SimpleInterfaceMirror {
    fn void_no_arg_method(&self, scope: &Scope<'_>) -> Result<()> {
        self.proxy.call(scope, "voidNoArgMethod", &[])
    }
}

/// Script-visible members of a native implementation.
pub fn simple_interface_members<T: SimpleInterface + 'static>(table: &mut MemberTable<T>) {
    table.method("voidNoArgMethod", MemberSignature::void(), |native, scope, _, _| {
        native.void_no_arg_method(scope)?;
        reply(())
    });
}

/// Exposes a native implementation to script as a fresh object.
///
/// The returned proxy owns the binding; script calls fail with
/// `DetachedProxy` once it is dropped.
pub fn expose_simple_interface<T: SimpleInterface + 'static>(scope: &Scope<'_>, native: &Rc<T>) -> Result<ObjectProxy> {
    ObjectProxy::implement_with(scope, native, simple_interface_members::<T>)
}
