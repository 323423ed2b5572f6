//! Native mirror of the script's `SimpleObject` class

use ferry_bridge::{
    reply, AnyValue, Marshal, MarshaledValue, MemberSignature, MemberTable, ObjectProxy, ObjectRef, Result, Scope,
    ValueShape,
};
use std::rc::Rc;

pub struct SimpleObject {
    proxy: ObjectProxy,
}

/// Members a native subtype of `SimpleObject` replaces.
pub trait SimpleObjectOverrides: 'static {
    fn method_to_override(&self, scope: &Scope<'_>, this: &SimpleObject) -> Result<()>;
}

impl SimpleObject {
    pub const CLASS: &'static str = "SimpleObject";

    /// `new SimpleObject(value)`; the script defaults a missing value to 7.
    pub fn new(scope: &Scope<'_>, value: Option<f64>) -> Result<Self> {
        let proxy = scope.class(Self::CLASS)?.construct(scope, &constructor_args(value))?;
        Ok(Self { proxy })
    }

    /// A native subtype whose `methodToOverride` is served by `overrides`.
    pub fn derived<T: SimpleObjectOverrides>(scope: &Scope<'_>, value: Option<f64>, overrides: &Rc<T>) -> Result<Self> {
        let proxy = scope.class(Self::CLASS)?.construct_derived_with(
            scope,
            overrides,
            &constructor_args(value),
            overridden_members::<T>,
        )?;
        Ok(Self { proxy })
    }

    pub fn from_proxy(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &ObjectProxy {
        &self.proxy
    }

    pub fn object(&self) -> &ObjectRef {
        self.proxy.object()
    }

    pub fn static_void_no_arg_method(scope: &Scope<'_>) -> Result<()> {
        scope.class(Self::CLASS)?.call(scope, "staticVoidNoArgMethod", &[])
    }

    /// False until the static method has run; the script only creates the
    /// flag on first call.
    pub fn static_void_no_arg_method_called(scope: &Scope<'_>) -> Result<bool> {
        const FLAG: &str = "staticVoidNoArgMethodCalled";
        let class = scope.class(Self::CLASS)?;
        if !class.has(scope, FLAG)? {
            return Ok(false);
        }
        let called: Option<bool> = class.get(scope, FLAG)?;
        Ok(called.unwrap_or(false))
    }

    pub fn value(&self, scope: &Scope<'_>) -> Result<f64> {
        self.proxy.get(scope, "value")
    }

    pub fn method_to_override_called(&self, scope: &Scope<'_>) -> Result<bool> {
        self.proxy.get(scope, "methodToOverrideCalled")
    }

    pub fn number_single_object_arg_method(&self, scope: &Scope<'_>, a: &SimpleObject) -> Result<f64> {
        self.proxy
            .call(scope, "numberSingleObjectArgMethod", &[a.to_marshaled()?])
    }

    pub fn call_overridden_method(&self, scope: &Scope<'_>) -> Result<()> {
        self.proxy.call(scope, "callOverriddenMethod", &[])
    }

    pub fn method_to_override(&self, scope: &Scope<'_>) -> Result<()> {
        self.proxy.call(scope, "methodToOverride", &[])
    }

    /// The class's own `methodToOverride`, bypassing any native override.
    pub fn super_method_to_override(&self, scope: &Scope<'_>) -> Result<()> {
        self.proxy.call_base(scope, "methodToOverride", &[])
    }

    pub fn upcast_this_to_object(&self, scope: &Scope<'_>) -> Result<AnyValue> {
        self.proxy.call(scope, "upcastThisToObject", &[])
    }
}

fn constructor_args(value: Option<f64>) -> Vec<MarshaledValue> {
    value.map(MarshaledValue::Number).into_iter().collect()
}

fn overridden_members<T: SimpleObjectOverrides>(table: &mut MemberTable<T>) {
    table.method("methodToOverride", MemberSignature::void(), |native, scope, this, _| {
        let this = SimpleObject::from_proxy(this.try_clone()?);
        native.method_to_override(scope, &this)?;
        reply(())
    });
}

impl Marshal for SimpleObject {
    fn shape() -> ValueShape {
        ValueShape::Object
    }

    fn to_marshaled(&self) -> Result<MarshaledValue> {
        self.proxy.to_marshaled()
    }

    fn from_marshaled(value: MarshaledValue) -> Result<Self> {
        ObjectProxy::from_marshaled(value).map(SimpleObject::from_proxy)
    }
}
