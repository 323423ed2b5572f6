//! Native views of engine objects and native-backed members
//!
//! An [`ObjectProxy`] is how native code talks to one engine object. A proxy
//! can also carry a binding: a set of engine functions installed on the
//! object that call back into a native instance through trampolines. The
//! binding lives in the context's registry and is detached before any of its
//! handles are released, so a late call from script fails with
//! `DetachedProxy` instead of reaching freed state.

use crate::codec::{self, Marshal};
use crate::context::{ContextInner, Scope};
use crate::engine;
use crate::error::{BridgeError, Result};
use crate::handle::HandleKind;
use crate::value::{AnyValue, MarshaledValue, ObjectRef, ValueShape};
use rquickjs::{Array, Ctx, Function, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Identity of one proxy binding within its context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BindingId(u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding#{}", self.0)
    }
}

/// Parameter and result shapes of a native member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSignature {
    params: Vec<ValueShape>,
    returns: ValueShape,
}

impl MemberSignature {
    pub fn new(params: Vec<ValueShape>, returns: ValueShape) -> Self {
        Self { params, returns }
    }

    /// No parameters, no result.
    pub fn void() -> Self {
        Self::new(Vec::new(), <() as Marshal>::shape())
    }

    pub fn params(&self) -> &[ValueShape] {
        &self.params
    }

    pub fn returns(&self) -> &ValueShape {
        &self.returns
    }
}

type NativeMember<T> = Rc<dyn Fn(&T, &Scope<'_>, &ObjectProxy, Vec<MarshaledValue>) -> Result<MarshaledValue>>;
type Trampoline = Rc<dyn Fn(&Scope<'_>, &ObjectProxy, Vec<MarshaledValue>) -> Result<MarshaledValue>>;

/// Members a native type exposes to script.
pub struct MemberTable<T> {
    members: Vec<(Rc<str>, MemberSignature, NativeMember<T>)>,
}

impl<T: 'static> MemberTable<T> {
    fn new() -> Self {
        Self { members: Vec::new() }
    }

    /// Adds a member. The closure gets the native instance, the active scope,
    /// the receiving object and the converted arguments.
    pub fn method<F>(&mut self, name: &str, signature: MemberSignature, member: F) -> &mut Self
    where
        F: Fn(&T, &Scope<'_>, &ObjectProxy, Vec<MarshaledValue>) -> Result<MarshaledValue> + 'static,
    {
        self.members.retain(|(existing, _, _)| &**existing != name);
        self.members.push((Rc::from(name), signature, Rc::new(member)));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(name, _, _)| &**name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A native type whose members can back an engine object.
pub trait NativeObject: Sized + 'static {
    fn members(table: &mut MemberTable<Self>);
}

struct Member {
    signature: MemberSignature,
    trampoline: Trampoline,
}

// Field order matters: trampolines go before the object handle.
pub(crate) struct Binding {
    members: HashMap<Rc<str>, Member>,
    native: usize,
    object: ObjectRef,
}

/// Live bindings of one context.
#[derive(Default)]
pub(crate) struct ProxyRegistry {
    next: u64,
    bindings: HashMap<BindingId, Binding>,
}

impl ProxyRegistry {
    fn allocate(&mut self) -> BindingId {
        self.next += 1;
        BindingId(self.next)
    }

    fn insert(&mut self, id: BindingId, binding: Binding) {
        self.bindings.insert(id, binding);
    }

    fn remove(&mut self, id: BindingId) -> Option<Binding> {
        self.bindings.remove(&id)
    }

    fn objects_of(&self, native: usize) -> Result<Vec<ObjectRef>> {
        self.bindings
            .values()
            .filter(|binding| binding.native == native)
            .map(|binding| binding.object.try_clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Removes every binding; the caller drops them once the borrow ends.
    pub fn drain(&mut self) -> Vec<Binding> {
        self.bindings.drain().map(|(_, binding)| binding).collect()
    }
}

/// Detaches its binding from the registry when dropped.
pub struct ProxyBinding {
    id: BindingId,
    owner: Weak<ContextInner>,
}

impl ProxyBinding {
    pub fn id(&self) -> BindingId {
        self.id
    }

    fn detach(&self) -> bool {
        let Some(inner) = self.owner.upgrade() else {
            return false;
        };
        let binding = inner.proxies.borrow_mut().remove(self.id);
        let detached = binding.is_some();
        // Trampolines, then handles, all outside the registry borrow.
        drop(binding);
        if detached {
            tracing::debug!(context = %inner.id(), binding = %self.id, "proxy unbound");
        }
        detached
    }
}

impl Drop for ProxyBinding {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for ProxyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProxyBinding").field(&self.id).finish()
    }
}

/// Native view of one engine object.
///
/// Unbound proxies only forward to script. Bound proxies also own the
/// binding that routes the object's native-backed members to a native
/// instance; dropping the proxy unbinds it.
pub struct ObjectProxy {
    // Detach before the object reference is released.
    binding: Option<ProxyBinding>,
    object: ObjectRef,
}

impl ObjectProxy {
    pub fn wrap(object: ObjectRef) -> Self {
        Self { binding: None, object }
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn binding(&self) -> Option<BindingId> {
        self.binding.as_ref().map(ProxyBinding::id)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// An unbound view of the same object.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self::wrap(self.object.try_clone()?))
    }

    pub fn get<T: Marshal>(&self, scope: &Scope<'_>, name: &str) -> Result<T> {
        let properties = scope.properties();
        let key = properties.resolve(name)?;
        properties.get(&self.object, &key)
    }

    /// Whether the object has `name`, prototype chain included.
    pub fn has(&self, scope: &Scope<'_>, name: &str) -> Result<bool> {
        let properties = scope.properties();
        let key = properties.resolve(name)?;
        properties.has(&self.object, &key)
    }

    pub fn set<T: Marshal>(&self, scope: &Scope<'_>, name: &str, value: &T) -> Result<()> {
        let properties = scope.properties();
        let key = properties.resolve(name)?;
        properties.set(&self.object, &key, value)
    }

    /// Calls a member through the engine object, so overrides on either side
    /// take effect.
    pub fn call<T: Marshal>(&self, scope: &Scope<'_>, name: &str, args: &[MarshaledValue]) -> Result<T> {
        let properties = scope.properties();
        let key = properties.resolve(name)?;
        properties.call(&self.object, &key, args)
    }

    /// Calls the prototype's member with this object as receiver, skipping
    /// any override installed on the object itself.
    pub fn call_base<T: Marshal>(&self, scope: &Scope<'_>, name: &str, args: &[MarshaledValue]) -> Result<T> {
        scope.check(self.object.context())?;
        let properties = scope.properties();
        let key = properties.resolve(name)?;
        let target = properties.target(&self.object)?;
        let prototype = engine::prototype(scope, target.clone())?;
        if !engine::classify(&prototype).is_object() {
            return Err(BridgeError::NotFound {
                member: name.to_string(),
            });
        }
        let member = properties.member(prototype, &key)?;
        T::from_marshaled(properties.invoke(&key, member, target, args, &T::shape())?)
    }

    /// Binds `native` to `object` using the members of `T`.
    pub fn bind<T: NativeObject>(scope: &Scope<'_>, native: &Rc<T>, object: ObjectRef) -> Result<Self> {
        Self::bind_with(scope, native, object, T::members)
    }

    /// Binds `native` to `object`, installing one engine function per member
    /// in the table `build` fills.
    pub fn bind_with<T: 'static>(
        scope: &Scope<'_>,
        native: &Rc<T>,
        object: ObjectRef,
        build: impl FnOnce(&mut MemberTable<T>),
    ) -> Result<Self> {
        scope.check(object.context())?;
        let target = scope.properties().target(&object)?;

        let native_id = Rc::as_ptr(native) as *const () as usize;
        let bound = scope.inner().proxies.borrow().objects_of(native_id)?;
        for other in &bound {
            if scope.same_object(other, &object)? {
                return Err(BridgeError::Engine(
                    "native instance is already bound to this object".to_string(),
                ));
            }
        }
        drop(bound);

        let mut table = MemberTable::new();
        build(&mut table);

        let id = scope.inner().proxies.borrow_mut().allocate();
        let mut members = HashMap::new();
        for (name, signature, member) in table.members {
            let function = native_function(scope, id, name.clone())?;
            engine::set(scope, target.clone(), engine::text(scope, &name)?, function)?;
            let trampoline = weak_trampoline(native, id, member);
            members.insert(name, Member { signature, trampoline });
        }

        Self::attach(scope, id, native_id, object, members)
    }

    /// A script-callable function served by `native`.
    pub fn function_with<T: 'static, F>(
        scope: &Scope<'_>,
        native: &Rc<T>,
        signature: MemberSignature,
        member: F,
    ) -> Result<Self>
    where
        F: Fn(&T, &Scope<'_>, &ObjectProxy, Vec<MarshaledValue>) -> Result<MarshaledValue> + 'static,
    {
        let id = scope.inner().proxies.borrow_mut().allocate();
        let name: Rc<str> = Rc::from("call");
        let function = native_function(scope, id, name.clone())?;
        let object = ObjectRef::new(scope.persist(HandleKind::Value, function)?);

        let trampoline = weak_trampoline(native, id, Rc::new(member));
        let mut members = HashMap::new();
        members.insert(name, Member { signature, trampoline });

        let native_id = Rc::as_ptr(native) as *const () as usize;
        Self::attach(scope, id, native_id, object, members)
    }

    fn attach(
        scope: &Scope<'_>,
        id: BindingId,
        native: usize,
        object: ObjectRef,
        members: HashMap<Rc<str>, Member>,
    ) -> Result<Self> {
        let count = members.len();
        let binding = Binding {
            members,
            native,
            object: object.try_clone()?,
        };
        scope.inner().proxies.borrow_mut().insert(id, binding);
        tracing::debug!(context = %scope.id(), binding = %id, members = count, "proxy bound");

        Ok(Self {
            binding: Some(ProxyBinding {
                id,
                owner: Rc::downgrade(scope.inner()),
            }),
            object,
        })
    }

    /// Calls this object as a function, with no receiver.
    pub fn invoke<T: Marshal>(&self, scope: &Scope<'_>, args: &[MarshaledValue]) -> Result<T> {
        let function = scope.restore(self.object.handle())?;
        if !function.is_function() {
            return Err(BridgeError::NotCallable {
                member: engine::classify(&function).name().to_string(),
            });
        }
        let args = args
            .iter()
            .map(|arg| codec::to_engine(scope, arg))
            .collect::<Result<Vec<_>>>()?;
        let receiver = Value::new_undefined(scope.ctx().clone());
        let result = engine::apply(scope, function, receiver, args)?;
        codec::decode(scope, result)
    }

    /// A fresh engine object whose members are served by `native`.
    pub fn implement<T: NativeObject>(scope: &Scope<'_>, native: &Rc<T>) -> Result<Self> {
        Self::implement_with(scope, native, T::members)
    }

    pub fn implement_with<T: 'static>(
        scope: &Scope<'_>,
        native: &Rc<T>,
        build: impl FnOnce(&mut MemberTable<T>),
    ) -> Result<Self> {
        let object = engine::new_object(scope)?;
        let object = ObjectRef::new(scope.persist(HandleKind::Value, object)?);
        Self::bind_with(scope, native, object, build)
    }

    /// Detaches the binding. Returns whether one was attached.
    pub fn unbind(&mut self) -> bool {
        self.binding.take().map(|binding| binding.detach()).unwrap_or(false)
    }
}

impl Marshal for ObjectProxy {
    fn shape() -> ValueShape {
        ValueShape::Object
    }

    fn to_marshaled(&self) -> Result<MarshaledValue> {
        Ok(MarshaledValue::Object(self.object.try_clone()?))
    }

    fn from_marshaled(value: MarshaledValue) -> Result<Self> {
        ObjectRef::from_marshaled(value).map(ObjectProxy::wrap)
    }
}

impl fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("object", &self.object)
            .field("binding", &self.binding())
            .finish()
    }
}

fn trampoline<F>(f: F) -> Trampoline
where
    F: Fn(&Scope<'_>, &ObjectProxy, Vec<MarshaledValue>) -> Result<MarshaledValue> + 'static,
{
    Rc::new(f)
}

/// Trampoline holding the native instance weakly.
fn weak_trampoline<T: 'static>(native: &Rc<T>, binding: BindingId, member: NativeMember<T>) -> Trampoline {
    let instance = Rc::downgrade(native);
    trampoline(move |scope, this, args| {
        let native = instance.upgrade().ok_or(BridgeError::DetachedProxy { binding })?;
        member(&*native, scope, this, args)
    })
}

/// Engine function for one bound member. It captures only ids and a weak
/// context reference, so it can outlive the binding safely.
fn native_function<'js>(scope: &Scope<'js>, binding: BindingId, member: Rc<str>) -> Result<Value<'js>> {
    let owner = Rc::downgrade(scope.inner());
    let entry = Function::new(
        scope.ctx().clone(),
        move |ctx: Ctx<'js>, this: Value<'js>, args: Array<'js>| -> rquickjs::Result<Value<'js>> {
            enter(ctx, &owner, binding, &member, this, args)
        },
    )?;
    engine::wrap(scope, entry)
}

/// Runs a trampoline and packs the outcome as `[true, value]` or
/// `[false, message, token]` for the script-side wrapper.
fn enter<'js>(
    ctx: Ctx<'js>,
    owner: &Weak<ContextInner>,
    binding: BindingId,
    member: &str,
    this: Value<'js>,
    args: Array<'js>,
) -> rquickjs::Result<Value<'js>> {
    let reply = Array::new(ctx.clone())?;
    let Some(inner) = owner.upgrade() else {
        reply.set(0, false)?;
        reply.set(1, format!("{binding} outlived its context"))?;
        return Ok(reply.into_value());
    };

    let scope = Scope::new(ctx, inner);
    match dispatch(&scope, binding, member, this, args) {
        Ok(value) => {
            reply.set(0, true)?;
            reply.set(1, value)?;
        }
        Err(err) => {
            tracing::debug!(context = %scope.id(), %binding, member, %err, "native member failed");
            let message = err.to_string();
            let token = scope.inner().park_fault(err);
            reply.set(0, false)?;
            reply.set(1, message)?;
            reply.set(2, token as f64)?;
        }
    }
    Ok(reply.into_value())
}

fn dispatch<'js>(
    scope: &Scope<'js>,
    binding: BindingId,
    member: &str,
    this: Value<'js>,
    args: Array<'js>,
) -> Result<Value<'js>> {
    let (signature, trampoline, object) = {
        let registry = scope.inner().proxies.borrow();
        let entry = registry
            .bindings
            .get(&binding)
            .ok_or(BridgeError::DetachedProxy { binding })?;
        let bound = entry.members.get(member).ok_or_else(|| BridgeError::NotFound {
            member: member.to_string(),
        })?;
        (bound.signature.clone(), bound.trampoline.clone(), entry.object.try_clone()?)
    };

    let mut decoded = Vec::with_capacity(signature.params.len());
    for (index, shape) in signature.params.iter().enumerate() {
        let value: Value = args.get(index)?;
        decoded.push(codec::from_engine(scope, value, shape)?);
    }

    // Script may call a bound member on an object that inherits it.
    let receiver = if engine::classify(&this).is_object() {
        ObjectRef::new(scope.persist(HandleKind::Value, this)?)
    } else {
        object
    };

    tracing::trace!(context = %scope.id(), %binding, member, "trampoline entered");
    let result = trampoline(scope, &ObjectProxy::wrap(receiver), decoded)?;
    codec::to_engine(scope, &result)
}

/// Converts the native result of a member for the trampoline reply.
pub fn reply<T: Marshal>(value: T) -> Result<MarshaledValue> {
    value.to_marshaled()
}

/// Takes the next converted argument as `T`.
pub fn arg<T: Marshal>(args: &mut std::vec::IntoIter<MarshaledValue>) -> Result<T> {
    match args.next() {
        Some(value) => T::from_marshaled(value),
        None => T::from_marshaled(MarshaledValue::Any(AnyValue::Undefined)),
    }
}
