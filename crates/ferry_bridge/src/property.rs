//! Named member access on engine objects
//!
//! Names are resolved once per context into [`PropertyKey`]s and memoized;
//! every later access reuses the engine key.

use crate::codec::{self, Marshal};
use crate::context::Scope;
use crate::engine;
use crate::error::{BridgeError, Result};
use crate::handle::{ContextId, HandleKind, OwnedHandle};
use crate::value::{MarshaledValue, ObjectRef, ValueShape};
use rquickjs::Value;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A resolved engine property id. Clones share one handle.
#[derive(Clone)]
pub struct PropertyKey {
    name: Rc<str>,
    handle: Rc<OwnedHandle>,
}

impl PropertyKey {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> ContextId {
        self.handle.context()
    }

    pub fn handle(&self) -> &OwnedHandle {
        &self.handle
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyKey")
            .field("name", &self.name)
            .field("handle", &self.handle.id().to_bits())
            .finish()
    }
}

#[derive(Default)]
pub(crate) struct KeyCache {
    keys: HashMap<Rc<str>, PropertyKey>,
    resolutions: u64,
}

impl KeyCache {
    fn get(&self, name: &str) -> Option<PropertyKey> {
        self.keys.get(name).cloned()
    }

    fn insert(&mut self, key: PropertyKey) {
        self.resolutions += 1;
        self.keys.insert(key.name.clone(), key);
    }

    /// Empties the cache; the caller drops the keys once the borrow ends.
    pub fn clear(&mut self) -> HashMap<Rc<str>, PropertyKey> {
        std::mem::take(&mut self.keys)
    }
}

/// Reads, writes and calls members of engine objects in one context.
pub struct PropertyAccessor<'s, 'js> {
    scope: &'s Scope<'js>,
}

impl<'s, 'js> PropertyAccessor<'s, 'js> {
    pub(crate) fn new(scope: &'s Scope<'js>) -> Self {
        Self { scope }
    }

    /// Resolves a member name, querying the engine only on first use.
    pub fn resolve(&self, name: &str) -> Result<PropertyKey> {
        if let Some(key) = self.scope.inner().keys.borrow().get(name) {
            return Ok(key);
        }
        let value = engine::text(self.scope, name)?;
        let handle = self.scope.persist(HandleKind::PropertyId, value)?;
        let key = PropertyKey {
            name: Rc::from(name),
            handle: Rc::new(handle),
        };
        self.scope.inner().keys.borrow_mut().insert(key.clone());
        tracing::debug!(context = %self.scope.id(), property = name, "property resolved");
        Ok(key)
    }

    /// Number of names this context has resolved through the engine.
    pub fn resolutions(&self) -> u64 {
        self.scope.inner().keys.borrow().resolutions
    }

    pub fn get<T: Marshal>(&self, object: &ObjectRef, key: &PropertyKey) -> Result<T> {
        T::from_marshaled(self.get_value(object, key, &T::shape())?)
    }

    pub fn get_value(&self, object: &ObjectRef, key: &PropertyKey, shape: &ValueShape) -> Result<MarshaledValue> {
        self.check(object, key)?;
        let target = self.target(object)?;
        let member = self.member(target, key)?;
        codec::from_engine(self.scope, member, shape)
    }

    pub fn set<T: Marshal>(&self, object: &ObjectRef, key: &PropertyKey, value: &T) -> Result<()> {
        self.set_value(object, key, &value.to_marshaled()?)
    }

    pub fn set_value(&self, object: &ObjectRef, key: &PropertyKey, value: &MarshaledValue) -> Result<()> {
        self.check(object, key)?;
        let target = self.target(object)?;
        let encoded = codec::to_engine(self.scope, value)?;
        engine::set(self.scope, target, self.key(key)?, encoded)
    }

    /// Calls a member with `object` as the receiver.
    pub fn call<T: Marshal>(&self, object: &ObjectRef, key: &PropertyKey, args: &[MarshaledValue]) -> Result<T> {
        T::from_marshaled(self.call_value(object, key, args, &T::shape())?)
    }

    pub fn call_value(
        &self,
        object: &ObjectRef,
        key: &PropertyKey,
        args: &[MarshaledValue],
        returns: &ValueShape,
    ) -> Result<MarshaledValue> {
        self.check(object, key)?;
        let target = self.target(object)?;
        let member = self.member(target.clone(), key)?;
        self.invoke(key, member, target, args, returns)
    }

    /// Whether `object` has the member, prototype chain included.
    pub fn has(&self, object: &ObjectRef, key: &PropertyKey) -> Result<bool> {
        self.check(object, key)?;
        let target = self.target(object)?;
        engine::has(self.scope, target, self.key(key)?)
    }

    /// Own enumerable member names of `object`.
    pub fn keys(&self, object: &ObjectRef) -> Result<Vec<String>> {
        self.scope.check(object.context())?;
        let target = self.target(object)?;
        engine::keys(self.scope, target)
    }

    fn check(&self, object: &ObjectRef, key: &PropertyKey) -> Result<()> {
        self.scope.check(object.context())?;
        self.scope.check(key.context())
    }

    fn key(&self, key: &PropertyKey) -> Result<Value<'js>> {
        self.scope.restore(key.handle())
    }

    /// Restores `object`, which must be an engine object.
    pub(crate) fn target(&self, object: &ObjectRef) -> Result<Value<'js>> {
        let value = self.scope.restore(object.handle())?;
        let kind = engine::classify(&value);
        if !kind.is_object() {
            return Err(BridgeError::mismatch(ValueShape::Object, kind.name()));
        }
        Ok(value)
    }

    /// Looks `key` up on `target`, prototype chain included.
    pub(crate) fn member(&self, target: Value<'js>, key: &PropertyKey) -> Result<Value<'js>> {
        let name = self.key(key)?;
        if !engine::has(self.scope, target.clone(), name.clone())? {
            return Err(BridgeError::NotFound {
                member: key.name().to_string(),
            });
        }
        engine::get(self.scope, target, name)
    }

    pub(crate) fn invoke(
        &self,
        key: &PropertyKey,
        member: Value<'js>,
        receiver: Value<'js>,
        args: &[MarshaledValue],
        returns: &ValueShape,
    ) -> Result<MarshaledValue> {
        if !member.is_function() {
            return Err(BridgeError::NotCallable {
                member: key.name().to_string(),
            });
        }
        let args = args
            .iter()
            .map(|arg| codec::to_engine(self.scope, arg))
            .collect::<Result<Vec<_>>>()?;
        let result = engine::apply(self.scope, member, receiver, args)?;
        codec::from_engine(self.scope, result, returns)
    }
}
