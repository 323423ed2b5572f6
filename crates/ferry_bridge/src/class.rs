//! Script classes seen from native code
//!
//! [`ScriptClass`] wraps a constructor found on the root object. Exact-type
//! construction makes a plain engine instance; derived construction layers a
//! native-backed object over one so native overrides win member lookup.

use crate::codec::{self, Marshal};
use crate::context::Scope;
use crate::engine;
use crate::error::{BridgeError, Result};
use crate::handle::HandleKind;
use crate::proxy::{MemberTable, NativeObject, ObjectProxy};
use crate::value::{MarshaledValue, ObjectRef};
use std::error::Error;
use std::rc::Rc;

pub struct ScriptClass {
    name: Rc<str>,
    constructor: ObjectProxy,
}

impl ScriptClass {
    /// Finds the constructor named `name` on the root object.
    pub fn lookup(scope: &Scope<'_>, name: &str) -> Result<Self> {
        let properties = scope.properties();
        let key = properties.resolve(name)?;
        let root = properties.target(&scope.root()?)?;
        let constructor = properties.member(root, &key)?;
        if !constructor.is_function() {
            return Err(BridgeError::NotCallable {
                member: name.to_string(),
            });
        }
        let constructor = ObjectRef::new(scope.persist(HandleKind::Value, constructor)?);
        tracing::debug!(context = %scope.id(), class = name, "script class resolved");
        Ok(Self {
            name: Rc::from(name),
            constructor: ObjectProxy::wrap(constructor),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constructor(&self) -> &ObjectProxy {
        &self.constructor
    }

    /// A direct instance of the class; no native binding is created.
    pub fn construct(&self, scope: &Scope<'_>, args: &[MarshaledValue]) -> Result<ObjectProxy> {
        let constructor = scope.restore(self.constructor.object().handle())?;
        let args = args
            .iter()
            .map(|arg| codec::to_engine(scope, arg))
            .collect::<Result<Vec<_>>>()?;
        let instance = engine::construct(scope, constructor, args)?;
        let instance = ObjectRef::new(scope.persist(HandleKind::Value, instance)?);
        tracing::debug!(context = %scope.id(), class = %self.name, "instance constructed");
        Ok(ObjectProxy::wrap(instance))
    }

    /// An instance of a native subtype: `native` serves the members of `T`,
    /// everything else falls through to a base instance built with `args`.
    pub fn construct_derived<T: NativeObject>(
        &self,
        scope: &Scope<'_>,
        native: &Rc<T>,
        args: &[MarshaledValue],
    ) -> Result<ObjectProxy> {
        self.construct_derived_with(scope, native, args, T::members)
    }

    pub fn construct_derived_with<T: 'static>(
        &self,
        scope: &Scope<'_>,
        native: &Rc<T>,
        args: &[MarshaledValue],
        build: impl FnOnce(&mut MemberTable<T>),
    ) -> Result<ObjectProxy> {
        let base = self.construct(scope, args)?;
        let base = scope.restore(base.object().handle())?;
        let derived = engine::create(scope, base)?;
        let derived = ObjectRef::new(scope.persist(HandleKind::Value, derived)?);
        ObjectProxy::bind_with(scope, native, derived, build)
    }

    pub fn get<T: Marshal>(&self, scope: &Scope<'_>, name: &str) -> Result<T> {
        self.constructor.get(scope, name)
    }

    pub fn set<T: Marshal>(&self, scope: &Scope<'_>, name: &str, value: &T) -> Result<()> {
        self.constructor.set(scope, name, value)
    }

    /// Whether the constructor has the static member `name`.
    pub fn has(&self, scope: &Scope<'_>, name: &str) -> Result<bool> {
        self.constructor.has(scope, name)
    }

    /// Calls a static member.
    pub fn call<T: Marshal>(&self, scope: &Scope<'_>, name: &str, args: &[MarshaledValue]) -> Result<T> {
        self.constructor.call(scope, name, args)
    }

    /// `object instanceof <class>`.
    pub fn is_instance(&self, scope: &Scope<'_>, object: &ObjectRef) -> Result<bool> {
        let value = scope.restore(object.handle())?;
        let constructor = scope.restore(self.constructor.object().handle())?;
        engine::instance_of(scope, value, constructor)
    }
}

impl std::fmt::Debug for ScriptClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptClass")
            .field("name", &self.name)
            .field("constructor", self.constructor.object())
            .finish()
    }
}

type Rebuild = Rc<dyn Fn(&Scope<'_>, ObjectProxy) -> Result<Box<dyn Error>>>;

/// A script error class and how to rebuild its native counterpart.
pub(crate) struct ErrorClass {
    class: ScriptClass,
    rebuild: Rebuild,
}

fn rebuild_fn<F>(f: F) -> Rebuild
where
    F: Fn(&Scope<'_>, ObjectProxy) -> Result<Box<dyn Error>> + 'static,
{
    Rc::new(f)
}

pub(crate) fn register_error_class<E, F>(scope: &Scope<'_>, name: &str, rebuild: F) -> Result<()>
where
    E: Error + 'static,
    F: Fn(&Scope<'_>, ObjectProxy) -> Result<E> + 'static,
{
    let class = ScriptClass::lookup(scope, name)?;
    let rebuild = rebuild_fn(move |scope, thrown| Ok(Box::new(rebuild(scope, thrown)?) as Box<dyn Error>));
    scope
        .inner()
        .error_classes
        .borrow_mut()
        .push(ErrorClass { class, rebuild });
    tracing::debug!(context = %scope.id(), class = name, "error class registered");
    Ok(())
}

/// Rebuilds the native error for `thrown` using the first registered class
/// it is an instance of.
pub(crate) fn reconstruct(scope: &Scope<'_>, thrown: &ObjectRef) -> Result<Option<Box<dyn Error>>> {
    let candidates = scope
        .inner()
        .error_classes
        .borrow()
        .iter()
        .map(|entry| -> Result<_> { Ok((entry.class.constructor.object().try_clone()?, entry.rebuild.clone())) })
        .collect::<Result<Vec<_>>>()?;

    let value = scope.restore(thrown.handle())?;
    for (constructor, rebuild) in candidates {
        let constructor = scope.restore(constructor.handle())?;
        if engine::instance_of(scope, value.clone(), constructor)? {
            return rebuild(scope, ObjectProxy::wrap(thrown.try_clone()?)).map(Some);
        }
    }
    Ok(None)
}
