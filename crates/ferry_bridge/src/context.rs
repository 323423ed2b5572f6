//! Bridge context lifecycle
//!
//! A [`BridgeContext`] owns one engine runtime and one engine context, runs
//! the script once, and keeps the root object every lookup starts from.
//! Native code works inside [`BridgeContext::with`], which hands out a
//! [`Scope`] for the active context.

use crate::class::{self, ErrorClass, ScriptClass};
use crate::codec::Marshal;
use crate::config::BridgeConfig;
use crate::engine::{self, Helpers};
use crate::error::{BridgeError, Result};
use crate::handle::{ContextId, HandleKind, HandleStats, HandleTable, OwnedHandle, Payload, SharedTable};
use crate::property::{KeyCache, PropertyAccessor, PropertyKey};
use crate::proxy::{ObjectProxy, ProxyRegistry};
use crate::source::ScriptSource;
use crate::value::{MarshaledValue, ObjectRef};
use once_cell::unsync::OnceCell;
use rquickjs::{Context, Ctx, Runtime, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

thread_local! {
    static ACTIVE: RefCell<Vec<ContextId>> = const { RefCell::new(Vec::new()) };
}

/// Id of the context currently active on this thread, if any.
pub fn current_context() -> Option<ContextId> {
    ACTIVE.with(|stack| stack.borrow().last().copied())
}

/// Marks a context active for the duration of a scope and restores the
/// previous one on every exit path.
struct ActiveContext {
    id: ContextId,
}

impl ActiveContext {
    fn enter(id: ContextId) -> Result<Self> {
        ACTIVE.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&id) {
                return Err(BridgeError::Engine(format!(
                    "{id} is already active on this thread; use the scope passed to the running call"
                )));
            }
            stack.push(id);
            Ok(Self { id })
        })
    }
}

impl Drop for ActiveContext {
    fn drop(&mut self) {
        let _ = ACTIVE.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(position) = stack.iter().rposition(|id| *id == self.id) {
                stack.remove(position);
            }
        });
    }
}

/// State shared between a bridge context, its handles and its trampolines.
pub(crate) struct ContextInner {
    id: ContextId,
    locator: String,
    handles: SharedTable,
    pub(crate) keys: RefCell<KeyCache>,
    pub(crate) proxies: RefCell<ProxyRegistry>,
    pub(crate) error_classes: RefCell<Vec<ErrorClass>>,
    helpers: OnceCell<Helpers>,
    root: RefCell<Option<ObjectRef>>,
    context_handle: RefCell<Option<OwnedHandle>>,
    faults: RefCell<HashMap<u64, BridgeError>>,
    next_fault: Cell<u64>,
}

impl ContextInner {
    fn new(id: ContextId, locator: String) -> Self {
        Self {
            id,
            locator,
            handles: Rc::new(RefCell::new(HandleTable::new(id))),
            keys: RefCell::new(KeyCache::default()),
            proxies: RefCell::new(ProxyRegistry::default()),
            error_classes: RefCell::new(Vec::new()),
            helpers: OnceCell::new(),
            root: RefCell::new(None),
            context_handle: RefCell::new(None),
            faults: RefCell::new(HashMap::new()),
            next_fault: Cell::new(1),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Parks a native error raised inside a trampoline until the script
    /// exception carrying `token` reaches the native caller.
    pub fn park_fault(&self, err: BridgeError) -> u64 {
        let token = self.next_fault.get();
        self.next_fault.set(token + 1);
        self.faults.borrow_mut().insert(token, err);
        token
    }

    pub fn take_fault(&self, token: u64) -> Option<BridgeError> {
        self.faults.borrow_mut().remove(&token)
    }

    fn clear_faults(&self) {
        let faults = std::mem::take(&mut *self.faults.borrow_mut());
        drop(faults);
    }

    fn take_handle_fault(&self) -> Option<BridgeError> {
        self.handles.try_borrow_mut().ok()?.take_fault()
    }

    fn stats(&self) -> HandleStats {
        self.handles.borrow().stats()
    }

    /// Releases everything the context holds, in dependency order: proxy
    /// bindings are detached before their handles go, and the handle table
    /// is closed last.
    fn teardown(&self) {
        let bindings = self.proxies.borrow_mut().drain();
        let detached = bindings.len();
        drop(bindings);

        let classes = std::mem::take(&mut *self.error_classes.borrow_mut());
        drop(classes);
        let keys = self.keys.borrow_mut().clear();
        drop(keys);
        self.clear_faults();
        let root = self.root.borrow_mut().take();
        drop(root);
        let context_handle = self.context_handle.borrow_mut().take();
        drop(context_handle);

        let payloads = self.handles.borrow_mut().close();
        tracing::debug!(
            context = %self.id,
            bindings = detached,
            handles = payloads.len(),
            "context torn down"
        );
        drop(payloads);
    }
}

/// One engine runtime and context with a loaded script.
///
/// Dropping it tears the context down: bindings and handles first, then the
/// engine context, then the runtime.
pub struct BridgeContext {
    inner: Rc<ContextInner>,
    // Field order is release order: the context refers back into the runtime.
    context: Context,
    runtime: Runtime,
}

impl BridgeContext {
    /// Creates a runtime and context, then loads and runs `source` once.
    pub fn eval(source: &ScriptSource) -> Result<Self> {
        Self::eval_with_config(source, &BridgeConfig::default())
    }

    pub fn eval_with_config(source: &ScriptSource, config: &BridgeConfig) -> Result<Self> {
        let code = source.load(config)?;

        let runtime = Runtime::new()?;
        config.runtime.apply(&runtime);
        let context = Context::full(&runtime)?;

        let id = ContextId::next();
        let bridge = Self {
            inner: Rc::new(ContextInner::new(id, source.locator())),
            context,
            runtime,
        };

        bridge.with(|scope| {
            let handle = OwnedHandle::create(&scope.inner().handles, HandleKind::Context, Payload::Context)?;
            *scope.inner().context_handle.borrow_mut() = Some(handle);
            scope.helpers()?;
            engine::eval(scope, &code)?;
            let root = engine::global_object(scope)?;
            *scope.inner().root.borrow_mut() = Some(root);
            Ok(())
        })?;

        tracing::info!(context = %id, script = %bridge.inner.locator, "script evaluated");
        Ok(bridge)
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Script locator this context was evaluated from.
    pub fn locator(&self) -> &str {
        &self.inner.locator
    }

    /// Runs `f` with this context active on the current thread.
    ///
    /// Fails with `Engine` if the context is already active further up the
    /// stack, or if a handle release failed since the previous call.
    pub fn with<R, F>(&self, f: F) -> Result<R>
    where
        F: for<'js> FnOnce(&Scope<'js>) -> Result<R>,
    {
        if let Some(fault) = self.inner.take_handle_fault() {
            return Err(fault);
        }
        let _active = ActiveContext::enter(self.inner.id)?;
        let result = self.context.with(|ctx| {
            let scope = Scope::new(ctx, self.inner.clone());
            f(&scope)
        });
        // Faults not claimed by now were caught by script.
        self.inner.clear_faults();
        result
    }

    pub fn stats(&self) -> HandleStats {
        self.inner.stats()
    }

    /// Number of live proxy bindings.
    pub fn bindings(&self) -> usize {
        self.inner.proxies.borrow().len()
    }

    pub fn collect_garbage(&self) {
        self.runtime.run_gc();
    }
}

impl Drop for BridgeContext {
    fn drop(&mut self) {
        self.inner.teardown();
        tracing::info!(context = %self.inner.id, "bridge context released");
    }
}

/// View of the active context handed to native code.
///
/// Everything the bridge does with engine values happens through a scope;
/// trampolines receive the scope of the call that entered them, so native
/// overrides can call back into script without re-entering the context.
pub struct Scope<'js> {
    ctx: Ctx<'js>,
    inner: Rc<ContextInner>,
}

impl<'js> Scope<'js> {
    pub(crate) fn new(ctx: Ctx<'js>, inner: Rc<ContextInner>) -> Self {
        Self { ctx, inner }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub(crate) fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    pub(crate) fn inner(&self) -> &Rc<ContextInner> {
        &self.inner
    }

    pub(crate) fn helpers(&self) -> Result<&Helpers> {
        self.inner.helpers.get_or_try_init(|| Helpers::load(self))
    }

    /// Fails fast when a handle from another context reaches this one.
    pub(crate) fn check(&self, found: ContextId) -> Result<()> {
        if found != self.inner.id {
            return Err(BridgeError::cross_context(self.inner.id, found));
        }
        Ok(())
    }

    pub(crate) fn persist(&self, kind: HandleKind, value: Value<'js>) -> Result<OwnedHandle> {
        OwnedHandle::persist(&self.inner.handles, &self.ctx, kind, value)
    }

    pub(crate) fn restore(&self, handle: &OwnedHandle) -> Result<Value<'js>> {
        handle.restore(&self.ctx, self.inner.id)
    }

    /// The global object of the evaluated script.
    pub fn root(&self) -> Result<ObjectRef> {
        match self.inner.root.borrow().as_ref() {
            Some(root) => root.try_clone(),
            None => Err(BridgeError::Engine(format!("{} has no root object", self.inner.id))),
        }
    }

    pub fn properties(&self) -> PropertyAccessor<'_, 'js> {
        PropertyAccessor::new(self)
    }

    pub fn resolve(&self, name: &str) -> Result<PropertyKey> {
        self.properties().resolve(name)
    }

    /// Reads a global declared by the script.
    pub fn global<T: Marshal>(&self, name: &str) -> Result<T> {
        let properties = self.properties();
        let key = properties.resolve(name)?;
        properties.get(&self.root()?, &key)
    }

    pub fn set_global<T: Marshal>(&self, name: &str, value: &T) -> Result<()> {
        let properties = self.properties();
        let key = properties.resolve(name)?;
        properties.set(&self.root()?, &key, value)
    }

    /// Calls a global function with the root object as receiver.
    pub fn call_global<T: Marshal>(&self, name: &str, args: &[MarshaledValue]) -> Result<T> {
        let properties = self.properties();
        let key = properties.resolve(name)?;
        properties.call(&self.root()?, &key, args)
    }

    pub fn class(&self, name: &str) -> Result<ScriptClass> {
        ScriptClass::lookup(self, name)
    }

    /// Engine identity of two object references (`Object.is`).
    pub fn same_object(&self, a: &ObjectRef, b: &ObjectRef) -> Result<bool> {
        let left = self.restore(a.handle())?;
        let right = self.restore(b.handle())?;
        engine::same(self, left, right)
    }

    /// Wraps an engine object in an unbound proxy.
    pub fn wrap(&self, object: ObjectRef) -> Result<ObjectProxy> {
        self.check(object.context())?;
        Ok(ObjectProxy::wrap(object))
    }

    /// Registers a script error class whose instances are rebuilt as native
    /// errors when they cross the bridge.
    pub fn register_error_class<E, F>(&self, name: &str, rebuild: F) -> Result<()>
    where
        E: std::error::Error + 'static,
        F: Fn(&Scope<'_>, ObjectProxy) -> Result<E> + 'static,
    {
        class::register_error_class(self, name, rebuild)
    }

    pub fn stats(&self) -> HandleStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(code: &str) -> BridgeContext {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        BridgeContext::eval(&ScriptSource::inline("context-test.js", code)).unwrap()
    }

    #[test]
    fn eval_exposes_root_globals() {
        let bridge = bridge("var booleanConst = true;");
        let value = bridge
            .with(|scope| scope.global::<bool>("booleanConst"))
            .unwrap();
        assert!(value);
    }

    #[test]
    fn scope_marks_context_active_and_restores() {
        let bridge = bridge("");
        assert_eq!(current_context(), None);
        let seen = bridge.with(|_| Ok(current_context())).unwrap();
        assert_eq!(seen, Some(bridge.id()));
        assert_eq!(current_context(), None);

        let failed: Result<()> = bridge.with(|_| Err(BridgeError::Engine("boom".into())));
        assert!(failed.is_err());
        assert_eq!(current_context(), None);
    }

    #[test]
    fn panics_inside_scope_restore_the_previous_context() {
        let outer = bridge("");
        let inner = bridge("");
        let outcome = outer.with(|scope| {
            let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _ = inner.with(|_| -> Result<()> { panic!("native member failed") });
            }));
            assert!(unwound.is_err());
            Ok(current_context() == Some(scope.id()))
        });
        assert!(outcome.unwrap());

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = outer.with(|_| -> Result<()> { panic!("native member failed") });
        }));
        assert!(unwound.is_err());
        assert_eq!(current_context(), None);
    }

    #[test]
    fn release_failures_on_drop_surface_on_next_entry() {
        let bridge = bridge("var holder = {};");
        let holder: ObjectRef = bridge.with(|scope| scope.global("holder")).unwrap();

        // Free the slot behind the handle's back so its own release fails.
        let freed = bridge.inner.handles.borrow_mut().release(holder.handle().id()).unwrap();
        drop(freed);
        drop(holder);

        match bridge.with(|_| Ok(())) {
            Err(BridgeError::Engine(message)) => assert!(message.contains("release"), "{message}"),
            other => panic!("expected the recorded fault, got {other:?}"),
        }
        assert!(bridge.with(|_| Ok(())).is_ok());
    }

    #[test]
    fn reentering_an_active_context_fails() {
        let bridge = bridge("");
        let nested = bridge.with(|_| Ok(bridge.with(|_| Ok(()))));
        assert!(matches!(nested, Ok(Err(BridgeError::Engine(_)))));
    }

    #[test]
    fn contexts_nest_independently() {
        let outer = bridge("var name = 'outer';");
        let inner = bridge("var name = 'inner';");
        let names = outer
            .with(|scope| {
                let mine: String = scope.global("name")?;
                let theirs = inner.with(|other| {
                    assert_eq!(current_context(), Some(other.id()));
                    other.global::<String>("name")
                })?;
                assert_eq!(current_context(), Some(scope.id()));
                Ok((mine, theirs))
            })
            .unwrap();
        assert_eq!(names, ("outer".to_string(), "inner".to_string()));
    }

    #[test]
    fn script_errors_abort_eval() {
        let result = BridgeContext::eval(&ScriptSource::inline("broken.js", "throw new Error('bad load');"));
        match result {
            Err(BridgeError::Script(err)) => assert_eq!(err.message(), Some("bad load")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn handles_balance_after_operations() {
        let bridge = bridge("var items = [[1, 2], [3]]; var holder = { inner: {} };");
        let baseline = bridge.stats().live;
        bridge
            .with(|scope| {
                let _items: Vec<Vec<f64>> = scope.global("items")?;
                let holder: ObjectRef = scope.global("holder")?;
                let copy = holder.try_clone()?;
                assert!(scope.same_object(&holder, &copy)?);
                Ok(())
            })
            .unwrap();
        // Resolved property keys stay cached for the context lifetime.
        let cached = 2;
        let stats = bridge.stats();
        assert_eq!(stats.live, baseline + cached);
        assert_eq!(stats.acquired - stats.released, stats.live as u64);
    }

    #[test]
    fn independent_contexts_on_separate_threads() {
        let workers: Vec<_> = (0..2)
            .map(|n| {
                std::thread::spawn(move || {
                    let bridge = bridge(&format!("var worker = {n};"));
                    bridge.with(|scope| scope.global::<f64>("worker")).unwrap()
                })
            })
            .collect();
        let mut seen: Vec<f64> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        seen.sort_by(f64::total_cmp);
        assert_eq!(seen, vec![0.0, 1.0]);
    }
}
