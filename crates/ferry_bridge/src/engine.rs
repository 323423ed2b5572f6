//! Engine adapter
//!
//! Member access, calls, prototype work and identity checks all run through
//! a fixed set of script helpers, evaluated once per context and kept alive
//! as owned handles. This is also where pending script exceptions are turned
//! into [`BridgeError`]s.

use crate::class;
use crate::codec;
use crate::context::Scope;
use crate::error::{BridgeError, Result, ScriptError};
use crate::handle::{HandleKind, OwnedHandle};
use crate::value::ObjectRef;
use rquickjs::function::IntoArgs;
use rquickjs::{Array, Function, Value};

// Fault tokens live in a map only the helpers can reach, so script cannot
// attach one to an error it builds itself.
const HELPERS: &str = r#"(function () {
  "use strict";
  var faults = new WeakMap();
  return [
    function (o, k) { return o[k]; },
    function (o, k, v) { o[k] = v; },
    function (o, k) { return k in o; },
    function (f, t, a) { return Reflect.apply(f, t, a); },
    function (c, a) { return Reflect.construct(c, a); },
    function (p) { return Object.create(p); },
    function (o) { return Object.getPrototypeOf(o); },
    function (a, b) { return Object.is(a, b); },
    function (v, c) { return v instanceof c; },
    function (v) { return String(v); },
    function (o) { return Object.keys(o); },
    function (native) {
      return function () {
        var reply = native(this, Array.prototype.slice.call(arguments));
        if (reply[0]) { return reply[1]; }
        var error = new Error(reply[1]);
        if (reply.length > 2) { faults.set(error, reply[2]); }
        throw error;
      };
    },
    function () { return {}; },
    function (e) { return e !== null && typeof e === "object" ? faults.get(e) : undefined; }
  ];
})()"#;

/// Index into the helper list; order matches `HELPERS`.
#[derive(Debug, Copy, Clone)]
enum Helper {
    Get,
    Set,
    Has,
    Apply,
    Construct,
    Create,
    Prototype,
    Same,
    InstanceOf,
    Stringify,
    Keys,
    Wrap,
    NewObject,
    FaultOf,
}

const HELPER_COUNT: usize = 14;

pub(crate) struct Helpers {
    functions: Vec<OwnedHandle>,
}

impl Helpers {
    pub fn load(scope: &Scope<'_>) -> Result<Self> {
        // Not routed through `settle`: translating an exception needs the helpers.
        let list: Array = scope.ctx().eval(HELPERS)?;
        let mut functions = Vec::with_capacity(list.len());
        for index in 0..list.len() {
            let function: Value = list.get(index)?;
            functions.push(scope.persist(HandleKind::Value, function)?);
        }
        if functions.len() != HELPER_COUNT {
            return Err(BridgeError::Engine(format!(
                "expected {HELPER_COUNT} engine helpers, loaded {}",
                functions.len()
            )));
        }
        tracing::debug!(context = %scope.id(), helpers = functions.len(), "engine helpers loaded");
        Ok(Self { functions })
    }

    fn function<'js>(&self, scope: &Scope<'js>, helper: Helper) -> Result<Function<'js>> {
        let value = scope.restore(&self.functions[helper as usize])?;
        value
            .into_function()
            .ok_or_else(|| BridgeError::Engine(format!("helper {helper:?} is not a function")))
    }
}

/// Engine type of a value, in the order "any" discriminates them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Kind {
    Boolean,
    Number,
    Text,
    Array,
    Object,
    Null,
    Undefined,
    /// Symbols, big integers and anything else outside the order.
    Other,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Boolean => "boolean",
            Kind::Number => "number",
            Kind::Text => "string",
            Kind::Array => "array",
            Kind::Object => "object",
            Kind::Null => "null",
            Kind::Undefined => "undefined",
            Kind::Other => "opaque value",
        }
    }

    pub fn is_object(self) -> bool {
        matches!(self, Kind::Array | Kind::Object)
    }
}

pub(crate) fn classify(value: &Value<'_>) -> Kind {
    if value.is_undefined() {
        Kind::Undefined
    } else if value.is_null() {
        Kind::Null
    } else if value.is_bool() {
        Kind::Boolean
    } else if value.is_number() {
        Kind::Number
    } else if value.is_string() {
        Kind::Text
    } else if value.is_array() {
        Kind::Array
    } else if value.is_object() {
        Kind::Object
    } else {
        Kind::Other
    }
}

/// Best-effort text, for diagnostics only.
pub(crate) fn text_of(value: &Value<'_>) -> Option<String> {
    value.as_string()?.to_string().ok()
}

/// An engine string as UTF-8.
///
/// Strings holding lone surrogates have no UTF-8 form and fail with
/// `Engine`; a value that is not a string at all is a `TypeMismatch`.
pub(crate) fn string_of(value: &Value<'_>) -> Result<String> {
    let Some(text) = value.as_string() else {
        return Err(BridgeError::mismatch("string", classify(value).name()));
    };
    text.to_string()
        .map_err(|err| BridgeError::Engine(format!("engine string has no UTF-8 form: {err}")))
}

/// Converts an engine result, translating a pending script exception.
pub(crate) fn settle<'js, T>(scope: &Scope<'js>, result: rquickjs::Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(rquickjs::Error::Exception) => {
            let thrown = scope.ctx().catch();
            Err(translate(scope, thrown))
        }
        Err(err) => Err(err.into()),
    }
}

fn translate<'js>(scope: &Scope<'js>, thrown: Value<'js>) -> BridgeError {
    if let Some(token) = fault_token(scope, &thrown) {
        if let Some(fault) = scope.inner().take_fault(token) {
            return fault;
        }
    }
    match capture(scope, thrown) {
        Ok(err) => {
            tracing::debug!(context = %scope.id(), error = %err.display(), "script exception");
            BridgeError::Script(err)
        }
        Err(err) => err,
    }
}

fn fault_token<'js>(scope: &Scope<'js>, thrown: &Value<'js>) -> Option<u64> {
    if classify(thrown) != Kind::Object {
        return None;
    }
    call_quiet(scope, Helper::FaultOf, (thrown.clone(),))?
        .as_number()
        .map(|token| token as u64)
}

fn capture<'js>(scope: &Scope<'js>, thrown: Value<'js>) -> Result<ScriptError> {
    let display = call_quiet(scope, Helper::Stringify, (thrown.clone(),))
        .as_ref()
        .and_then(text_of)
        .unwrap_or_else(|| "uncaught exception".to_string());

    let mut name = None;
    let mut message = None;
    let mut stack = None;
    let mut native = None;
    if classify(&thrown) == Kind::Object {
        message = quiet_member(scope, &thrown, "message").as_ref().and_then(text_of);
        stack = quiet_member(scope, &thrown, "stack").as_ref().and_then(text_of);
        name = quiet_member(scope, &thrown, "constructor")
            .and_then(|constructor| quiet_member(scope, &constructor, "name"))
            .as_ref()
            .and_then(text_of);

        let object = ObjectRef::new(scope.persist(HandleKind::Value, thrown.clone())?);
        native = match class::reconstruct(scope, &object) {
            Ok(native) => native,
            Err(err) => {
                tracing::warn!(context = %scope.id(), %err, "error class reconstruction failed");
                None
            }
        };
    }

    Ok(ScriptError {
        name,
        message,
        display,
        stack,
        thrown: codec::any_from_engine(scope, thrown)?,
        native,
    })
}

fn call<'js, A: IntoArgs<'js>>(scope: &Scope<'js>, helper: Helper, args: A) -> Result<Value<'js>> {
    let function = scope.helpers()?.function(scope, helper)?;
    settle(scope, function.call(args))
}

/// Helper call used while translating an exception: failures are swallowed
/// so translation cannot recurse.
fn call_quiet<'js, A: IntoArgs<'js>>(scope: &Scope<'js>, helper: Helper, args: A) -> Option<Value<'js>> {
    let function = scope.helpers().ok()?.function(scope, helper).ok()?;
    match function.call::<A, Value<'js>>(args) {
        Ok(value) => Some(value),
        Err(rquickjs::Error::Exception) => {
            let _ = scope.ctx().catch();
            None
        }
        Err(_) => None,
    }
}

fn quiet_member<'js>(scope: &Scope<'js>, object: &Value<'js>, name: &str) -> Option<Value<'js>> {
    let key = text(scope, name).ok()?;
    call_quiet(scope, Helper::Get, (object.clone(), key)).filter(|value| !value.is_undefined())
}

pub(crate) fn eval(scope: &Scope<'_>, code: &str) -> Result<()> {
    settle(scope, scope.ctx().eval::<(), _>(code))
}

pub(crate) fn global_object(scope: &Scope<'_>) -> Result<ObjectRef> {
    let globals = scope.ctx().globals().into_value();
    Ok(ObjectRef::new(scope.persist(HandleKind::Value, globals)?))
}

pub(crate) fn text<'js>(scope: &Scope<'js>, value: &str) -> Result<Value<'js>> {
    Ok(rquickjs::String::from_str(scope.ctx().clone(), value)?.into_value())
}

pub(crate) fn array<'js>(scope: &Scope<'js>, items: Vec<Value<'js>>) -> Result<Value<'js>> {
    let array = Array::new(scope.ctx().clone())?;
    for (index, item) in items.into_iter().enumerate() {
        array.set(index, item)?;
    }
    Ok(array.into_value())
}

pub(crate) fn get<'js>(scope: &Scope<'js>, object: Value<'js>, key: Value<'js>) -> Result<Value<'js>> {
    call(scope, Helper::Get, (object, key))
}

pub(crate) fn set<'js>(scope: &Scope<'js>, object: Value<'js>, key: Value<'js>, value: Value<'js>) -> Result<()> {
    call(scope, Helper::Set, (object, key, value)).map(|_| ())
}

/// `key in object`, so members inherited through the prototype chain count.
pub(crate) fn has<'js>(scope: &Scope<'js>, object: Value<'js>, key: Value<'js>) -> Result<bool> {
    Ok(call(scope, Helper::Has, (object, key))?.as_bool().unwrap_or(false))
}

pub(crate) fn apply<'js>(
    scope: &Scope<'js>,
    function: Value<'js>,
    receiver: Value<'js>,
    args: Vec<Value<'js>>,
) -> Result<Value<'js>> {
    let args = array(scope, args)?;
    call(scope, Helper::Apply, (function, receiver, args))
}

pub(crate) fn construct<'js>(scope: &Scope<'js>, constructor: Value<'js>, args: Vec<Value<'js>>) -> Result<Value<'js>> {
    let args = array(scope, args)?;
    call(scope, Helper::Construct, (constructor, args))
}

/// A new object whose prototype is `prototype`.
pub(crate) fn create<'js>(scope: &Scope<'js>, prototype: Value<'js>) -> Result<Value<'js>> {
    call(scope, Helper::Create, (prototype,))
}

pub(crate) fn prototype<'js>(scope: &Scope<'js>, object: Value<'js>) -> Result<Value<'js>> {
    call(scope, Helper::Prototype, (object,))
}

pub(crate) fn same<'js>(scope: &Scope<'js>, a: Value<'js>, b: Value<'js>) -> Result<bool> {
    Ok(call(scope, Helper::Same, (a, b))?.as_bool().unwrap_or(false))
}

pub(crate) fn instance_of<'js>(scope: &Scope<'js>, value: Value<'js>, constructor: Value<'js>) -> Result<bool> {
    Ok(call(scope, Helper::InstanceOf, (value, constructor))?
        .as_bool()
        .unwrap_or(false))
}

pub(crate) fn keys<'js>(scope: &Scope<'js>, object: Value<'js>) -> Result<Vec<String>> {
    let listed = call(scope, Helper::Keys, (object,))?;
    let Some(names) = listed.as_array() else {
        return Err(BridgeError::mismatch("array", classify(&listed).name()));
    };
    let mut keys = Vec::with_capacity(names.len());
    for index in 0..names.len() {
        let name: Value = names.get(index)?;
        keys.push(string_of(&name)?);
    }
    Ok(keys)
}

/// Wraps a native entry point `(this, args) -> [ok, value | message, token?]`
/// into a script function that returns the value or throws.
pub(crate) fn wrap<'js>(scope: &Scope<'js>, native: Function<'js>) -> Result<Value<'js>> {
    call(scope, Helper::Wrap, (native,))
}

pub(crate) fn new_object<'js>(scope: &Scope<'js>) -> Result<Value<'js>> {
    call(scope, Helper::NewObject, ())
}
