//! End-to-end checks of the reference script through its declared surface.

use ferry_bridge::{
    reply, AnyValue, BridgeConfig, BridgeContext, BridgeError, MarshaledValue, MemberSignature, ObjectProxy, Result,
    Scope, ValueShape,
};
use ferry_fixtures::{
    expose_simple_interface, SimpleInterface, SimpleInterfaceMirror, SimpleObject, SimpleObjectOverrides,
    SpecialError, Src,
};
use std::cell::Cell;
use std::rc::Rc;

fn bridge() -> BridgeContext {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ferry_fixtures::load().unwrap()
}

fn run<R>(f: impl for<'js> FnOnce(&Scope<'js>) -> Result<R>) -> R {
    bridge().with(f).unwrap()
}

#[test]
fn constants() {
    run(|scope| {
        assert!(!Src::boolean_const(scope)?);
        assert!(Src::number_const(scope)?.is_nan());
        assert_eq!(Src::string_const(scope)?, "stringConstLiteral");
        assert_eq!(Src::number_or_null_array_const(scope)?, vec![Some(1.0), None, Some(3.0)]);
        assert_eq!(Src::number_array_const(scope)?, vec![1.0, 2.0, 3.0]);

        let grid = Src::string_array_array_const(scope)?;
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[1], vec!["4", "5", "6"]);

        assert_eq!(Src::any_const(scope)?.as_text(), Some("anyConstLiteral"));
        Ok(())
    });
}

#[test]
fn optional_constants() {
    run(|scope| {
        assert_eq!(Src::optional_boolean_const(scope)?, None);
        assert_eq!(Src::optional_number_const(scope)?, None);
        assert_eq!(Src::optional_string_const(scope)?, None);
        assert_eq!(Src::optional_number_array_const(scope)?, None);
        assert_eq!(Src::optional_null_any_const(scope)?, None);
        assert_eq!(
            Src::optional_non_null_any_const(scope)?,
            Some(AnyValue::Text("stringConstLiteral".to_string()))
        );
        Ok(())
    });
}

#[test]
fn variables() {
    run(|scope| {
        assert!(Src::boolean_var(scope)?);
        Src::set_boolean_var(scope, &false)?;
        assert!(!Src::boolean_var(scope)?);

        assert_eq!(Src::number_var(scope)?, 0.0);
        Src::set_number_var(scope, &-12.75)?;
        assert_eq!(Src::number_var(scope)?, -12.75);

        assert_eq!(Src::string_var(scope)?, "stringVarLiteral");
        Src::set_string_var(scope, &"päivää 🌍".to_string())?;
        assert_eq!(Src::string_var(scope)?, "päivää 🌍");

        assert!(Src::number_array_var(scope)?.is_empty());
        Src::set_number_array_var(scope, &vec![1.5, 2.5])?;
        assert_eq!(Src::number_array_var(scope)?, vec![1.5, 2.5]);

        assert_eq!(Src::any_var(scope)?.as_text(), Some("anyVarLiteral"));
        Src::set_any_var(scope, &AnyValue::Number(4.0))?;
        assert_eq!(Src::any_var(scope)?, AnyValue::Number(4.0));

        let grid = vec![vec!["a".to_string()], vec![], vec!["b".to_string(), "c".to_string()]];
        Src::set_string_array_array_var(scope, &grid)?;
        assert_eq!(Src::string_array_array_var(scope)?, grid);
        Ok(())
    });
}

#[test]
fn optional_variables() {
    run(|scope| {
        assert_eq!(Src::optional_boolean_var(scope)?, None);
        Src::set_optional_boolean_var(scope, &Some(true))?;
        assert_eq!(Src::optional_boolean_var(scope)?, Some(true));
        Src::set_optional_boolean_var(scope, &None)?;
        assert_eq!(Src::optional_boolean_var(scope)?, None);

        assert_eq!(Src::optional_number_var(scope)?, None);
        Src::set_optional_number_var(scope, &Some(3.5))?;
        assert_eq!(Src::optional_number_var(scope)?, Some(3.5));

        assert_eq!(Src::optional_string_var(scope)?, None);
        Src::set_optional_string_var(scope, &Some(String::new()))?;
        assert_eq!(Src::optional_string_var(scope)?, Some(String::new()));

        assert_eq!(Src::optional_number_array_var(scope)?, None);
        Src::set_optional_number_array_var(scope, &Some(vec![0.0]))?;
        assert_eq!(Src::optional_number_array_var(scope)?, Some(vec![0.0]));

        assert_eq!(Src::optional_any_var(scope)?, None);
        Src::set_optional_any_var(scope, &Some(AnyValue::Boolean(false)))?;
        assert_eq!(Src::optional_any_var(scope)?, Some(AnyValue::Boolean(false)));
        Ok(())
    });
}

#[test]
fn functions() {
    run(|scope| {
        assert!(!Src::void_no_arg_function_called(scope)?);
        Src::void_no_arg_function(scope)?;
        assert!(Src::void_no_arg_function_called(scope)?);

        assert_eq!(Src::string_no_arg_function(scope)?, "stringNoArgFunctionReturnValue");
        assert_eq!(Src::number_multiple_arg_function(scope, &6.0, &7.0)?, 42.0);
        Ok(())
    });
}

#[test]
fn function_valued_variables() {
    run(|scope| {
        let lambda = Src::string_no_arg_lambda(scope)?;
        assert_eq!(lambda.invoke::<String>(scope, &[])?, "stringNoArgLambdaReturnValue");

        let answer = Rc::new("nativeLambdaReturnValue".to_string());
        let native = ObjectProxy::function_with(
            scope,
            &answer,
            MemberSignature::new(vec![], ValueShape::Text),
            |answer, _, _, _| reply(answer.as_str().to_string()),
        )?;
        Src::set_string_no_arg_lambda(scope, &native)?;

        let lambda = Src::string_no_arg_lambda(scope)?;
        assert!(scope.same_object(lambda.object(), native.object())?);
        assert_eq!(lambda.invoke::<String>(scope, &[])?, "nativeLambdaReturnValue");
        Ok(())
    });
}

#[test]
fn simple_error() {
    let err = match bridge().with(|scope| Src::throw_simple_error(scope)) {
        Err(BridgeError::Script(err)) => err,
        other => panic!("expected a script error, got {other:?}"),
    };
    assert_eq!(err.name(), Some("Error"));
    assert_eq!(err.message(), Some("Simple error message"));
    assert_eq!(err.display(), "Error: Simple error message");
    assert!(err.native().is_none());
}

#[test]
fn special_error() {
    let err = match bridge().with(|scope| Src::throw_special_error(scope)) {
        Err(BridgeError::Script(err)) => err,
        other => panic!("expected a script error, got {other:?}"),
    };
    assert_eq!(err.name(), Some("SpecialError"));
    let special = err.downcast_ref::<SpecialError>().unwrap();
    assert_eq!(special.message, "Special error message");
    assert_eq!(special.to_string(), "Special error message");
}

#[test]
fn objects() {
    run(|scope| {
        let first = SimpleObject::new(scope, None)?;
        let second = SimpleObject::new(scope, Some(2.0))?;
        assert_eq!(first.value(scope)?, 7.0);
        assert_eq!(first.number_single_object_arg_method(scope, &first)?, 49.0);
        assert_eq!(first.number_single_object_arg_method(scope, &second)?, 14.0);

        assert!(!first.method_to_override_called(scope)?);
        first.call_overridden_method(scope)?;
        assert!(first.method_to_override_called(scope)?);

        let upcast = first.upcast_this_to_object(scope)?;
        let upcast = upcast.as_object().unwrap();
        assert!(scope.same_object(upcast, first.object())?);

        assert!(!SimpleObject::static_void_no_arg_method_called(scope)?);
        SimpleObject::static_void_no_arg_method(scope)?;
        assert!(SimpleObject::static_void_no_arg_method_called(scope)?);
        Ok(())
    });
}

#[test]
fn static_flag_reads_false_before_first_call() {
    run(|scope| {
        let class = scope.class(SimpleObject::CLASS)?;
        assert!(!class.has(scope, "staticVoidNoArgMethodCalled")?);
        assert!(!SimpleObject::static_void_no_arg_method_called(scope)?);

        SimpleObject::static_void_no_arg_method(scope)?;
        assert!(class.has(scope, "staticVoidNoArgMethodCalled")?);
        assert!(SimpleObject::static_void_no_arg_method_called(scope)?);
        Ok(())
    });
}

#[test]
fn script_instances_keep_identity() {
    run(|scope| {
        let instance = Src::simple_object_instance(scope)?;
        assert_eq!(instance.value(scope)?, 7.0);

        let any = Src::any_object_instance(scope)?;
        assert!(scope.same_object(any.as_object().unwrap(), instance.object())?);

        let optional = Src::optional_any_object_instance(scope)?.unwrap();
        assert!(!scope.same_object(optional.as_object().unwrap(), instance.object())?);
        assert!(scope.class(SimpleObject::CLASS)?.is_instance(scope, optional.as_object().unwrap())?);
        Ok(())
    });
}

struct Override {
    called: Cell<bool>,
    call_base: bool,
}

impl Override {
    fn new(call_base: bool) -> Rc<Self> {
        Rc::new(Self {
            called: Cell::new(false),
            call_base,
        })
    }
}

impl SimpleObjectOverrides for Override {
    fn method_to_override(&self, scope: &Scope<'_>, this: &SimpleObject) -> Result<()> {
        self.called.set(true);
        if self.call_base {
            this.super_method_to_override(scope)?;
        }
        Ok(())
    }
}

#[test]
fn inheritance_override_replaces_base() {
    let overrides = Override::new(false);
    run(|scope| {
        let derived = SimpleObject::derived(scope, None, &overrides)?;
        assert_eq!(derived.value(scope)?, 7.0);
        derived.call_overridden_method(scope)?;
        assert!(overrides.called.get());
        assert!(!derived.method_to_override_called(scope)?);
        Ok(())
    });
}

#[test]
fn inheritance_override_can_call_base() {
    let overrides = Override::new(true);
    run(|scope| {
        let derived = SimpleObject::derived(scope, Some(3.0), &overrides)?;
        derived.call_overridden_method(scope)?;
        assert!(overrides.called.get());
        assert!(derived.method_to_override_called(scope)?);
        Ok(())
    });
}

#[test]
fn inheritance_native_call_reaches_override() {
    let overrides = Override::new(false);
    run(|scope| {
        let derived = SimpleObject::derived(scope, None, &overrides)?;
        derived.method_to_override(scope)?;
        assert!(overrides.called.get());

        derived.super_method_to_override(scope)?;
        assert!(derived.method_to_override_called(scope)?);

        let plain = SimpleObject::new(scope, None)?;
        assert_eq!(derived.number_single_object_arg_method(scope, &plain)?, 49.0);
        Ok(())
    });
}

#[derive(Default)]
struct NativeInterface {
    calls: Cell<u32>,
}

impl SimpleInterface for NativeInterface {
    fn void_no_arg_method(&self, _scope: &Scope<'_>) -> Result<()> {
        self.calls.set(self.calls.get() + 1);
        Ok(())
    }
}

#[test]
fn script_implemented_interface() {
    run(|scope| {
        let mirror = SimpleInterfaceMirror::new(Src::simple_interface_instance(scope)?);
        assert!(!Src::simple_interface_instance_called(scope)?);
        mirror.void_no_arg_method(scope)?;
        assert!(Src::simple_interface_instance_called(scope)?);
        Ok(())
    });
}

#[test]
fn native_implemented_interface() {
    let native = Rc::new(NativeInterface::default());
    run(|scope| {
        let exposed = expose_simple_interface(scope, &native)?;
        Src::accept_simple_interface(scope, &exposed)?;
        assert_eq!(native.calls.get(), 1);

        let stored = SimpleInterfaceMirror::new(Src::simple_interface_instance(scope)?);
        assert!(scope.same_object(stored.proxy().object(), exposed.object())?);
        stored.void_no_arg_method(scope)?;
        assert_eq!(native.calls.get(), 2);
        assert!(!Src::simple_interface_instance_called(scope)?);
        Ok(())
    });
}

#[test]
fn dropped_interface_proxy_detaches() {
    let native = Rc::new(NativeInterface::default());
    let err = bridge()
        .with(|scope| {
            let exposed = expose_simple_interface(scope, &native)?;
            Src::set_simple_interface_instance(scope, &exposed)?;
            drop(exposed);
            SimpleInterfaceMirror::new(Src::simple_interface_instance(scope)?).void_no_arg_method(scope)
        })
        .unwrap_err();
    assert!(matches!(err, BridgeError::DetachedProxy { .. }), "{err:?}");
    assert_eq!(native.calls.get(), 0);
}

#[test]
fn repeated_access_keeps_handles_balanced() {
    let bridge = bridge();
    let pass = |scope: &Scope<'_>| -> Result<()> {
        Src::string_array_array_const(scope)?;
        Src::optional_non_null_any_const(scope)?;
        let object = SimpleObject::new(scope, Some(5.0))?;
        object.number_single_object_arg_method(scope, &object)?;
        Src::number_multiple_arg_function(scope, &2.0, &3.0)?;
        Ok(())
    };

    bridge.with(pass).unwrap();
    let warm = bridge.stats();
    for _ in 0..10 {
        bridge.with(pass).unwrap();
    }
    let after = bridge.stats();
    assert_eq!(after.live, warm.live);
    assert_eq!(after.acquired - warm.acquired, after.released - warm.released);
    assert_eq!(bridge.bindings(), 0);
}

#[test]
fn handles_from_another_context_are_rejected() {
    let first = bridge();
    let second = bridge();
    let instance = first.with(|scope| Src::simple_object_instance(scope)).unwrap();

    let err = second
        .with(|scope| Src::set_any_var(scope, &AnyValue::Object(instance.object().try_clone()?)))
        .unwrap_err();
    assert!(matches!(err, BridgeError::CrossContext { .. }), "{err:?}");

    let any = second.with(|scope| Src::any_var(scope)).unwrap();
    assert_eq!(any.as_text(), Some("anyVarLiteral"));
}

#[test]
fn key_resolution_is_memoized() {
    run(|scope| {
        Src::number_var(scope)?;
        Src::set_number_var(scope, &1.0)?;
        let resolved = scope.properties().resolutions();
        for value in 0..20 {
            Src::set_number_var(scope, &(value as f64))?;
            Src::number_var(scope)?;
        }
        assert_eq!(scope.properties().resolutions(), resolved);
        Ok(())
    });
}

#[test]
fn loads_with_json_config() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let json = serde_json::json!({
        "runtime": { "memory_limit": 64 * 1024 * 1024, "max_stack_size": 512 * 1024 },
        "script_root": ferry_fixtures::script_root(),
    });
    let config = BridgeConfig::from_json(&json.to_string()).unwrap();
    let bridge = ferry_fixtures::load_with(&config).unwrap();
    assert!(bridge.locator().ends_with("src.js"));
    let product = bridge
        .with(|scope| Src::number_multiple_arg_function(scope, &1.5, &4.0))
        .unwrap();
    assert_eq!(product, 6.0);
}

#[test]
fn missing_script_is_a_load_error() {
    let config = BridgeConfig::default().with_script_root("/nonexistent/ferry");
    match ferry_fixtures::load_with(&config) {
        Err(BridgeError::Load { locator, .. }) => assert!(locator.ends_with("src.js")),
        other => panic!("expected a load error, got {:?}", other.map(|bridge| bridge.id())),
    }
}

#[test]
fn marshaled_arguments_match_declared_shapes() {
    run(|scope| {
        let object = SimpleObject::new(scope, None)?;
        let product: f64 = object.proxy().call(
            scope,
            "numberSingleObjectArgMethod",
            &[MarshaledValue::Object(object.object().try_clone()?)],
        )?;
        assert_eq!(product, 49.0);

        scope.set_global("booleanVar", &"not a boolean".to_string())?;
        assert!(matches!(Src::boolean_var(scope), Err(BridgeError::TypeMismatch { .. })));
        Ok(())
    });
}
