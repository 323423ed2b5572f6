//! Globals of the reference script

use crate::SimpleObject;
use ferry_bridge::{bridge_surface, AnyValue, ObjectProxy};

bridge_surface! {
    /// Constants, variables and functions declared by `assets/src.js`.
    pub struct Src {
        consts {
            boolean_const: bool = "booleanConst",
            number_const: f64 = "numberConst",
            string_const: String = "stringConst",
            number_or_null_array_const: Vec<Option<f64>> = "numberOrNullArrayConst",
            number_array_const: Vec<f64> = "numberArrayConst",
            string_array_array_const: Vec<Vec<String>> = "stringArrayArrayConst",
            any_const: AnyValue = "anyConst",

            optional_boolean_const: Option<bool> = "optionalBooleanConst",
            optional_number_const: Option<f64> = "optionalNumberConst",
            optional_string_const: Option<String> = "optionalStringConst",
            optional_number_array_const: Option<Vec<f64>> = "optionalNumberArrayConst",
            optional_null_any_const: Option<AnyValue> = "optionalNullAnyConst",
            optional_non_null_any_const: Option<AnyValue> = "optionalNonNullAnyConst",

            void_no_arg_function_called: bool = "voidNoArgFunctionCalled",
            simple_interface_instance_called: bool = "simpleInterfaceInstanceCalled",
            simple_object_instance: SimpleObject = "simpleObjectInstance",
            any_object_instance: AnyValue = "anyObjectInstance",
            optional_any_object_instance: Option<AnyValue> = "optionalAnyObjectInstance",
        }
        vars {
            boolean_var / set_boolean_var: bool = "booleanVar",
            number_var / set_number_var: f64 = "numberVar",
            string_var / set_string_var: String = "stringVar",
            number_array_var / set_number_array_var: Vec<f64> = "numberArrayVar",
            any_var / set_any_var: AnyValue = "anyVar",
            string_array_array_var / set_string_array_array_var: Vec<Vec<String>> = "stringArrayArrayVar",

            optional_boolean_var / set_optional_boolean_var: Option<bool> = "optionalBooleanVar",
            optional_number_var / set_optional_number_var: Option<f64> = "optionalNumberVar",
            optional_string_var / set_optional_string_var: Option<String> = "optionalStringVar",
            optional_number_array_var / set_optional_number_array_var: Option<Vec<f64>> = "optionalNumberArrayVar",
            optional_any_var / set_optional_any_var: Option<AnyValue> = "optionalAnyVar",

            string_no_arg_lambda / set_string_no_arg_lambda: ObjectProxy = "stringNoArgLambda",
            simple_interface_instance / set_simple_interface_instance: ObjectProxy = "simpleInterfaceInstance",
        }
        fns {
            void_no_arg_function() -> () = "voidNoArgFunction",
            string_no_arg_function() -> String = "stringNoArgFunction",
            number_multiple_arg_function(a: f64, b: f64) -> f64 = "numberMultipleArgFunction",
            throw_simple_error() -> () = "throwSimpleError",
            throw_special_error() -> () = "throwSpecialError",
            accept_simple_interface(simple_interface: ObjectProxy) -> () = "acceptSimpleInterface",
        }
    }
}
