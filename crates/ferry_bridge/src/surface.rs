//! Declaration surfaces
//!
//! [`bridge_surface!`](crate::bridge_surface) declares the globals a script
//! exposes and generates typed accessors for them.

/// Declare typed accessors for a script's globals.
///
/// Each entry maps a native name to the script global it reads. Constants
/// get a getter, variables a getter and a setter, functions a call wrapper
/// taking arguments by reference. Every accessor takes the active
/// [`Scope`](crate::Scope) and resolves its key through the context cache.
///
/// # Examples
///
/// ```ignore
/// bridge_surface! {
///     pub struct Src {
///         consts {
///             boolean_const: bool = "booleanConst",
///         }
///         vars {
///             number_var / set_number_var: f64 = "numberVar",
///         }
///         fns {
///             add(a: f64, b: f64) -> f64 = "add",
///         }
///     }
/// }
///
/// let sum = bridge.with(|scope| Src::add(scope, &1.0, &2.0))?;
/// ```
#[macro_export]
macro_rules! bridge_surface {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(consts {
                $($const_name:ident : $const_ty:ty = $const_js:literal),* $(,)?
            })?
            $(vars {
                $($var_get:ident / $var_set:ident : $var_ty:ty = $var_js:literal),* $(,)?
            })?
            $(fns {
                $($fn_name:ident ( $($arg:ident : $arg_ty:ty),* $(,)? ) -> $ret:ty = $fn_js:literal),* $(,)?
            })?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name;

        #[allow(dead_code)]
        impl $name {
            $($(
                pub fn $const_name(scope: &$crate::Scope<'_>) -> $crate::Result<$const_ty> {
                    scope.global::<$const_ty>($const_js)
                }
            )*)?

            $($(
                pub fn $var_get(scope: &$crate::Scope<'_>) -> $crate::Result<$var_ty> {
                    scope.global::<$var_ty>($var_js)
                }

                pub fn $var_set(scope: &$crate::Scope<'_>, value: &$var_ty) -> $crate::Result<()> {
                    scope.set_global::<$var_ty>($var_js, value)
                }
            )*)?

            $($(
                pub fn $fn_name(scope: &$crate::Scope<'_>, $($arg: &$arg_ty),*) -> $crate::Result<$ret> {
                    let args: ::std::vec::Vec<$crate::MarshaledValue> =
                        ::std::vec![$($crate::Marshal::to_marshaled($arg)?),*];
                    scope.call_global::<$ret>($fn_js, &args)
                }
            )*)?
        }
    };
}
