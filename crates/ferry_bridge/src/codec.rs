//! Conversion between native values and engine values
//!
//! [`to_engine`] and [`from_engine`] convert one [`MarshaledValue`] in each
//! direction. [`Marshal`] ties a Rust type to its [`ValueShape`] so typed
//! accessors can convert without naming shapes by hand.

use crate::context::Scope;
use crate::engine::{self, Kind};
use crate::error::{BridgeError, Result};
use crate::handle::HandleKind;
use crate::value::{AnyValue, MarshaledValue, ObjectRef, ValueShape};
use rquickjs::{Array, Value};

/// A Rust type that can cross the bridge.
pub trait Marshal: Sized {
    fn shape() -> ValueShape;

    fn to_marshaled(&self) -> Result<MarshaledValue>;

    fn from_marshaled(value: MarshaledValue) -> Result<Self>;
}

/// Converts a native value into an engine value.
///
/// Numbers are always written as doubles, so `-0.0` and NaN survive, and
/// `Optional(None)` is written as `null`. A present optional whose payload
/// would itself be null or undefined is rejected: only an absent optional
/// maps to those.
pub fn to_engine<'js>(scope: &Scope<'js>, value: &MarshaledValue) -> Result<Value<'js>> {
    let ctx = scope.ctx().clone();
    Ok(match value {
        MarshaledValue::Boolean(value) => Value::new_bool(ctx, *value),
        MarshaledValue::Number(value) => Value::new_float(ctx, *value),
        MarshaledValue::Text(value) => engine::text(scope, value)?,
        MarshaledValue::Sequence(items) => {
            let items = items
                .iter()
                .map(|item| to_engine(scope, item))
                .collect::<Result<Vec<_>>>()?;
            engine::array(scope, items)?
        }
        MarshaledValue::Optional(None) => Value::new_null(ctx),
        MarshaledValue::Optional(Some(inner)) if inner.is_nullish() => {
            return Err(BridgeError::mismatch("present value", inner.kind()));
        }
        MarshaledValue::Optional(Some(inner)) => to_engine(scope, inner)?,
        MarshaledValue::Any(value) => any_to_engine(scope, value)?,
        MarshaledValue::Object(object) => scope.restore(object.handle())?,
    })
}

pub fn any_to_engine<'js>(scope: &Scope<'js>, value: &AnyValue) -> Result<Value<'js>> {
    let ctx = scope.ctx().clone();
    Ok(match value {
        AnyValue::Boolean(value) => Value::new_bool(ctx, *value),
        AnyValue::Number(value) => Value::new_float(ctx, *value),
        AnyValue::Text(value) => engine::text(scope, value)?,
        AnyValue::Array(items) => {
            let items = items
                .iter()
                .map(|item| any_to_engine(scope, item))
                .collect::<Result<Vec<_>>>()?;
            engine::array(scope, items)?
        }
        AnyValue::Object(object) => scope.restore(object.handle())?,
        AnyValue::Null => Value::new_null(ctx),
        AnyValue::Undefined => Value::new_undefined(ctx),
    })
}

/// Converts an engine value into the native form named by `shape`.
pub fn from_engine<'js>(scope: &Scope<'js>, value: Value<'js>, shape: &ValueShape) -> Result<MarshaledValue> {
    let kind = engine::classify(&value);
    match shape {
        ValueShape::Boolean => value
            .as_bool()
            .map(MarshaledValue::Boolean)
            .ok_or_else(|| BridgeError::mismatch(shape, kind.name())),
        ValueShape::Number => value
            .as_number()
            .map(MarshaledValue::Number)
            .ok_or_else(|| BridgeError::mismatch(shape, kind.name())),
        ValueShape::Text if kind == Kind::Text => engine::string_of(&value).map(MarshaledValue::Text),
        ValueShape::Text => Err(BridgeError::mismatch(shape, kind.name())),
        ValueShape::Sequence(inner) => {
            let Some(array) = value.as_array() else {
                return Err(BridgeError::mismatch(shape, kind.name()));
            };
            elements(array)?
                .into_iter()
                .map(|item| from_engine(scope, item, inner))
                .collect::<Result<Vec<_>>>()
                .map(MarshaledValue::Sequence)
        }
        ValueShape::Optional(inner) => match kind {
            Kind::Null | Kind::Undefined => Ok(MarshaledValue::absent()),
            _ => Ok(MarshaledValue::present(from_engine(scope, value, inner)?)),
        },
        ValueShape::Any => Ok(MarshaledValue::Any(any_from_engine(scope, value)?)),
        ValueShape::Object if kind.is_object() => Ok(MarshaledValue::Object(ObjectRef::new(
            scope.persist(HandleKind::Value, value)?,
        ))),
        ValueShape::Object => Err(BridgeError::mismatch(shape, kind.name())),
    }
}

/// Discriminates an engine value for the "any" type.
///
/// Order: boolean, number, text, array, object, then null/undefined. Values
/// outside that order are kept as opaque object references.
pub fn any_from_engine<'js>(scope: &Scope<'js>, value: Value<'js>) -> Result<AnyValue> {
    Ok(match engine::classify(&value) {
        Kind::Boolean => AnyValue::Boolean(
            value
                .as_bool()
                .ok_or_else(|| BridgeError::Engine("engine boolean could not be read".to_string()))?,
        ),
        Kind::Number => AnyValue::Number(
            value
                .as_number()
                .ok_or_else(|| BridgeError::Engine("engine number could not be read".to_string()))?,
        ),
        Kind::Text => AnyValue::Text(engine::string_of(&value)?),
        Kind::Array => {
            let Some(array) = value.as_array() else {
                return Err(BridgeError::mismatch("array", "object"));
            };
            AnyValue::Array(
                elements(array)?
                    .into_iter()
                    .map(|item| any_from_engine(scope, item))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        Kind::Object | Kind::Other => AnyValue::Object(ObjectRef::new(scope.persist(HandleKind::Value, value)?)),
        Kind::Null => AnyValue::Null,
        Kind::Undefined => AnyValue::Undefined,
    })
}

fn elements<'js>(array: &Array<'js>) -> Result<Vec<Value<'js>>> {
    (0..array.len())
        .map(|index| array.get::<Value>(index).map_err(BridgeError::from))
        .collect()
}

/// Converts a typed native value straight to an engine value.
pub fn encode<'js, T: Marshal>(scope: &Scope<'js>, value: &T) -> Result<Value<'js>> {
    to_engine(scope, &value.to_marshaled()?)
}

pub fn decode<'js, T: Marshal>(scope: &Scope<'js>, value: Value<'js>) -> Result<T> {
    T::from_marshaled(from_engine(scope, value, &T::shape())?)
}

impl Marshal for bool {
    fn shape() -> ValueShape {
        ValueShape::Boolean
    }

    fn to_marshaled(&self) -> Result<MarshaledValue> {
        Ok(MarshaledValue::Boolean(*self))
    }

    fn from_marshaled(value: MarshaledValue) -> Result<Self> {
        match value {
            MarshaledValue::Boolean(value) => Ok(value),
            MarshaledValue::Any(AnyValue::Boolean(value)) => Ok(value),
            other => Err(BridgeError::mismatch(Self::shape(), other.kind())),
        }
    }
}

impl Marshal for f64 {
    fn shape() -> ValueShape {
        ValueShape::Number
    }

    fn to_marshaled(&self) -> Result<MarshaledValue> {
        Ok(MarshaledValue::Number(*self))
    }

    fn from_marshaled(value: MarshaledValue) -> Result<Self> {
        match value {
            MarshaledValue::Number(value) => Ok(value),
            MarshaledValue::Any(AnyValue::Number(value)) => Ok(value),
            other => Err(BridgeError::mismatch(Self::shape(), other.kind())),
        }
    }
}

impl Marshal for String {
    fn shape() -> ValueShape {
        ValueShape::Text
    }

    fn to_marshaled(&self) -> Result<MarshaledValue> {
        Ok(MarshaledValue::Text(self.clone()))
    }

    fn from_marshaled(value: MarshaledValue) -> Result<Self> {
        match value {
            MarshaledValue::Text(value) => Ok(value),
            MarshaledValue::Any(AnyValue::Text(value)) => Ok(value),
            other => Err(BridgeError::mismatch(Self::shape(), other.kind())),
        }
    }
}

impl<T: Marshal> Marshal for Option<T> {
    fn shape() -> ValueShape {
        ValueShape::optional(T::shape())
    }

    fn to_marshaled(&self) -> Result<MarshaledValue> {
        Ok(match self {
            Some(value) => MarshaledValue::present(value.to_marshaled()?),
            None => MarshaledValue::absent(),
        })
    }

    fn from_marshaled(value: MarshaledValue) -> Result<Self> {
        match value {
            MarshaledValue::Optional(None) => Ok(None),
            MarshaledValue::Optional(Some(inner)) => T::from_marshaled(*inner).map(Some),
            MarshaledValue::Any(AnyValue::Null | AnyValue::Undefined) => Ok(None),
            other => T::from_marshaled(other).map(Some),
        }
    }
}

impl<T: Marshal> Marshal for Vec<T> {
    fn shape() -> ValueShape {
        ValueShape::sequence(T::shape())
    }

    fn to_marshaled(&self) -> Result<MarshaledValue> {
        self.iter()
            .map(Marshal::to_marshaled)
            .collect::<Result<Vec<_>>>()
            .map(MarshaledValue::Sequence)
    }

    fn from_marshaled(value: MarshaledValue) -> Result<Self> {
        match value {
            MarshaledValue::Sequence(items) => items.into_iter().map(T::from_marshaled).collect(),
            MarshaledValue::Any(AnyValue::Array(items)) => items
                .into_iter()
                .map(|item| T::from_marshaled(MarshaledValue::Any(item)))
                .collect(),
            other => Err(BridgeError::mismatch(Self::shape(), other.kind())),
        }
    }
}

impl Marshal for AnyValue {
    fn shape() -> ValueShape {
        ValueShape::Any
    }

    fn to_marshaled(&self) -> Result<MarshaledValue> {
        Ok(MarshaledValue::Any(self.try_clone()?))
    }

    fn from_marshaled(value: MarshaledValue) -> Result<Self> {
        Ok(match value {
            MarshaledValue::Any(value) => value,
            MarshaledValue::Boolean(value) => AnyValue::Boolean(value),
            MarshaledValue::Number(value) => AnyValue::Number(value),
            MarshaledValue::Text(value) => AnyValue::Text(value),
            MarshaledValue::Sequence(items) => AnyValue::Array(
                items
                    .into_iter()
                    .map(AnyValue::from_marshaled)
                    .collect::<Result<Vec<_>>>()?,
            ),
            MarshaledValue::Optional(None) => AnyValue::Null,
            MarshaledValue::Optional(Some(inner)) => AnyValue::from_marshaled(*inner)?,
            MarshaledValue::Object(object) => AnyValue::Object(object),
        })
    }
}

impl Marshal for ObjectRef {
    fn shape() -> ValueShape {
        ValueShape::Object
    }

    fn to_marshaled(&self) -> Result<MarshaledValue> {
        Ok(MarshaledValue::Object(self.try_clone()?))
    }

    fn from_marshaled(value: MarshaledValue) -> Result<Self> {
        match value {
            MarshaledValue::Object(object) => Ok(object),
            MarshaledValue::Any(AnyValue::Object(object)) => Ok(object),
            other => Err(BridgeError::mismatch(Self::shape(), other.kind())),
        }
    }
}

/// Void results: written as `undefined`, any engine value is accepted back.
impl Marshal for () {
    fn shape() -> ValueShape {
        ValueShape::Any
    }

    fn to_marshaled(&self) -> Result<MarshaledValue> {
        Ok(MarshaledValue::unit())
    }

    fn from_marshaled(_value: MarshaledValue) -> Result<Self> {
        Ok(())
    }
}
