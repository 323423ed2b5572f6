//! Native-side value model
//!
//! [`ValueShape`] names the native type a value crosses the boundary as,
//! [`MarshaledValue`] carries a converted value, [`AnyValue`] is the payload of
//! the heterogeneous "any" type.

use crate::error::Result;
use crate::handle::{ContextId, OwnedHandle};
use serde_json::json;
use std::fmt;

/// Native semantic type of a value crossing the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueShape {
    Boolean,
    Number,
    Text,
    Sequence(Box<ValueShape>),
    Optional(Box<ValueShape>),
    Any,
    Object,
}

impl ValueShape {
    pub fn sequence(inner: ValueShape) -> Self {
        ValueShape::Sequence(Box::new(inner))
    }

    pub fn optional(inner: ValueShape) -> Self {
        ValueShape::Optional(Box::new(inner))
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueShape::Boolean => f.write_str("boolean"),
            ValueShape::Number => f.write_str("number"),
            ValueShape::Text => f.write_str("string"),
            ValueShape::Sequence(inner) => write!(f, "Array<{inner}>"),
            ValueShape::Optional(inner) => write!(f, "?{inner}"),
            ValueShape::Any => f.write_str("any"),
            ValueShape::Object => f.write_str("object"),
        }
    }
}

/// Reference to an engine object, held through an owned handle.
#[derive(Debug, PartialEq)]
pub struct ObjectRef {
    handle: OwnedHandle,
}

impl ObjectRef {
    pub(crate) fn new(handle: OwnedHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &OwnedHandle {
        &self.handle
    }

    pub fn context(&self) -> ContextId {
        self.handle.context()
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            handle: self.handle.try_clone()?,
        })
    }
}

/// Payload of an "any" value, tagged with the engine type it came from.
///
/// Primitives compare structurally; objects compare by handle, so two
/// separately decoded references to one engine object are not equal here.
/// Use `Scope::same_object` for engine identity.
#[derive(Debug, PartialEq)]
pub enum AnyValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    Array(Vec<AnyValue>),
    Object(ObjectRef),
    Null,
    Undefined,
}

impl AnyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AnyValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AnyValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnyValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            AnyValue::Object(value) => Some(value),
            _ => None,
        }
    }

    /// `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, AnyValue::Null | AnyValue::Undefined)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnyValue::Boolean(_) => "boolean",
            AnyValue::Number(_) => "number",
            AnyValue::Text(_) => "string",
            AnyValue::Array(_) => "array",
            AnyValue::Object(_) => "object",
            AnyValue::Null => "null",
            AnyValue::Undefined => "undefined",
        }
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(match self {
            AnyValue::Boolean(value) => AnyValue::Boolean(*value),
            AnyValue::Number(value) => AnyValue::Number(*value),
            AnyValue::Text(value) => AnyValue::Text(value.clone()),
            AnyValue::Array(items) => AnyValue::Array(
                items
                    .iter()
                    .map(AnyValue::try_clone)
                    .collect::<Result<Vec<_>>>()?,
            ),
            AnyValue::Object(object) => AnyValue::Object(object.try_clone()?),
            AnyValue::Null => AnyValue::Null,
            AnyValue::Undefined => AnyValue::Undefined,
        })
    }

    /// Snapshot for diagnostics. Object references render as
    /// `{"$ref": <handle bits>}`; non-finite numbers render as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AnyValue::Boolean(value) => json!(value),
            AnyValue::Number(value) => json!(value),
            AnyValue::Text(value) => json!(value),
            AnyValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(AnyValue::to_json).collect())
            }
            AnyValue::Object(object) => json!({ "$ref": object.handle().id().to_bits() }),
            AnyValue::Null | AnyValue::Undefined => serde_json::Value::Null,
        }
    }
}

impl From<bool> for AnyValue {
    fn from(value: bool) -> Self {
        AnyValue::Boolean(value)
    }
}

impl From<f64> for AnyValue {
    fn from(value: f64) -> Self {
        AnyValue::Number(value)
    }
}

impl From<&str> for AnyValue {
    fn from(value: &str) -> Self {
        AnyValue::Text(value.to_string())
    }
}

impl From<String> for AnyValue {
    fn from(value: String) -> Self {
        AnyValue::Text(value)
    }
}

impl From<ObjectRef> for AnyValue {
    fn from(value: ObjectRef) -> Self {
        AnyValue::Object(value)
    }
}

/// A value converted to (or about to be converted from) engine form.
#[derive(Debug, PartialEq)]
pub enum MarshaledValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    Sequence(Vec<MarshaledValue>),
    /// `None` is the only native state that maps to null/undefined.
    Optional(Option<Box<MarshaledValue>>),
    Any(AnyValue),
    Object(ObjectRef),
}

impl MarshaledValue {
    pub fn absent() -> Self {
        MarshaledValue::Optional(None)
    }

    pub fn present(value: MarshaledValue) -> Self {
        MarshaledValue::Optional(Some(Box::new(value)))
    }

    /// Result of a member that returns nothing.
    pub fn unit() -> Self {
        MarshaledValue::Any(AnyValue::Undefined)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MarshaledValue::Boolean(_) => "boolean",
            MarshaledValue::Number(_) => "number",
            MarshaledValue::Text(_) => "string",
            MarshaledValue::Sequence(_) => "array",
            MarshaledValue::Optional(None) => "absent",
            MarshaledValue::Optional(Some(inner)) => inner.kind(),
            MarshaledValue::Any(value) => value.kind(),
            MarshaledValue::Object(_) => "object",
        }
    }

    /// Whether this would be written as engine `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        match self {
            MarshaledValue::Optional(None) => true,
            MarshaledValue::Optional(Some(inner)) => inner.is_nullish(),
            MarshaledValue::Any(value) => value.is_nullish(),
            _ => false,
        }
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(match self {
            MarshaledValue::Boolean(value) => MarshaledValue::Boolean(*value),
            MarshaledValue::Number(value) => MarshaledValue::Number(*value),
            MarshaledValue::Text(value) => MarshaledValue::Text(value.clone()),
            MarshaledValue::Sequence(items) => MarshaledValue::Sequence(
                items
                    .iter()
                    .map(MarshaledValue::try_clone)
                    .collect::<Result<Vec<_>>>()?,
            ),
            MarshaledValue::Optional(None) => MarshaledValue::Optional(None),
            MarshaledValue::Optional(Some(inner)) => MarshaledValue::present(inner.try_clone()?),
            MarshaledValue::Any(value) => MarshaledValue::Any(value.try_clone()?),
            MarshaledValue::Object(object) => MarshaledValue::Object(object.try_clone()?),
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MarshaledValue::Boolean(value) => json!(value),
            MarshaledValue::Number(value) => json!(value),
            MarshaledValue::Text(value) => json!(value),
            MarshaledValue::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(MarshaledValue::to_json).collect())
            }
            MarshaledValue::Optional(None) => serde_json::Value::Null,
            MarshaledValue::Optional(Some(inner)) => inner.to_json(),
            MarshaledValue::Any(value) => value.to_json(),
            MarshaledValue::Object(object) => json!({ "$ref": object.handle().id().to_bits() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_render_like_declarations() {
        let shape = ValueShape::optional(ValueShape::sequence(ValueShape::sequence(ValueShape::Text)));
        assert_eq!(shape.to_string(), "?Array<Array<string>>");
        assert_eq!(ValueShape::Any.to_string(), "any");
    }

    #[test]
    fn json_snapshot_keeps_structure() {
        let value = MarshaledValue::Sequence(vec![
            MarshaledValue::present(MarshaledValue::Number(1.0)),
            MarshaledValue::absent(),
            MarshaledValue::Any(AnyValue::Array(vec!["a".into(), true.into()])),
        ]);
        assert_eq!(value.to_json(), json!([1.0, null, ["a", true]]));
    }

    #[test]
    fn optional_reports_inner_kind() {
        assert_eq!(MarshaledValue::absent().kind(), "absent");
        assert_eq!(MarshaledValue::present(MarshaledValue::Text("x".into())).kind(), "string");
    }

    #[test]
    fn nullish_payloads_are_detected_through_optionals() {
        assert!(MarshaledValue::absent().is_nullish());
        assert!(MarshaledValue::unit().is_nullish());
        assert!(MarshaledValue::present(MarshaledValue::Any(AnyValue::Null)).is_nullish());
        assert!(!MarshaledValue::present(MarshaledValue::Number(0.0)).is_nullish());
        assert!(!MarshaledValue::Sequence(vec![]).is_nullish());
    }

    #[test]
    fn primitive_clones_need_no_engine() {
        let value = AnyValue::Array(vec![AnyValue::Null, 2.5.into()]);
        assert_eq!(value.try_clone().unwrap(), value);
        assert!(AnyValue::Undefined.is_nullish());
        assert!(!AnyValue::Number(0.0).is_nullish());
    }
}
