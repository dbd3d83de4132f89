//! Argument literal values (`spec.md` §3.2, §6.4).
//!
//! [`Literal`] is what the Transport Layer hands the planner inside
//! `where`/`orderBy`/pagination arguments — already coerced to GraphQL
//! literal shape, but not yet cast to any particular scalar's native SQL
//! type (that happens per-property via [`crate::scalar`]). Grounded on the
//! `ArgumentValue` enum used for planner-bound GraphQL arguments in the
//! `fraiseql` reference pack, generalized from deno's `v8::Value` in the
//! teacher's `decode_v8.rs`.

use anyhow::{Result, bail};
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Literal>),
    Object(IndexMap<String, Literal>),
}

/// An absent `where` argument is an empty input object, not a null — matches
/// `SelectArgs::empty_where()` and keeps `#[derive(Default)]` on `SelectArgs`
/// meaningful rather than relying on `has_conditions`'s null-tolerant fallback.
impl Default for Literal {
    fn default() -> Self {
        Literal::Object(IndexMap::new())
    }
}

impl Literal {
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Literal::Null,
            serde_json::Value::Bool(b) => Literal::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Literal::Int(i)
                } else {
                    Literal::Float(n.as_f64().unwrap_or(0.0))
                }
            },
            serde_json::Value::String(s) => Literal::String(s.clone()),
            serde_json::Value::Array(items) => Literal::List(items.iter().map(Literal::from_json).collect()),
            serde_json::Value::Object(map) => {
                Literal::Object(map.iter().map(|(k, v)| (k.clone(), Literal::from_json(v))).collect())
            },
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    pub fn as_object(&self) -> Result<&IndexMap<String, Literal>> {
        match self {
            Literal::Object(map) => Ok(map),
            other => bail!("expected an input object, found {other:?}"),
        }
    }

    pub fn as_list(&self) -> Result<Vec<&Literal>> {
        match self {
            Literal::List(items) => Ok(items.iter().collect()),
            // OR/AND accept both arrays and single objects (spec.md §4.3, §9).
            single => Ok(vec![single]),
        }
    }

    /// Renders the literal as a wire (transport) string, the form the
    /// Scalar Codec Registry's `fromTransportCast` expects as its bound
    /// parameter.
    pub fn as_wire_string(&self) -> Result<String> {
        Ok(match self {
            Literal::String(s) => s.clone(),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Bool(b) => b.to_string(),
            other => bail!("expected a scalar literal, found {other:?}"),
        })
    }
}

/// A value ready to be bound as a positional SQL parameter, already typed
/// for the driver (not necessarily the scalar's *wire* type — `BigInt`,
/// `DateTime`, and `Bytes` bind as `Text` and are cast to their native SQL
/// type inside the generated SQL, per `scalar::write_from_transport_cast`).
#[derive(Debug, Clone)]
pub enum BoundValue {
    Text(String),
    TextArray(Vec<String>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl BoundValue {
    /// Binds this value onto a `sqlx::Any` query, in the order parameters
    /// were pushed.
    pub fn bind<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    ) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
        match self {
            BoundValue::Text(s) => query.bind(s.as_str()),
            BoundValue::TextArray(items) => query.bind(items.clone()),
            BoundValue::Int(i) => query.bind(*i),
            BoundValue::Float(f) => query.bind(*f),
            BoundValue::Bool(b) => query.bind(*b),
        }
    }
}

/// Binds `literal` for scalar `scalar_name`, producing the [`BoundValue`]
/// `scalar::write_from_transport_cast` expects as its placeholder's type.
pub fn bind_scalar_literal(scalar_name: &str, literal: &Literal) -> Result<BoundValue> {
    use crate::scalar;
    match scalar_name {
        scalar::INT => Ok(BoundValue::Int(match literal {
            Literal::Int(i) => *i,
            other => bail!("expected an Int literal, found {other:?}"),
        })),
        scalar::FLOAT => Ok(BoundValue::Float(match literal {
            Literal::Float(f) => *f,
            Literal::Int(i) => *i as f64,
            other => bail!("expected a Float literal, found {other:?}"),
        })),
        scalar::BOOLEAN => Ok(BoundValue::Bool(match literal {
            Literal::Bool(b) => *b,
            other => bail!("expected a Boolean literal, found {other:?}"),
        })),
        scalar::ID | scalar::STRING => Ok(BoundValue::Text(literal.as_wire_string()?)),
        scalar::BIG_INT | scalar::DATE_TIME | scalar::BYTES => {
            let wire = literal.as_wire_string()?;
            scalar::validate_transport(scalar_name, &wire)?;
            Ok(BoundValue::Text(wire))
        },
        other => bail!("unknown scalar {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_json_scalars() {
        assert_eq!(Literal::from_json(&serde_json::json!(null)), Literal::Null);
        assert_eq!(Literal::from_json(&serde_json::json!(42)), Literal::Int(42));
        assert_eq!(Literal::from_json(&serde_json::json!("hi")), Literal::String("hi".into()));
    }

    #[test]
    fn single_object_counts_as_a_one_element_list() {
        let obj = Literal::Object(IndexMap::new());
        let list = obj.as_list().unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn bind_big_int_validates_the_wire_format() {
        assert!(bind_scalar_literal("BigInt", &Literal::String("123".into())).is_ok());
        assert!(bind_scalar_literal("BigInt", &Literal::String("12.3".into())).is_err());
    }
}
