//! Row shaper (`spec.md` §4.4.5).
//!
//! Walks a requested-field tree in lockstep with one flat decoded row,
//! reconstructing the nested response object. The top-level row's scalar
//! cells are decoded by the caller per `scalar::ColumnKind` before this
//! module ever sees them; anything nested beneath an object/union/fk/
//! listRelation column already arrived as JSON (`json_build_array`, or
//! `to_json` for list-typed columns — see `query::cursor`/`query::builder`)
//! and is walked here with no further scalar dispatch.

use anyhow::{Result, bail};
use model::PropertyType;
use serde_json::Value;

use crate::error::schema_error;
use super::field_tree::RequestedField;

/// Shapes every row in `rows` against the same `fields` tree.
pub fn shape_rows(rows: &[Vec<Value>], fields: &[RequestedField]) -> Result<Vec<Value>> {
    rows.iter().map(|row| shape_row(row, fields)).collect()
}

/// Shapes one top-level row. Equivalent to `shape_children` with no active
/// union discriminator, since top-level fields never carry `ifType`.
pub fn shape_row(row: &[Value], fields: &[RequestedField]) -> Result<Value> {
    shape_children(row, fields, None)
}

fn cell<'r>(row: &'r [Value], index: usize) -> Result<&'r Value> {
    row.get(index).ok_or_else(|| schema_error(format!("row has no column at index {index}")))
}

/// Shapes `children` into one output object, skipping any field whose
/// `ifType` doesn't match `discriminator` (union variant filtering,
/// `spec.md` §4.4.5). `discriminator` is `None` outside a union.
fn shape_children(row: &[Value], children: &[RequestedField], discriminator: Option<&str>) -> Result<Value> {
    let mut out = serde_json::Map::with_capacity(children.len());
    for field in children {
        if let Some(if_type) = &field.if_type {
            if Some(if_type.as_str()) != discriminator {
                continue;
            }
        }
        out.insert(field.alias.clone(), shape_field(row, field)?);
    }
    Ok(Value::Object(out))
}

fn shape_field(row: &[Value], field: &RequestedField) -> Result<Value> {
    match &field.prop_type {
        PropertyType::Scalar(_) | PropertyType::Enum(_) | PropertyType::List(_) => {
            Ok(cell(row, field.index())?.clone())
        },
        PropertyType::Object(_) => {
            let sentinel = cell(row, field.index())?;
            let is_null = sentinel.as_bool()
                .ok_or_else(|| schema_error(format!("object presence sentinel must be boolean, found {sentinel:?}")))?;
            if is_null {
                Ok(Value::Null)
            } else {
                shape_children(row, &field.children, None)
            }
        },
        PropertyType::Union(_) => {
            match cell(row, field.index())? {
                Value::Null => Ok(Value::Null),
                Value::String(discriminator) => {
                    let discriminator = discriminator.clone();
                    let mut shaped = shape_children(row, &field.children, Some(&discriminator))?;
                    if let Value::Object(map) = &mut shaped {
                        map.insert("isTypeOf".to_string(), Value::String(discriminator));
                    }
                    Ok(shaped)
                },
                other => bail!(schema_error(format!("isTypeOf discriminator must be a string, found {other:?}"))),
            }
        },
        PropertyType::Fk(_) => {
            let id = cell(row, field.index())?;
            if id.is_null() {
                Ok(Value::Null)
            } else {
                shape_children(row, &field.children, None)
            }
        },
        PropertyType::ListRelation { .. } => {
            let cell = cell(row, field.index())?;
            let items = cell.as_array()
                .ok_or_else(|| schema_error(format!("listRelation cell must be a JSON array, found {cell:?}")))?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let item_row = item.as_array()
                    .ok_or_else(|| schema_error(format!("listRelation element must be a JSON array row, found {item:?}")))?;
                out.push(shape_children(item_row, &field.children, None)?);
            }
            Ok(Value::Array(out))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn field(alias: &str, prop_type: PropertyType, index: usize) -> RequestedField {
        RequestedField {
            alias: alias.to_string(),
            prop_name: alias.to_string(),
            prop_type,
            children: Vec::new(),
            args: None,
            if_type: None,
            index: Cell::new(Some(index)),
        }
    }

    #[test]
    fn scalar_fields_read_by_index() {
        let row = vec![Value::String("alice".into()), Value::from(42)];
        let fields = vec![
            field("wallet", PropertyType::Scalar("String".into()), 0),
            field("balance", PropertyType::Scalar("Int".into()), 1),
        ];
        let shaped = shape_row(&row, &fields).unwrap();
        assert_eq!(shaped["wallet"], Value::String("alice".into()));
        assert_eq!(shaped["balance"], Value::from(42));
    }

    #[test]
    fn object_omitted_when_presence_sentinel_true() {
        let row = vec![Value::Bool(true)];
        let mut object_field = field("meta", PropertyType::Object("Meta".into()), 0);
        object_field.children = vec![field("note", PropertyType::Scalar("String".into()), 1)];
        let shaped = shape_row(&row, &[object_field]).unwrap();
        assert_eq!(shaped["meta"], Value::Null);
    }

    #[test]
    fn object_recurses_when_present() {
        let row = vec![Value::Bool(false), Value::String("hi".into())];
        let mut object_field = field("meta", PropertyType::Object("Meta".into()), 0);
        object_field.children = vec![field("note", PropertyType::Scalar("String".into()), 1)];
        let shaped = shape_row(&row, &[object_field]).unwrap();
        assert_eq!(shaped["meta"]["note"], Value::String("hi".into()));
    }

    #[test]
    fn fk_omitted_when_id_null() {
        let row = vec![Value::Null];
        let mut fk_field = field("account", PropertyType::Fk("Account".into()), 0);
        fk_field.children = vec![field("wallet", PropertyType::Scalar("String".into()), 1)];
        let shaped = shape_row(&row, &[fk_field]).unwrap();
        assert_eq!(shaped["account"], Value::Null);
    }

    #[test]
    fn union_filters_variant_specific_fields_and_sets_is_type_of() {
        let row = vec![Value::String("Dog".into()), Value::String("rex".into()), Value::String("corgi".into())];
        let mut name_field = field("name", PropertyType::Scalar("String".into()), 1);
        name_field.if_type = None;
        let mut breed_field = field("breed", PropertyType::Scalar("String".into()), 2);
        breed_field.if_type = Some("Dog".into());
        let mut union_field = field("pet", PropertyType::Union("Pet".into()), 0);
        union_field.children = vec![name_field, breed_field];

        let shaped = shape_row(&row, &[union_field]).unwrap();
        assert_eq!(shaped["pet"]["isTypeOf"], Value::String("Dog".into()));
        assert_eq!(shaped["pet"]["name"], Value::String("rex".into()));
        assert_eq!(shaped["pet"]["breed"], Value::String("corgi".into()));
    }

    #[test]
    fn union_null_discriminator_omits_field() {
        let row = vec![Value::Null];
        let union_field = field("pet", PropertyType::Union("Pet".into()), 0);
        let shaped = shape_row(&row, &[union_field]).unwrap();
        assert_eq!(shaped["pet"], Value::Null);
    }

    #[test]
    fn list_relation_recurses_per_element() {
        let inner_row_a = Value::Array(vec![Value::from(1)]);
        let inner_row_b = Value::Array(vec![Value::from(2)]);
        let row = vec![Value::Array(vec![inner_row_a, inner_row_b])];
        let mut list_field = field(
            "history",
            PropertyType::ListRelation { entity: "HistoricalBalance".into(), field: "account".into() },
            0,
        );
        list_field.children = vec![field("balance", PropertyType::Scalar("Int".into()), 0)];
        let shaped = shape_row(&row, &[list_field]).unwrap();
        let items = shaped["history"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["balance"], Value::from(1));
        assert_eq!(items[1]["balance"], Value::from(2));
    }
}
