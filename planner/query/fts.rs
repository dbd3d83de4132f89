//! Full-text search (`spec.md` §4.4.7).
//!
//! One `UNION ALL` branch per `FtsSource`, each built with `builder::select`'s
//! `Variant::Fts`. Grounded on `datastore/query/build.rs`'s per-type branch
//! composition, generalized to a fixed four-column head
//! (`isTypeOf, rank, highlight?, item`) instead of the teacher's
//! single-entity-typed result set.
//!
//! Each branch gets its own `JoinSet` (joins don't cross a `UNION ALL`
//! boundary) but shares the request's `AliasAllocator` and parameter vector,
//! so aliases stay unique and every branch's placeholders land at the right
//! position in the one combined statement actually sent to the driver.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use model::Model;
use serde_json::Value;

use crate::error::schema_error;
use super::alias::JoinSet;
use super::builder::{select, SelectArgs, Variant};
use super::cursor::PlanState;
use super::field_tree::{build_fields, RequestedField, Selection};
use super::shape::shape_row;
use super::value::{BoundValue, Literal};

/// One compiled `UNION ALL` branch, with the fields tree needed to shape
/// its own `item` column once executed.
pub struct FtsBranch {
    pub entity: String,
    pub fields: Vec<RequestedField>,
}

/// Filters `item`'s sub-selections down to the ones that apply to `entity`:
/// a plain field (no `typeCondition`) applies to every source; an inline
/// fragment (`... on <Entity> { }`) applies only to its named source.
fn fields_for_source(model: &Model, entity: &str, selections: &[Selection]) -> Result<Vec<RequestedField>> {
    let target = model.entity(entity)?;
    let filtered: Vec<Selection> = selections
        .iter()
        .filter(|s| s.name != "isTypeOf")
        .filter(|s| s.type_condition.is_none() || s.type_condition.as_deref() == Some(entity))
        .cloned()
        .collect();
    build_fields(model, &target.properties, &filtered)
}

/// Composes the full `UNION ALL ... ORDER BY rank DESC [LIMIT ...] [OFFSET
/// ...]` statement for `query_name`. `where_by_entity` resolves each
/// source's own `where<Entity>` argument (a transport-layer concern; this
/// module only needs the per-entity `Literal` it already parsed).
pub fn build_search(
    model: &Model,
    state: Rc<RefCell<PlanState>>,
    query_name: &str,
    text: &str,
    where_by_entity: impl Fn(&str) -> Literal,
    item_selections: &[Selection],
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<(String, Vec<FtsBranch>)> {
    let fts_query = model.fts_query(query_name)?.clone();
    let text_placeholder = state.borrow_mut().bind(BoundValue::Text(text.to_string()));

    let mut branch_sql = Vec::with_capacity(fts_query.sources.len());
    let mut branches = Vec::with_capacity(fts_query.sources.len());
    for source in &fts_query.sources {
        let fields = fields_for_source(model, &source.entity, item_selections)?;
        let args = SelectArgs {
            where_: where_by_entity(&source.entity),
            order_by: Vec::new(),
            offset: None,
            limit: None,
        };
        let variant = Variant::Fts {
            query_name: query_name.to_string(),
            text_placeholder: text_placeholder.clone(),
        };
        // Each UNION ALL branch is its own standalone statement: reset the
        // shared JoinSet so this branch doesn't inherit joins a previous
        // branch registered against a different FROM.
        state.borrow_mut().joins = JoinSet::new();
        let (sql, _kinds) = select(model, state.clone(), &source.entity, &args, Some(&fields), variant)?;
        branch_sql.push(sql);
        branches.push(FtsBranch { entity: source.entity.clone(), fields });
    }

    let mut sql = branch_sql.join(" UNION ALL ");
    sql.push_str(" ORDER BY rank DESC");
    if let Some(limit) = limit {
        let placeholder = state.borrow_mut().bind(BoundValue::Int(limit));
        sql.push_str(" LIMIT ");
        sql.push_str(&placeholder);
    }
    if let Some(offset) = offset {
        if offset != 0 {
            let placeholder = state.borrow_mut().bind(BoundValue::Int(offset));
            sql.push_str(" OFFSET ");
            sql.push_str(&placeholder);
        }
    }
    Ok((sql, branches))
}

/// Shapes one hit row into `{rank, highlight?, item}`, with `item.isTypeOf`
/// set to the row's discriminator (`spec.md` §4.4.7). Column order matches
/// `builder::select`'s `Variant::Fts` head: `isTypeOf, rank, highlight?, item`.
pub fn shape_hit(row: &[Value], has_highlight: bool, branches: &[FtsBranch]) -> Result<Value> {
    let is_type_of = row
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| schema_error("fts row missing isTypeOf discriminator"))?;
    let rank = row.get(1).cloned().unwrap_or(Value::Null);
    let branch = branches
        .iter()
        .find(|b| b.entity == is_type_of)
        .ok_or_else(|| schema_error(format!("no fts branch registered for entity {is_type_of:?}")))?;

    let item_index = if has_highlight { 3 } else { 2 };
    let item_cell = row.get(item_index).ok_or_else(|| schema_error("fts row missing item column"))?;
    let item_row = item_cell
        .as_array()
        .ok_or_else(|| schema_error(format!("fts item column must be a JSON array, found {item_cell:?}")))?;
    let mut item = shape_row(item_row, &branch.fields)?;
    if let Value::Object(map) = &mut item {
        map.insert("isTypeOf".to_string(), Value::String(is_type_of.to_string()));
    }

    let mut hit = serde_json::Map::new();
    hit.insert("rank".to_string(), rank);
    if has_highlight {
        hit.insert("highlight".to_string(), row.get(2).cloned().unwrap_or(Value::Null));
    }
    hit.insert("item".to_string(), item);
    Ok(Value::Object(hit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Entity, FtsQuery, FtsSource, Property, PropertyType};
    use sqlx::any::AnyKind;
    use std::sync::Arc;

    fn prop(type_: PropertyType) -> Arc<Property> {
        Arc::new(Property { type_, nullable: false, description: None })
    }

    fn test_model() -> Model {
        let mut account_props = indexmap::IndexMap::new();
        account_props.insert("wallet".to_string(), prop(PropertyType::Scalar("String".into())));
        let mut loan_props = indexmap::IndexMap::new();
        loan_props.insert("memo".to_string(), prop(PropertyType::Scalar("String".into())));

        let mut entities = indexmap::IndexMap::new();
        entities.insert("Account".to_string(), Arc::new(Entity::new("Account", account_props)));
        entities.insert("Loan".to_string(), Arc::new(Entity::new("Loan", loan_props)));

        let mut fts_queries = indexmap::IndexMap::new();
        fts_queries.insert(
            "search".to_string(),
            Arc::new(FtsQuery {
                name: "search".into(),
                sources: vec![
                    FtsSource { entity: "Account".into(), fields: vec!["wallet".into()] },
                    FtsSource { entity: "Loan".into(), fields: vec!["memo".into()] },
                ],
            }),
        );
        Model { entities, fts_queries, ..Model::default() }
    }

    fn sel(name: &str) -> Selection {
        Selection { name: name.to_string(), alias: name.to_string(), args: Literal::Null, children: Vec::new(), type_condition: None }
    }

    #[test]
    fn build_search_unions_every_source_and_resets_joins_per_branch() {
        let model = test_model();
        let state = PlanState::new(AnyKind::Postgres);
        let selections = vec![
            Selection { type_condition: Some("Account".into()), ..sel("wallet") },
            Selection { type_condition: Some("Loan".into()), ..sel("memo") },
        ];
        let (sql, branches) = build_search(
            &model, state, "search", "hello", |_| Literal::Object(indexmap::IndexMap::new()),
            &selections, Some(10), None,
        ).unwrap();
        assert_eq!(sql.matches(" UNION ALL ").count(), 1);
        assert_eq!(sql.matches("SELECT").count(), 2);
        assert!(sql.contains("ORDER BY rank DESC"));
        assert!(sql.contains("LIMIT"));
        assert_eq!(branches.len(), 2);
    }

    #[test]
    fn shape_hit_picks_the_matching_branch_and_sets_is_type_of() {
        let branches = vec![
            FtsBranch { entity: "Account".into(), fields: vec![] },
            FtsBranch { entity: "Loan".into(), fields: vec![] },
        ];
        let row = vec![Value::String("Loan".into()), Value::from(0.42), Value::Array(vec![])];
        let hit = shape_hit(&row, false, &branches).unwrap();
        assert_eq!(hit["item"]["isTypeOf"], Value::String("Loan".into()));
        assert_eq!(hit["rank"], Value::from(0.42));
    }
}
