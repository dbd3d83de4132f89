//! Main SELECT-composition engine (`spec.md` §4.4.3).
//!
//! Grounded on `datastore/query/build.rs`'s column/join/where assembly,
//! generalized from a deno-`v8`-bound bytecode target to plain SQL text.
//! `select()` is the single entry point for all three statement shapes
//! (`Variant::Normal`/`ListSubquery`/`Fts`); `executeSelect`/
//! `executeSelectCount`/`executeListCount`/`executeFulltextSearch`
//! (`query::Planner`, in `query/mod.rs`) are thin callers that bind and run
//! the SQL this module produces.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::Result;
use model::{Model, PropertyType};

use crate::scalar::{self, ColumnKind};
use super::cursor::{Cursor, PlanState};
use super::field_tree::RequestedField;
use super::value::{BoundValue, Literal};
use super::where_clause::generate_where;
use super::order_by::populate_order_by;

/// The three statement shapes `select()` can produce (`spec.md` §4.4).
#[derive(Debug, Clone)]
pub enum Variant {
    /// A standalone top-level list or its count.
    Normal,
    /// A correlated subquery embedded as `array(...)` inside a parent row;
    /// `fk_field` names the fk property on *this* entity that must equal
    /// `parent_id_expr`.
    ListSubquery { fk_field: String, parent_id_expr: String },
    /// One UNION ALL branch of a full-text search.
    Fts { query_name: String, text_placeholder: String },
}

/// The arguments a `select()` call is parameterized over, already resolved
/// from GraphQL input shape (`spec.md` §3.2, §4.4.6).
#[derive(Debug, Clone, Default)]
pub struct SelectArgs {
    pub where_: Literal,
    pub order_by: Vec<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl SelectArgs {
    pub fn empty_where() -> Literal {
        Literal::Object(indexmap::IndexMap::new())
    }
}

/// Deduplicated list of SELECT-list expressions, keyed by their rendered
/// SQL text (invariant 2/3, `spec.md` §8): requesting the same expression
/// twice (e.g. an explicit `id` under an `fk` alongside the column the
/// planner always emits for it) reuses the same index.
///
/// Each column also carries the [`ColumnKind`] its value decodes through.
/// Only the outermost `select()` call's kinds are ever consulted by a
/// caller — everything nested beneath a list-relation subquery or an
/// object/union JSON blob already arrives pre-shaped as JSON, so it is
/// walked generically by the Row Shaper instead (`spec.md` §4.4.5).
#[derive(Debug, Default)]
pub struct ColumnSet {
    exprs: Vec<String>,
    kinds: Vec<ColumnKind>,
    index: HashMap<String, usize>,
}

impl ColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, expr: String, kind: ColumnKind) -> usize {
        if let Some(&i) = self.index.get(&expr) {
            return i;
        }
        let i = self.exprs.len();
        self.index.insert(expr.clone(), i);
        self.exprs.push(expr);
        self.kinds.push(kind);
        i
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn render(&self) -> String {
        self.exprs.join(", ")
    }

    pub fn kinds(&self) -> Vec<ColumnKind> {
        self.kinds.clone()
    }
}

/// Walks `fields`, populating `columns` and each field's `index`
/// (`spec.md` §4.4.3 step 2).
pub fn populate_columns(cursor: &Cursor, fields: &[RequestedField], columns: &mut ColumnSet) -> Result<()> {
    for field in fields {
        match &field.prop_type {
            PropertyType::Scalar(name) => {
                let expr = cursor.transport(&field.prop_name)?;
                field.index.set(Some(columns.add(expr, scalar::column_kind(name)?)));
            },
            PropertyType::Enum(_) => {
                let expr = cursor.transport(&field.prop_name)?;
                field.index.set(Some(columns.add(expr, ColumnKind::Text)));
            },
            PropertyType::List(_) => {
                let expr = cursor.transport(&field.prop_name)?;
                field.index.set(Some(columns.add(expr, ColumnKind::Json)));
            },
            PropertyType::Object(_) => {
                let presence = format!("(({})) IS NULL", cursor.field(&field.prop_name)?);
                field.index.set(Some(columns.add(presence, ColumnKind::Bool)));
                let child = cursor.child(&field.prop_name)?;
                populate_columns(&child, &field.children, columns)?;
            },
            PropertyType::Union(_) => {
                let child = cursor.child(&field.prop_name)?;
                let is_type_of = child.transport("isTypeOf")?;
                field.index.set(Some(columns.add(is_type_of, ColumnKind::Text)));
                populate_columns(&child, &field.children, columns)?;
            },
            PropertyType::Fk(_) => {
                let child = cursor.child(&field.prop_name)?;
                let id_expr = child.transport("id")?;
                field.index.set(Some(columns.add(id_expr, ColumnKind::Text)));
                populate_columns(&child, &field.children, columns)?;
            },
            PropertyType::ListRelation { entity, field: inverse_field } => {
                let parent_id = cursor.native("id")?;
                let list_args = field.args.clone().unwrap_or_default();
                let args = SelectArgs {
                    where_: list_args.where_,
                    order_by: list_args.order_by,
                    offset: list_args.offset,
                    limit: list_args.limit,
                };
                let variant = Variant::ListSubquery { fk_field: inverse_field.clone(), parent_id_expr: parent_id };
                let (sub_sql, _) = select(
                    cursor.model(), cursor.state().clone(), entity, &args, Some(&field.children), variant,
                )?;
                field.index.set(Some(columns.add(format!("array({sub_sql})"), ColumnKind::Json)));
            },
        }
    }
    Ok(())
}

/// Composes one complete SQL statement: `SELECT ... FROM ... [JOIN ...]
/// [WHERE ...] [ORDER BY ...] [LIMIT ...] [OFFSET ...]` (`spec.md` §4.4.3).
///
/// Returns the SQL text alongside the [`ColumnKind`] of each column this
/// particular call's own `SELECT` list projects. Only the outermost call a
/// `query::Planner` operation makes needs these — nested `ListSubquery`/
/// `Fts` calls embed their own projection as a single pre-shaped JSON value
/// in the *caller's* column list, so their own kinds are only ever used to
/// decide how those inner columns are cast, never consulted directly.
pub fn select(
    model: &Model,
    state: Rc<RefCell<PlanState>>,
    entity_name: &str,
    args: &SelectArgs,
    fields: Option<&[RequestedField]>,
    variant: Variant,
) -> Result<(String, Vec<ColumnKind>)> {
    let cursor = Cursor::root(model, entity_name, state.clone())?;

    let mut columns = ColumnSet::new();
    if let Some(fields) = fields {
        populate_columns(&cursor, fields, &mut columns)?;
    }

    let mut predicates = Vec::new();
    if let Some(expr) = generate_where(&cursor, &args.where_)? {
        predicates.push(expr);
    }
    match &variant {
        Variant::ListSubquery { fk_field, parent_id_expr } => {
            let fk_expr = cursor.fk(fk_field)?;
            predicates.push(format!("{fk_expr} = {parent_id_expr}"));
        },
        Variant::Fts { query_name, text_placeholder } => {
            predicates.push(format!(
                "phraseto_tsquery('english', {text_placeholder}) @@ {}",
                cursor.tsv(query_name)?
            ));
        },
        Variant::Normal => {},
    }

    let mut tail = String::new();
    if !matches!(variant, Variant::Fts { .. }) {
        if let Some(order_by) = populate_order_by(&cursor, &args.order_by)? {
            tail.push_str(" ORDER BY ");
            tail.push_str(&order_by);
        }
        if let Some(limit) = args.limit {
            let placeholder = state.borrow_mut().bind(BoundValue::Int(limit));
            tail.push_str(" LIMIT ");
            tail.push_str(&placeholder);
        }
        if let Some(offset) = args.offset {
            if offset != 0 {
                let placeholder = state.borrow_mut().bind(BoundValue::Int(offset));
                tail.push_str(" OFFSET ");
                tail.push_str(&placeholder);
            }
        }
    }

    // Joins are rendered only now, after column/where population has
    // registered every one it needs (`spec.md` §4.4.3 step 6).
    let joins_sql = state.borrow().joins.render();

    let mut sql = String::new();
    match &variant {
        Variant::Fts { query_name, text_placeholder } => {
            sql.push_str("SELECT ");
            sql.push_str(&crate::sql_writer::sql_string_literal(entity_name));
            sql.push_str(" AS is_type_of, ts_rank(");
            sql.push_str(&cursor.tsv(query_name)?);
            sql.push_str(", phraseto_tsquery('english', ");
            sql.push_str(text_placeholder);
            sql.push_str(")) AS rank, ts_headline(");
            sql.push_str(&cursor.doc(query_name)?);
            sql.push_str(", phraseto_tsquery('english', ");
            sql.push_str(text_placeholder);
            sql.push_str(")) AS highlight, ");
            if columns.is_empty() {
                sql.push_str("'[]'::json AS item");
            } else {
                sql.push_str("json_build_array(");
                sql.push_str(&columns.render());
                sql.push_str(") AS item");
            }
        },
        Variant::ListSubquery { .. } => {
            sql.push_str("SELECT json_build_array(");
            sql.push_str(&columns.render());
            sql.push(')');
        },
        Variant::Normal => {
            sql.push_str("SELECT ");
            // A bare `fields: None` call (`executeListCount`, `spec.md`
            // §4.4.6) only needs the row to exist, not any particular
            // projection — `1` keeps the statement valid SQL.
            sql.push_str(if columns.is_empty() { "1" } else { &columns.render() });
        },
    }

    sql.push_str(" FROM \"");
    sql.push_str(&crate::naming::table_name(entity_name).0.replace('"', "\"\""));
    sql.push_str("\" \"");
    sql.push_str(&cursor.alias().0.replace('"', "\"\""));
    sql.push('"');
    sql.push_str(&joins_sql);
    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }
    sql.push_str(&tail);
    Ok((sql, columns.kinds()))
}

/// `executeSelectCount`/`executeListCount`: a `count(*)` over the same
/// FROM/JOIN/WHERE a matching `select()` call would produce, with no
/// projection, ordering, or pagination (`spec.md` §4.4).
pub fn select_count(model: &Model, state: Rc<RefCell<PlanState>>, entity_name: &str, where_: &Literal) -> Result<String> {
    let cursor = Cursor::root(model, entity_name, state.clone())?;
    let predicate = generate_where(&cursor, where_)?;
    let joins_sql = state.borrow().joins.render();

    let mut sql = String::from("SELECT count(*) FROM \"");
    sql.push_str(&crate::naming::table_name(entity_name).0.replace('"', "\"\""));
    sql.push_str("\" \"");
    sql.push_str(&cursor.alias().0.replace('"', "\"\""));
    sql.push('"');
    sql.push_str(&joins_sql);
    if let Some(expr) = predicate {
        sql.push_str(" WHERE ");
        sql.push_str(&expr);
    }
    Ok(sql)
}
