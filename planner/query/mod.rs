//! The Query Planner's public surface: `Planner`, bound to one request's
//! `ctx::DataCtx`, exposing the operations `spec.md` §4.4 describes —
//! `execute_select`, `execute_select_count`, `execute_list_count`,
//! `execute_fulltext_search`, and `execute_connection` (the full §4.4.6
//! connection algorithm, composed from the other four plus
//! `connection::paginate`). Each composes `builder::select`/`select_count`
//! or `fts::build_search`, runs the resulting statement over the bound
//! transaction, decodes rows per `scalar::ColumnKind`, and shapes them with
//! `shape::shape_row`. Grounded on the teacher's `query/mod.rs` (a
//! `Query`/`OutputExpr` pairing of SQL text with a decode plan, executed by
//! `query::exec`), generalized from a deno-`v8`-bound bytecode interpreter
//! loop to plain `sqlx::Any` row decoding.

pub mod alias;
pub mod builder;
pub mod connection;
pub mod cursor;
pub mod field_tree;
pub mod fts;
pub mod order_by;
pub mod shape;
pub mod value;
pub mod where_clause;

use sqlx::Row;

use crate::ctx::DataCtx;
use crate::error::{self, user_error, PlannerError};
use crate::scalar::ColumnKind;
use builder::{select, select_count, SelectArgs, Variant};
use cursor::PlanState;
use field_tree::{build_connection_fields, build_fields, RequestedField, Selection};

/// Binds one request's planning and execution. Not shared across requests
/// (`spec.md` §3.3, §5).
pub struct Planner {
    ctx: DataCtx,
}

/// One edge of a planned connection. `cursor` is `None` when the connection's
/// own selection never asked for it; `node` is `None` when only
/// `cursor`/`pageInfo` was requested (`spec.md` §4.2, §4.4.6).
#[derive(Debug, Clone)]
pub struct ConnectionEdge {
    pub cursor: Option<String>,
    pub node: Option<serde_json::Value>,
}

/// `Planner::execute_connection`'s result: `total_count` is `None` unless
/// `totalCount` was requested.
#[derive(Debug, Clone)]
pub struct ConnectionResult {
    pub total_count: Option<i64>,
    pub page_info: connection::PageInfo,
    pub edges: Vec<ConnectionEdge>,
}

impl Planner {
    pub fn new(ctx: DataCtx) -> Self {
        Self { ctx }
    }

    pub fn model(&self) -> &model::Model {
        &self.ctx.model
    }

    /// Closes out the bound transaction, per `spec.md` §5's "released on
    /// every exit path".
    pub async fn commit(self) -> error::Result<()> {
        self.ctx.commit().await.map_err(PlannerError::from_anyhow)
    }

    pub async fn rollback(self) -> error::Result<()> {
        self.ctx.rollback().await.map_err(PlannerError::from_anyhow)
    }

    fn plan_state(&self) -> std::rc::Rc<std::cell::RefCell<PlanState>> {
        PlanState::new(self.ctx.kind)
    }

    fn build_fields(&self, entity_name: &str, selections: &[Selection]) -> error::Result<Vec<RequestedField>> {
        let entity = self.ctx.model.entity(entity_name).map_err(PlannerError::from_anyhow)?;
        build_fields(&self.ctx.model, &entity.properties, selections).map_err(PlannerError::from_anyhow)
    }

    /// `executeSelect`: plans and runs a standalone top-level list, shaping
    /// the decoded rows against `selections` (`spec.md` §4.4, §4.4.5).
    pub async fn execute_select(
        &mut self,
        entity_name: &str,
        args: &SelectArgs,
        selections: &[Selection],
    ) -> error::Result<Vec<serde_json::Value>> {
        let fields = self.build_fields(entity_name, selections)?;
        self.select_and_shape(entity_name, args, &fields).await
    }

    /// Shared by `execute_select` and `execute_connection`'s `node` branch:
    /// plans, runs, and shapes against an already-built `fields` tree.
    async fn select_and_shape(
        &mut self,
        entity_name: &str,
        args: &SelectArgs,
        fields: &[RequestedField],
    ) -> error::Result<Vec<serde_json::Value>> {
        let state = self.plan_state();
        let (sql, kinds) = {
            let _span = tracing::debug_span!("plan", entity = entity_name).entered();
            select(&self.ctx.model, state.clone(), entity_name, args, Some(fields), Variant::Normal)
                .map_err(PlannerError::from_anyhow)?
        };
        let rows = self.run(&sql, &state).await?;
        let decoded = decode_rows(&rows, &kinds).map_err(PlannerError::from_anyhow)?;
        let _span = tracing::debug_span!("shape", entity = entity_name).entered();
        shape::shape_rows(&decoded, fields).map_err(PlannerError::from_anyhow)
    }

    /// Connection planning end-to-end (`spec.md` §4.4.6): validates
    /// `orderBy`, decodes/validates `after`, runs the underlying list with
    /// `limit = first + 1` — or, if the connection's own selection only
    /// asked for `cursor`/`pageInfo` and never `node`, issues
    /// `executeListCount` instead of materializing any rows — then resolves
    /// `totalCount` (exact when the page fit, else `executeSelectCount`).
    pub async fn execute_connection(
        &mut self,
        entity_name: &str,
        where_: &value::Literal,
        order_by: &[String],
        first: i64,
        after: Option<&str>,
        connection_selections: &[Selection],
    ) -> error::Result<ConnectionResult> {
        let entity = self.ctx.model.entity(entity_name).map_err(PlannerError::from_anyhow)?;
        let requested = build_connection_fields(&self.ctx.model, &entity.properties, connection_selections)
            .map_err(PlannerError::from_anyhow)?;

        let offset_in = connection::resolve_offset(order_by, after).map_err(PlannerError::from_anyhow)?;
        let windowed_args = SelectArgs {
            where_: where_.clone(),
            order_by: order_by.to_vec(),
            offset: Some(offset_in),
            limit: Some(first + 1),
        };

        let page = if let Some(node_fields) = requested.node.as_ref() {
            let nodes = self.select_and_shape(entity_name, &windowed_args, node_fields).await?;
            let nodes: Vec<Option<serde_json::Value>> = nodes.into_iter().map(Some).collect();
            connection::paginate(nodes, order_by, offset_in, first).map_err(PlannerError::from_anyhow)?
        } else {
            // Only cursor/pageInfo was requested: count the same windowed
            // rows `executeSelect` would have fetched instead of
            // materializing them, per spec.md §4.4.6.
            let row_count = self.execute_list_count(entity_name, &windowed_args).await?;
            let placeholders: Vec<Option<serde_json::Value>> = vec![None; row_count];
            connection::paginate(placeholders, order_by, offset_in, first).map_err(PlannerError::from_anyhow)?
        };

        let total_count = if requested.total_count {
            Some(match page.exact_total {
                Some(t) => t,
                None => self.execute_select_count(entity_name, where_).await?,
            })
        } else {
            None
        };

        let edges = page.edges
            .into_iter()
            .map(|edge| ConnectionEdge {
                cursor: requested.cursor.then_some(edge.cursor),
                node: edge.node,
            })
            .collect();

        Ok(ConnectionResult { total_count, page_info: page.page_info, edges })
    }

    /// `executeSelectCount`: `totalCount`, ignoring `orderBy`/`limit`/`offset`.
    pub async fn execute_select_count(&mut self, entity_name: &str, where_: &value::Literal) -> error::Result<i64> {
        let state = self.plan_state();
        let sql = {
            let _span = tracing::debug_span!("plan", entity = entity_name, op = "count").entered();
            select_count(&self.ctx.model, state.clone(), entity_name, where_).map_err(PlannerError::from_anyhow)?
        };
        let rows = self.run(&sql, &state).await?;
        let row = rows.first().ok_or_else(|| PlannerError::Bug("count query returned no rows".into()))?;
        row.try_get::<i64, _>(0).map_err(PlannerError::from)
    }

    /// `executeListCount`: the same windowed `FROM/JOIN/WHERE/ORDER
    /// BY/LIMIT/OFFSET` a matching `execute_select` would run, but with no
    /// projection — used when a connection only asked for `pageInfo`/edge
    /// cursors, not `node` (`spec.md` §4.4.6).
    pub async fn execute_list_count(&mut self, entity_name: &str, args: &SelectArgs) -> error::Result<usize> {
        let state = self.plan_state();
        let (sql, _kinds) = {
            let _span = tracing::debug_span!("plan", entity = entity_name, op = "list_count").entered();
            select(&self.ctx.model, state.clone(), entity_name, args, None, Variant::Normal)
                .map_err(PlannerError::from_anyhow)?
        };
        let rows = self.run(&sql, &state).await?;
        Ok(rows.len())
    }

    /// `executeFulltextSearch`: one `UNION ALL` statement across every
    /// `FtsQuery` source, shaped into `{rank, highlight?, item}` hits
    /// (`spec.md` §4.4.7).
    pub async fn execute_fulltext_search(
        &mut self,
        query_name: &str,
        text: &str,
        where_by_entity: impl Fn(&str) -> value::Literal,
        item_selections: &[Selection],
        limit: Option<i64>,
        offset: Option<i64>,
        with_highlight: bool,
    ) -> error::Result<Vec<serde_json::Value>> {
        let state = self.plan_state();
        let (sql, branches) = {
            let _span = tracing::debug_span!("plan", query = query_name, op = "fulltext_search").entered();
            fts::build_search(
                &self.ctx.model, state.clone(), query_name, text, where_by_entity, item_selections, limit, offset,
            ).map_err(PlannerError::from_anyhow)?
        };
        let rows = self.run(&sql, &state).await?;
        let _span = tracing::debug_span!("shape", query = query_name).entered();

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let is_type_of: Option<String> = row.try_get(0).map_err(PlannerError::from)?;
            let is_type_of = is_type_of
                .ok_or_else(|| user_error("fts row missing isTypeOf"))
                .map_err(PlannerError::from_anyhow)?;
            let rank: f64 = row.try_get(1).map_err(PlannerError::from)?;
            // `builder::select`'s `Variant::Fts` unconditionally emits all four
            // columns (isTypeOf, rank, highlight, item) regardless of whether
            // the caller asked for a highlight — item is always at index 3.
            let highlight: Option<String> = row.try_get(2).map_err(PlannerError::from)?;
            let item: serde_json::Value = row.try_get(3).map_err(PlannerError::from)?;
            let item_row = item.as_array().cloned().unwrap_or_default();

            let mut cells = vec![serde_json::Value::String(is_type_of), serde_json::json!(rank)];
            if with_highlight {
                cells.push(highlight.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null));
            }
            cells.push(serde_json::Value::Array(item_row));

            hits.push(fts::shape_hit(&cells, with_highlight, &branches).map_err(PlannerError::from_anyhow)?);
        }
        Ok(hits)
    }

    async fn run(
        &mut self,
        sql: &str,
        state: &std::rc::Rc<std::cell::RefCell<PlanState>>,
    ) -> error::Result<Vec<sqlx::any::AnyRow>> {
        let params = state.borrow().params.clone();
        let mut query = sqlx::query(sql);
        for param in &params {
            query = param.bind(query);
        }
        if cfg!(debug_assertions) {
            tracing::debug!(sql_text = sql, "executing planned statement");
        }
        query.fetch_all(&mut self.ctx.txn).await.map_err(|err| {
            let err = anyhow::Error::new(err).context(if cfg!(debug_assertions) {
                format!("could not execute planned SQL statement {sql:?}")
            } else {
                "could not execute planned SQL statement".to_string()
            });
            PlannerError::from_anyhow(err)
        })
    }
}

fn decode_cell(row: &sqlx::any::AnyRow, idx: usize, kind: ColumnKind) -> anyhow::Result<serde_json::Value> {
    Ok(match kind {
        ColumnKind::Text => match row.try_get::<Option<String>, _>(idx)? {
            Some(s) => serde_json::Value::String(s),
            None => serde_json::Value::Null,
        },
        ColumnKind::Int => match row.try_get::<Option<i64>, _>(idx)? {
            Some(i) => serde_json::Value::from(i),
            None => serde_json::Value::Null,
        },
        ColumnKind::Float => match row.try_get::<Option<f64>, _>(idx)? {
            Some(f) => serde_json::json!(f),
            None => serde_json::Value::Null,
        },
        ColumnKind::Bool => match row.try_get::<Option<bool>, _>(idx)? {
            Some(b) => serde_json::Value::Bool(b),
            None => serde_json::Value::Null,
        },
        ColumnKind::Json => row.try_get::<Option<serde_json::Value>, _>(idx)?.unwrap_or(serde_json::Value::Null),
    })
}

fn decode_rows(rows: &[sqlx::any::AnyRow], kinds: &[ColumnKind]) -> anyhow::Result<Vec<Vec<serde_json::Value>>> {
    rows.iter()
        .map(|row| kinds.iter().enumerate().map(|(i, k)| decode_cell(row, i, *k)).collect())
        .collect()
}
