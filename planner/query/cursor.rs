//! The positional SQL walker (`spec.md` §4.4.1) and the mutable state one
//! planning pass shares across every `Cursor` it spawns.
//!
//! Grounded on the teacher's `query::OutputExpr`/`query::InputExpr` pairing
//! of "what object" with "where in SQL space", generalized from a
//! compile-to-bytecode walk into a compile-to-SQL-text walk. A `Cursor` is
//! cheap to clone-by-construction (`child()` returns a new one) and borrows
//! the plan-wide [`PlanState`] through an `Rc<RefCell<_>>`: the walk is
//! recursive and single-threaded (`spec.md` §5), so shared, not owned,
//! mutable state is the natural fit — the alternative is threading `&mut
//! PlanState` through every recursive call in `where_clause`/`order_by`/
//! `builder`, which fights the borrow checker for no benefit here.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Result, bail, ensure};
use indexmap::IndexMap;
use sqlx::any::AnyKind;

use model::{Model, Property, PropertyType};

use crate::error::schema_error;
use crate::naming::{self, Name};
use crate::scalar;
use crate::sql_writer::SqlWriter;
use super::alias::{AliasAllocator, JoinSet};
use super::value::BoundValue;

/// Mutable state shared by every `Cursor` spawned within one planning pass:
/// the alias allocator, the join set, and the bound-parameter vector.
/// Owned by the top-level `select()` call (`spec.md` §3.3, §9) and released
/// when the statement has been fully assembled.
#[derive(Debug)]
pub struct PlanState {
    pub kind: AnyKind,
    pub aliases: AliasAllocator,
    pub joins: JoinSet,
    pub params: Vec<BoundValue>,
}

impl PlanState {
    pub fn new(kind: AnyKind) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            kind,
            aliases: AliasAllocator::new(),
            joins: JoinSet::new(),
            params: Vec::new(),
        }))
    }

    /// Binds `value` as the next positional parameter, returning its
    /// placeholder (`$3`/`?3`) already rendered for the target database.
    pub fn bind(&mut self, value: BoundValue) -> String {
        self.params.push(value);
        let idx = self.params.len() - 1;
        let mut w = SqlWriter::new(self.kind);
        w.write_param(idx);
        w.build()
    }
}

#[derive(Clone)]
pub struct Cursor<'m> {
    model: &'m Model,
    properties: &'m IndexMap<String, Arc<Property>>,
    alias: Name,
    json_root: Option<Name>,
    json_path: Vec<String>,
    state: Rc<RefCell<PlanState>>,
}

impl<'m> Cursor<'m> {
    /// Opens a root cursor on `entity_name`, with a freshly allocated table
    /// alias (`spec.md` §4.4.3 step 1).
    pub fn root(model: &'m Model, entity_name: &str, state: Rc<RefCell<PlanState>>) -> Result<Self> {
        let entity = model.entity(entity_name)?;
        let alias = state.borrow_mut().aliases.alloc(entity_name);
        Ok(Self {
            model,
            properties: &entity.properties,
            alias,
            json_root: None,
            json_path: Vec::new(),
            state,
        })
    }

    pub fn alias(&self) -> &Name {
        &self.alias
    }

    pub fn state(&self) -> &Rc<RefCell<PlanState>> {
        &self.state
    }

    pub fn model(&self) -> &'m Model {
        self.model
    }

    /// Binds a parameter and returns its rendered placeholder.
    pub fn bind(&self, value: BoundValue) -> String {
        self.state.borrow_mut().bind(value)
    }

    fn kind(&self) -> AnyKind {
        self.state.borrow().kind
    }

    fn lookup(&self, prop_name: &str) -> Result<&'m Arc<Property>> {
        self.properties.get(prop_name)
            .ok_or_else(|| schema_error(format!("unknown property {prop_name:?}")))
    }

    /// Looks up `prop_name`'s definition, for callers (the where/order-by
    /// parsers) that need to dispatch on its `PropertyType` themselves.
    pub fn property(&self, prop_name: &str) -> Result<&'m Arc<Property>> {
        self.lookup(prop_name)
    }

    fn write_column(&self, w: &mut SqlWriter, col: &Name) {
        w.write_name(&self.alias);
        w.write_str(".");
        w.write_name(col);
    }

    /// Writes the JSON object expression this cursor is nested inside
    /// (everything up to, but not including, the leaf property being
    /// extracted). Only meaningful when `json_root` is set.
    fn write_json_obj(&self, w: &mut SqlWriter) {
        self.write_column(w, self.json_root.as_ref().expect("write_json_obj called at table root"));
        for seg in &self.json_path {
            w.write_str("->");
            w.write_literal_str(seg).expect("segment name is a valid literal");
        }
    }

    /// SQL expression for `prop` as its native SQL type. Valid for
    /// scalar/enum properties only.
    pub fn native(&self, prop_name: &str) -> Result<String> {
        let prop = self.lookup(prop_name)?;
        let mut w = SqlWriter::new(self.kind());
        match &prop.type_ {
            PropertyType::Scalar(scalar_name) => match &self.json_root {
                None => self.write_column(&mut w, &naming::column_name(prop_name)),
                Some(_) => scalar::write_from_json_cast(scalar_name, &mut w, |w| self.write_json_obj(w), prop_name)?,
            },
            PropertyType::Enum(_) => match &self.json_root {
                None => self.write_column(&mut w, &naming::column_name(prop_name)),
                Some(_) => {
                    self.write_json_obj(&mut w);
                    w.write_str("->>");
                    w.write_literal_str(prop_name)?;
                },
            },
            _ => bail!(schema_error(format!("native({prop_name:?}) is only valid for scalar/enum properties"))),
        }
        Ok(w.build())
    }

    /// SQL expression for `prop` in its canonical transport string form
    /// (`spec.md` §4.5). Valid for scalar/enum/list properties.
    pub fn transport(&self, prop_name: &str) -> Result<String> {
        let prop = self.lookup(prop_name)?;
        let mut w = SqlWriter::new(self.kind());
        match &prop.type_ {
            PropertyType::Scalar(scalar_name) => match &self.json_root {
                None => scalar::write_to_transport_cast(scalar_name, &mut w, |w| {
                    self.write_column(w, &naming::column_name(prop_name))
                })?,
                Some(_) => scalar::write_from_json_to_transport_cast(
                    scalar_name, &mut w, |w| self.write_json_obj(w), prop_name,
                )?,
            },
            PropertyType::Enum(_) => match &self.json_root {
                None => self.write_column(&mut w, &naming::column_name(prop_name)),
                Some(_) => {
                    self.write_json_obj(&mut w);
                    w.write_str("->>");
                    w.write_literal_str(prop_name)?;
                },
            },
            PropertyType::List(item) => {
                // Always wrapped in `to_json(...)`, so every list column
                // decodes through the same `Json` path at the top level
                // regardless of native-array vs JSON storage (documented
                // simplification: see DESIGN.md).
                w.write_str("to_json(");
                match (&self.json_root, model::list_storage(&item.type_)) {
                    (None, model::ListStorage::NativeArray) => match &item.type_ {
                        PropertyType::Scalar(scalar_name) => scalar::write_to_transport_array_cast(
                            scalar_name, &mut w, |w| self.write_column(w, &naming::column_name(prop_name)),
                        )?,
                        PropertyType::Enum(_) => self.write_column(&mut w, &naming::column_name(prop_name)),
                        _ => bail!(schema_error("array-capable list item must be scalar or enum")),
                    },
                    // A JSON-stored list (whether at table root or already
                    // nested in an object) carries its own already-wire-ready
                    // array literal; the planner reads it verbatim rather
                    // than re-casting each element.
                    (None, model::ListStorage::Json) => self.write_column(&mut w, &naming::column_name(prop_name)),
                    (Some(_), _) => {
                        self.write_json_obj(&mut w);
                        w.write_str("->");
                        w.write_literal_str(prop_name)?;
                    },
                }
                w.write_str(")");
            },
            _ => bail!(schema_error(format!("transport({prop_name:?}) is only valid for scalar/enum/list properties"))),
        }
        Ok(w.build())
    }

    /// Raw column reference or JSON extraction, without any cast.
    pub fn field(&self, prop_name: &str) -> Result<String> {
        self.lookup(prop_name)?;
        let mut w = SqlWriter::new(self.kind());
        match &self.json_root {
            None => self.write_column(&mut w, &naming::column_name(prop_name)),
            Some(_) => {
                self.write_json_obj(&mut w);
                w.write_str("->");
                w.write_literal_str(prop_name)?;
            },
        }
        Ok(w.build())
    }

    /// The referencing expression for an `fk` property: a column for
    /// entities, a JSON-cast `ID` for embedded objects.
    pub fn fk(&self, prop_name: &str) -> Result<String> {
        let prop = self.lookup(prop_name)?;
        ensure!(matches!(prop.type_, PropertyType::Fk(_)),
            schema_error(format!("fk({prop_name:?}) is only valid for fk properties")));
        let mut w = SqlWriter::new(self.kind());
        match &self.json_root {
            None => self.write_column(&mut w, &naming::fk_column_name(prop_name)),
            Some(_) => scalar::write_from_json_cast(scalar::ID, &mut w, |w| self.write_json_obj(w), prop_name)?,
        }
        Ok(w.build())
    }

    /// The `tsvector` column for `query_name`. Only valid at entity root.
    pub fn tsv(&self, query_name: &str) -> Result<String> {
        ensure!(self.json_root.is_none(), schema_error("tsv() is only valid at entity root"));
        let mut w = SqlWriter::new(self.kind());
        self.write_column(&mut w, &naming::fts_tsv_column_name(query_name));
        Ok(w.build())
    }

    /// The concatenated document column for `query_name`. Only valid at
    /// entity root.
    pub fn doc(&self, query_name: &str) -> Result<String> {
        ensure!(self.json_root.is_none(), schema_error("doc() is only valid at entity root"));
        let mut w = SqlWriter::new(self.kind());
        self.write_column(&mut w, &naming::fts_doc_column_name(query_name));
        Ok(w.build())
    }

    /// Descends into `prop`, returning a new cursor. Object/union properties
    /// grow the JSON-path prefix; `fk` properties register a join and
    /// return to an entity-rooted cursor.
    pub fn child(&self, prop_name: &str) -> Result<Cursor<'m>> {
        let prop = self.lookup(prop_name)?;
        match &prop.type_ {
            PropertyType::Object(name) => {
                let object = self.model.object(name)?;
                Ok(self.descend_json(prop_name, &object.properties))
            },
            PropertyType::Union(name) => {
                let properties = self.model.union_variant_properties(name)?;
                Ok(self.descend_json(prop_name, properties))
            },
            PropertyType::Fk(foreign_entity) => {
                let on_expr = self.fk(prop_name)?;
                let table = naming::table_name(foreign_entity);
                let alias = {
                    let mut state = self.state.borrow_mut();
                    let PlanState { joins, aliases, .. } = &mut *state;
                    joins.join(table, on_expr, aliases)
                };
                let entity = self.model.entity(foreign_entity)?;
                Ok(Cursor {
                    model: self.model,
                    properties: &entity.properties,
                    alias,
                    json_root: None,
                    json_path: Vec::new(),
                    state: self.state.clone(),
                })
            },
            _ => bail!(schema_error(format!("child({prop_name:?}) is only valid for object/union/fk properties"))),
        }
    }

    fn descend_json(&self, prop_name: &str, properties: &'m IndexMap<String, Arc<Property>>) -> Cursor<'m> {
        let (json_root, json_path) = match &self.json_root {
            None => (naming::column_name(prop_name), Vec::new()),
            Some(root) => {
                let mut path = self.json_path.clone();
                path.push(prop_name.to_string());
                (root.clone(), path)
            },
        };
        Cursor {
            model: self.model,
            properties,
            alias: self.alias.clone(),
            json_root: Some(json_root),
            json_path,
            state: self.state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap as Map;
    use model::{Entity, JsonObject};

    fn prop(type_: PropertyType) -> Arc<Property> {
        Arc::new(Property { type_, nullable: false, description: None })
    }

    fn test_model() -> Model {
        let mut account_props = Map::new();
        account_props.insert("wallet".into(), prop(PropertyType::Scalar("String".into())));
        account_props.insert("balance".into(), prop(PropertyType::Scalar("Int".into())));
        account_props.insert("address".into(), prop(PropertyType::Object("Address".into())));

        let mut balance_props = Map::new();
        balance_props.insert("account".into(), prop(PropertyType::Fk("Account".into())));
        balance_props.insert("balance".into(), prop(PropertyType::Scalar("Int".into())));

        let mut address_props = Map::new();
        address_props.insert("city".into(), prop(PropertyType::Scalar("String".into())));

        let mut entities = Map::new();
        entities.insert("Account".to_string(), Arc::new(Entity::new("Account", account_props)));
        entities.insert("HistoricalBalance".to_string(), Arc::new(Entity::new("HistoricalBalance", balance_props)));

        let mut objects = Map::new();
        objects.insert("Address".to_string(), Arc::new(JsonObject { name: "Address".into(), properties: address_props }));

        Model { entities, objects, interfaces: Map::new(), unions: Map::new(), enums: Map::new(), fts_queries: Map::new() }
    }

    #[test]
    fn native_on_entity_root_is_a_plain_column() {
        let model = test_model();
        let state = PlanState::new(AnyKind::Postgres);
        let cursor = Cursor::root(&model, "Account", state).unwrap();
        assert_eq!(cursor.native("balance").unwrap(), "\"account\".\"balance\"");
    }

    #[test]
    fn transport_on_identity_scalar_is_a_plain_column() {
        let model = test_model();
        let state = PlanState::new(AnyKind::Postgres);
        let cursor = Cursor::root(&model, "Account", state).unwrap();
        assert_eq!(cursor.transport("wallet").unwrap(), "\"account\".\"wallet\"");
    }

    #[test]
    fn child_into_object_extracts_from_json() {
        let model = test_model();
        let state = PlanState::new(AnyKind::Postgres);
        let cursor = Cursor::root(&model, "Account", state).unwrap();
        let address = cursor.child("address").unwrap();
        assert_eq!(
            address.native("city").unwrap(),
            "CAST((\"account\".\"address\"->>'city') AS text)"
        );
    }

    #[test]
    fn child_into_fk_registers_a_join() {
        let model = test_model();
        let state = PlanState::new(AnyKind::Postgres);
        let cursor = Cursor::root(&model, "HistoricalBalance", state.clone()).unwrap();
        let account = cursor.child("account").unwrap();
        assert_eq!(account.alias().0, "account");
        assert!(state.borrow().joins.render().contains("LEFT OUTER JOIN \"account\" \"account\""));
    }

    #[test]
    fn repeated_fk_child_reuses_the_join() {
        let model = test_model();
        let state = PlanState::new(AnyKind::Postgres);
        let cursor = Cursor::root(&model, "HistoricalBalance", state.clone()).unwrap();
        let a1 = cursor.child("account").unwrap();
        let a2 = cursor.child("account").unwrap();
        assert_eq!(a1.alias(), a2.alias());
        assert_eq!(state.borrow().joins.render().matches("LEFT OUTER JOIN").count(), 1);
    }
}
