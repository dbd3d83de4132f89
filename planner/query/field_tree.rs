//! Requested-field tree and its builder (`spec.md` §3.2, §4.2).
//!
//! [`Selection`] is the generic parsed-GraphQL-selection shape the Transport
//! Layer hands the planner (field name, alias, argument literals, and
//! sub-selections, with inline-fragment type conditions already resolved
//! down to individual child selections). [`build_fields`] turns it into the
//! planner's own [`RequestedField`] tree, bound to the Model's properties.
//! Grounded on the teacher's `OutputExpr` tree in `query/mod.rs`,
//! generalized from a JS-value-shaped tree into one carrying `index` as a
//! `Cell`, filled in later by `builder::populate_columns`.

use std::cell::Cell;
use indexmap::IndexMap;

use anyhow::{Result, bail};
use model::{Model, Property, PropertyType};

use crate::error::schema_error;
use super::value::Literal;

/// One field selected in the incoming GraphQL document, as delivered by the
/// Transport Layer. `type_condition` is `Some(variant)` when this selection
/// came from an inline fragment (`... on Dog { ... }`) under a union field;
/// `None` for fields selected outside any type condition.
#[derive(Debug, Clone)]
pub struct Selection {
    pub name: String,
    pub alias: String,
    pub args: Literal,
    pub children: Vec<Selection>,
    pub type_condition: Option<String>,
}

/// List arguments captured off a `listRelation` field's own selection
/// (`where`, `orderBy`, `offset`, `limit`).
#[derive(Debug, Clone, Default)]
pub struct ListArgs {
    pub where_: Literal,
    pub order_by: Vec<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// One planner-owned request for an output field: which property it reads,
/// its output alias, optional children, optional list arguments, an
/// optional union discriminator, and the column index assigned once the
/// SELECT list has been built.
#[derive(Debug)]
pub struct RequestedField {
    pub alias: String,
    pub prop_name: String,
    pub prop_type: PropertyType,
    pub children: Vec<RequestedField>,
    pub args: Option<ListArgs>,
    pub if_type: Option<String>,
    pub index: Cell<Option<usize>>,
}

impl RequestedField {
    pub fn index(&self) -> usize {
        self.index.get().expect("populate_columns must run before shape()")
    }
}

fn leaf(selection: &Selection, prop_type: PropertyType) -> RequestedField {
    RequestedField {
        alias: selection.alias.clone(),
        prop_name: selection.name.clone(),
        prop_type,
        children: Vec::new(),
        args: None,
        if_type: None,
        index: Cell::new(None),
    }
}

fn extract_list_args(args: &Literal) -> Result<ListArgs> {
    let empty = IndexMap::new();
    let obj = match args {
        Literal::Object(map) => map,
        Literal::Null => &empty,
        other => bail!(schema_error(format!("expected an arguments object, found {other:?}"))),
    };
    let where_ = obj.get("where").cloned().unwrap_or_else(|| Literal::Object(IndexMap::new()));
    let order_by = match obj.get("orderBy") {
        Some(Literal::List(items)) => items.iter().map(Literal::as_wire_string).collect::<Result<_>>()?,
        Some(Literal::Null) | None => Vec::new(),
        Some(other) => bail!(schema_error(format!("expected an orderBy list, found {other:?}"))),
    };
    let as_int = |lit: &Literal| -> Result<i64> {
        match lit {
            Literal::Int(i) => Ok(*i),
            other => bail!(schema_error(format!("expected an integer argument, found {other:?}"))),
        }
    };
    let offset = obj.get("offset").filter(|v| !v.is_null()).map(as_int).transpose()?;
    let limit = obj.get("limit").filter(|v| !v.is_null()).map(as_int).transpose()?;
    Ok(ListArgs { where_, order_by, offset, limit })
}

/// A connection field's own requested-field tree (`spec.md` §4.2): which of
/// `totalCount`/`pageInfo`/`edges.cursor` were asked for, and — separately —
/// the entity-bound `RequestedField` tree under `edges.node`, if any. `None`
/// for `node` lets `Planner::execute_connection` skip materializing rows
/// entirely when only `cursor`/`pageInfo` was requested (`spec.md` §4.4.6).
#[derive(Debug)]
pub struct ConnectionRequestedFields {
    pub total_count: bool,
    pub page_info: bool,
    pub cursor: bool,
    pub node: Option<Vec<RequestedField>>,
}

/// Walks a connection field's own selection set — `totalCount`, `pageInfo`,
/// and `edges { node, cursor }` — binding `node`'s children against
/// `properties` the same way `build_fields` binds a plain entity selection.
pub fn build_connection_fields(
    model: &Model,
    properties: &IndexMap<String, std::sync::Arc<Property>>,
    selections: &[Selection],
) -> Result<ConnectionRequestedFields> {
    let mut total_count = false;
    let mut page_info = false;
    let mut cursor = false;
    let mut node = None;

    for selection in selections {
        match selection.name.as_str() {
            "totalCount" => total_count = true,
            "pageInfo" => page_info = true,
            "edges" => {
                for edge_selection in &selection.children {
                    match edge_selection.name.as_str() {
                        "cursor" => cursor = true,
                        "node" => node = Some(build_fields(model, properties, &edge_selection.children)?),
                        other => bail!(schema_error(format!("unknown connection edge field {other:?}"))),
                    }
                }
            },
            "__typename" => {},
            other => bail!(schema_error(format!("unknown connection field {other:?}"))),
        }
    }

    Ok(ConnectionRequestedFields { total_count, page_info, cursor, node })
}

/// Builds the requested-field tree for `selections`, each selected against
/// `properties` (the entity/object/union's own property map).
pub fn build_fields(
    model: &Model,
    properties: &IndexMap<String, std::sync::Arc<Property>>,
    selections: &[Selection],
) -> Result<Vec<RequestedField>> {
    let mut out = Vec::with_capacity(selections.len());
    for selection in selections {
        if selection.name == "__typename" {
            continue;
        }
        let prop = properties.get(&selection.name)
            .ok_or_else(|| schema_error(format!("unknown property {:?} in requested-field tree", selection.name)))?;
        out.push(build_one(model, selection, prop)?);
    }
    Ok(out)
}

fn build_one(model: &Model, selection: &Selection, prop: &Property) -> Result<RequestedField> {
    match &prop.type_ {
        PropertyType::Scalar(_) | PropertyType::Enum(_) | PropertyType::List(_) => {
            Ok(leaf(selection, prop.type_.clone()))
        },
        PropertyType::Object(name) => {
            let object = model.object(name)?;
            let children = build_fields(model, &object.properties, &selection.children)?;
            let mut field = leaf(selection, prop.type_.clone());
            field.children = children;
            Ok(field)
        },
        PropertyType::Fk(entity) => {
            let target = model.entity(entity)?;
            let children = build_fields(model, &target.properties, &selection.children)?;
            let mut field = leaf(selection, prop.type_.clone());
            field.children = children;
            Ok(field)
        },
        PropertyType::ListRelation { entity, .. } => {
            let target = model.entity(entity)?;
            let children = build_fields(model, &target.properties, &selection.children)?;
            let mut field = leaf(selection, prop.type_.clone());
            field.children = children;
            field.args = Some(extract_list_args(&selection.args)?);
            Ok(field)
        },
        PropertyType::Union(name) => {
            let children = build_union_fields(model, name, &selection.children)?;
            let mut field = leaf(selection, prop.type_.clone());
            field.children = children;
            Ok(field)
        },
    }
}

fn build_union_fields(model: &Model, union_name: &str, children: &[Selection]) -> Result<Vec<RequestedField>> {
    let union_def = model.union(union_name)?;
    let mut by_alias: IndexMap<String, Vec<(String, RequestedField)>> = IndexMap::new();

    for variant_name in &union_def.variants {
        let variant = model.object(variant_name)?;
        for child in children {
            if let Some(type_condition) = &child.type_condition {
                if type_condition != variant_name {
                    continue;
                }
            }
            let field = if child.name == "isTypeOf" {
                leaf(child, PropertyType::Scalar("String".to_string()))
            } else {
                match variant.properties.get(&child.name) {
                    Some(prop) => build_one(model, child, prop)?,
                    None => continue,
                }
            };
            by_alias.entry(child.alias.clone()).or_default().push((variant_name.clone(), field));
        }
    }

    let total_variants = union_def.variants.len();
    let mut out = Vec::with_capacity(by_alias.len());
    for (_alias, mut entries) in by_alias {
        let shared = entries.len() == total_variants
            && entries.windows(2).all(|w| w[0].1.prop_type == w[1].1.prop_type);
        if shared {
            let mut field = entries.swap_remove(0).1;
            field.if_type = None;
            out.push(field);
        } else {
            for (variant_name, mut field) in entries {
                field.if_type = Some(variant_name);
                out.push(field);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Entity;
    use std::sync::Arc;

    fn prop(type_: PropertyType) -> Arc<Property> {
        Arc::new(Property { type_, nullable: false, description: None })
    }

    fn sel(name: &str) -> Selection {
        Selection { name: name.to_string(), alias: name.to_string(), args: Literal::Null, children: Vec::new(), type_condition: None }
    }

    #[test]
    fn skips_dunder_typename() {
        let mut props = IndexMap::new();
        props.insert("wallet".to_string(), prop(PropertyType::Scalar("String".into())));
        let entity = Entity::new("Account", props);
        let model = Model { entities: IndexMap::new(), ..Model::default() };
        let selections = vec![sel("__typename"), sel("wallet")];
        let fields = build_fields(&model, &entity.properties, &selections).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].prop_name, "wallet");
    }

    #[test]
    fn list_relation_captures_its_own_args() {
        let mut balance_props = IndexMap::new();
        balance_props.insert("balance".to_string(), prop(PropertyType::Scalar("Int".into())));
        let mut account_props = IndexMap::new();
        account_props.insert("history".to_string(), prop(PropertyType::ListRelation {
            entity: "HistoricalBalance".into(), field: "account".into(),
        }));
        let mut entities = IndexMap::new();
        entities.insert("HistoricalBalance".to_string(), Arc::new(Entity::new("HistoricalBalance", balance_props)));
        let model = Model { entities, ..Model::default() };

        let mut args = IndexMap::new();
        args.insert("limit".to_string(), Literal::Int(5));
        let mut history_sel = sel("history");
        history_sel.args = Literal::Object(args);
        history_sel.children = vec![sel("balance")];

        let fields = build_fields(&model, &account_props, &[history_sel]).unwrap();
        assert_eq!(fields[0].args.as_ref().unwrap().limit, Some(5));
        assert_eq!(fields[0].children.len(), 1);
    }

    #[test]
    fn connection_fields_extract_total_count_page_info_and_node() {
        let mut props = IndexMap::new();
        props.insert("wallet".to_string(), prop(PropertyType::Scalar("String".into())));
        let entity = Entity::new("Account", props);
        let model = Model { entities: IndexMap::new(), ..Model::default() };

        let mut node_sel = sel("node");
        node_sel.children = vec![sel("wallet")];
        let mut edges_sel = sel("edges");
        edges_sel.children = vec![node_sel, sel("cursor")];
        let selections = vec![sel("totalCount"), sel("pageInfo"), edges_sel];

        let fields = build_connection_fields(&model, &entity.properties, &selections).unwrap();
        assert!(fields.total_count);
        assert!(fields.page_info);
        assert!(fields.cursor);
        let node = fields.node.unwrap();
        assert_eq!(node.len(), 1);
        assert_eq!(node[0].prop_name, "wallet");
    }

    #[test]
    fn connection_fields_leave_node_none_when_only_cursor_is_requested() {
        let entity = Entity::new("Account", IndexMap::new());
        let model = Model { entities: IndexMap::new(), ..Model::default() };

        let mut edges_sel = sel("edges");
        edges_sel.children = vec![sel("cursor")];
        let selections = vec![sel("pageInfo"), edges_sel];

        let fields = build_connection_fields(&model, &entity.properties, &selections).unwrap();
        assert!(fields.node.is_none());
        assert!(fields.cursor);
        assert!(!fields.total_count);
    }

    #[test]
    fn union_fields_collapse_shared_and_keep_variant_specific() {
        let mut dog_props = IndexMap::new();
        dog_props.insert("name".to_string(), prop(PropertyType::Scalar("String".into())));
        dog_props.insert("breed".to_string(), prop(PropertyType::Scalar("String".into())));
        let mut cat_props = IndexMap::new();
        cat_props.insert("name".to_string(), prop(PropertyType::Scalar("String".into())));
        cat_props.insert("lives".to_string(), prop(PropertyType::Scalar("Int".into())));

        let mut objects = IndexMap::new();
        objects.insert("Dog".to_string(), Arc::new(model::JsonObject { name: "Dog".into(), properties: dog_props }));
        objects.insert("Cat".to_string(), Arc::new(model::JsonObject { name: "Cat".into(), properties: cat_props }));
        let mut unions = IndexMap::new();
        unions.insert("Pet".to_string(), Arc::new(model::Union::new("Pet", vec!["Dog".into(), "Cat".into()])));
        let model = Model { objects, unions, ..Model::default() };

        let children = vec![
            sel("name"),
            Selection { type_condition: Some("Dog".into()), ..sel("breed") },
            Selection { type_condition: Some("Cat".into()), ..sel("lives") },
        ];

        let fields = build_union_fields(&model, "Pet", &children).unwrap();
        let name_field = fields.iter().find(|f| f.prop_name == "name").unwrap();
        assert!(name_field.if_type.is_none());
        let breed_field = fields.iter().find(|f| f.prop_name == "breed").unwrap();
        assert_eq!(breed_field.if_type.as_deref(), Some("Dog"));
    }
}
