//! In-memory typed description of an OpenCRUD-style entity schema.
//!
//! This is the Model the Query Planner reads: entities (backed by tables),
//! embedded JSON objects, interfaces (GraphQL surface only), unions of
//! objects, enums, and named full-text search queries. It is built once by
//! the (out-of-scope) Schema Loader and is immutable and process-wide for
//! the lifetime described in the planner crate.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer, Deserializer};
use std::sync::{Arc, OnceLock};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown type {0:?} in model")]
    UnknownType(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// The full schema: every named type, keyed by name, tagged with its kind.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[serde(with = "model_entities")]
    pub entities: IndexMap<String, Arc<Entity>>,
    #[serde(with = "model_objects")]
    #[serde(default)]
    pub objects: IndexMap<String, Arc<JsonObject>>,
    #[serde(with = "model_interfaces")]
    #[serde(default)]
    pub interfaces: IndexMap<String, Arc<Interface>>,
    #[serde(with = "model_unions")]
    #[serde(default)]
    pub unions: IndexMap<String, Arc<Union>>,
    #[serde(with = "model_enums")]
    #[serde(default)]
    pub enums: IndexMap<String, Arc<EnumType>>,
    #[serde(with = "model_fts_queries")]
    #[serde(default)]
    pub fts_queries: IndexMap<String, Arc<FtsQuery>>,
}

impl Model {
    pub fn entity(&self, name: &str) -> Result<&Arc<Entity>> {
        self.entities.get(name).ok_or_else(|| ModelError::UnknownType(name.into()))
    }

    pub fn object(&self, name: &str) -> Result<&Arc<JsonObject>> {
        self.objects.get(name).ok_or_else(|| ModelError::UnknownType(name.into()))
    }

    pub fn union(&self, name: &str) -> Result<&Arc<Union>> {
        self.unions.get(name).ok_or_else(|| ModelError::UnknownType(name.into()))
    }

    pub fn enum_(&self, name: &str) -> Result<&Arc<EnumType>> {
        self.enums.get(name).ok_or_else(|| ModelError::UnknownType(name.into()))
    }

    pub fn fts_query(&self, name: &str) -> Result<&Arc<FtsQuery>> {
        self.fts_queries.get(name).ok_or_else(|| ModelError::UnknownType(name.into()))
    }

    /// The merged property set of all variants of a union, plus the synthetic
    /// discriminator `isTypeOf: String!`. Memoized on the `Union` itself: the
    /// Model is immutable and single-lived per process (see `spec.md` §9), so
    /// there is no need for a weak-keyed off-heap cache.
    pub fn union_variant_properties(&self, name: &str) -> Result<&IndexMap<String, Arc<Property>>> {
        let union = self.union(name)?;
        if let Some(merged) = union.merged_properties.get() {
            return Ok(merged);
        }
        let mut merged = IndexMap::new();
        for variant_name in &union.variants {
            let variant = self.object(variant_name)?;
            for (prop_name, prop) in &variant.properties {
                merged.entry(prop_name.clone()).or_insert_with(|| prop.clone());
            }
        }
        merged.insert(
            "isTypeOf".to_string(),
            Arc::new(Property {
                type_: PropertyType::Scalar("String".to_string()),
                nullable: false,
                description: None,
            }),
        );
        // `set` rather than `get_or_init`: losing the race just means we discard
        // our copy and re-read the winner's, which is equivalent (merging is pure).
        let _ = union.merged_properties.set(merged);
        Ok(union.merged_properties.get().expect("just initialized"))
    }
}

/// An entity: a persistent type backed by a table. Every entity carries an
/// implicit `id: ID!` property if the schema did not declare one explicitly.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    #[serde(with = "property_map")]
    pub properties: IndexMap<String, Arc<Property>>,
}

impl Entity {
    pub fn new(name: impl Into<String>, mut properties: IndexMap<String, Arc<Property>>) -> Self {
        properties.entry("id".to_string()).or_insert_with(|| {
            Arc::new(Property {
                type_: PropertyType::Scalar("ID".to_string()),
                nullable: false,
                description: None,
            })
        });
        Self { name: name.into(), properties }
    }

    pub fn id_property(&self) -> &Arc<Property> {
        self.properties.get("id").expect("entity always has an id property")
    }
}

/// An embedded composite value, stored inline as JSON on its owning entity.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonObject {
    pub name: String,
    #[serde(with = "property_map")]
    pub properties: IndexMap<String, Arc<Property>>,
}

/// Shared property set used only to flavor the emitted GraphQL surface; the
/// planner never walks an `Interface` directly, only its member entities.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,
    #[serde(with = "property_map")]
    pub properties: IndexMap<String, Arc<Property>>,
}

/// An ordered list of `JsonObject` variants. All variants are checked
/// upstream to agree on the type of any property name they share; a
/// synthetic `isTypeOf` discriminator is added by
/// [`Model::union_variant_properties`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Union {
    pub name: String,
    pub variants: Vec<String>,
    #[serde(skip)]
    merged_properties: OnceLock<IndexMap<String, Arc<Property>>>,
}

impl Union {
    pub fn new(name: impl Into<String>, variants: Vec<String>) -> Self {
        Self { name: name.into(), variants, merged_properties: OnceLock::new() }
    }
}

/// A named set of string values.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

/// A named full-text search binding a set of `(entity, string-fields)`
/// sources to two generated columns per source table (`<query>_tsv`,
/// `<query>_doc`). Those columns are owned by the (out-of-scope) DB schema;
/// the planner only reads them.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtsQuery {
    pub name: String,
    pub sources: Vec<FtsSource>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtsSource {
    pub entity: String,
    pub fields: Vec<String>,
}

/// A single property of an entity, JSON object, interface, or merged union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    #[serde(rename = "type")]
    pub type_: PropertyType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// The closed, tagged union of property shapes. Every `match` over this type
/// in the planner must be exhaustive; an unreachable arm is a programmer
/// error (see `spec.md` §7 and §9), never a user-facing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyType {
    /// A scalar from the Scalar Codec Registry (`ID`, `String`, `Int`, …).
    Scalar(String),
    /// A named enum.
    Enum(String),
    /// A (possibly nested) list. See [`list_storage`] for how it is stored.
    List(Box<Property>),
    /// An embedded `JsonObject`, by name.
    Object(String),
    /// A `Union`, by name.
    Union(String),
    /// A single-valued reference to another entity, stored as `<prop>_id`.
    Fk(String),
    /// The inverse side of an `fk`: all rows of `entity` whose `field`
    /// foreign key equals this row's id. Never nullable.
    ListRelation { entity: String, field: String },
}

/// Scalar (and enum) kinds whose `list` wraps into a native SQL array
/// column rather than a JSON array. `Float` and `Boolean` are deliberately
/// excluded per the model invariant in `spec.md` §3.1.
pub const ARRAY_CAPABLE_SCALARS: &[&str] =
    &["Int", "BigInt", "DateTime", "Bytes", "String", "ID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStorage {
    NativeArray,
    Json,
}

/// Decides how a `list` property is stored, per the invariant in
/// `spec.md` §3.1: a list of list/object/union is JSON; a list of a
/// scalar/enum from the array-capable set is a native array column.
pub fn list_storage(item: &PropertyType) -> ListStorage {
    match item {
        PropertyType::Enum(_) => ListStorage::NativeArray,
        PropertyType::Scalar(name) if ARRAY_CAPABLE_SCALARS.contains(&name.as_str()) =>
            ListStorage::NativeArray,
        _ => ListStorage::Json,
    }
}

serde_map_as_vec!(mod model_entities, IndexMap<String, Arc<Entity>>, name);
serde_map_as_vec!(mod model_objects, IndexMap<String, Arc<JsonObject>>, name);
serde_map_as_vec!(mod model_interfaces, IndexMap<String, Arc<Interface>>, name);
serde_map_as_vec!(mod model_unions, IndexMap<String, Arc<Union>>, name);
serde_map_as_vec!(mod model_enums, IndexMap<String, Arc<EnumType>>, name);
serde_map_as_vec!(mod model_fts_queries, IndexMap<String, Arc<FtsQuery>>, name);

/// `Property` carries no name of its own (the name is the map key, per
/// `spec.md` §3.1), so unlike [`serde_map_as_vec`] this flattens the key back
/// onto each entry instead of reading it off a field of the element.
mod property_map {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        name: String,
        #[serde(flatten)]
        property: Property,
    }

    pub fn serialize<S: Serializer>(
        map: &IndexMap<String, Arc<Property>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        let vec: Vec<Entry> = map.iter()
            .map(|(name, property)| Entry { name: name.clone(), property: (**property).clone() })
            .collect();
        vec.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<IndexMap<String, Arc<Property>>, D::Error> {
        let vec = Vec::<Entry>::deserialize(deserializer)?;
        Ok(vec.into_iter().map(|e| (e.name, Arc::new(e.property))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(type_: PropertyType) -> Arc<Property> {
        Arc::new(Property { type_, nullable: false, description: None })
    }

    #[test]
    fn entity_gets_implicit_id() {
        let e = Entity::new("Account", IndexMap::new());
        assert_eq!(e.id_property().type_, PropertyType::Scalar("ID".to_string()));
    }

    #[test]
    fn entity_keeps_explicit_id() {
        let mut props = IndexMap::new();
        props.insert("id".to_string(), prop(PropertyType::Scalar("ID".to_string())));
        props.insert("wallet".to_string(), prop(PropertyType::Scalar("String".to_string())));
        let e = Entity::new("Account", props);
        assert_eq!(e.properties.len(), 2);
    }

    #[test]
    fn list_storage_matches_array_capable_set() {
        assert_eq!(list_storage(&PropertyType::Scalar("Int".into())), ListStorage::NativeArray);
        assert_eq!(list_storage(&PropertyType::Scalar("Float".into())), ListStorage::Json);
        assert_eq!(list_storage(&PropertyType::Scalar("Boolean".into())), ListStorage::Json);
        assert_eq!(list_storage(&PropertyType::Enum("Color".into())), ListStorage::NativeArray);
        assert_eq!(list_storage(&PropertyType::Object("Foo".into())), ListStorage::Json);
    }

    #[test]
    fn union_variant_properties_merge_and_discriminate() {
        let mut dog_props = IndexMap::new();
        dog_props.insert("name".to_string(), prop(PropertyType::Scalar("String".into())));
        dog_props.insert("breed".to_string(), prop(PropertyType::Scalar("String".into())));
        let mut cat_props = IndexMap::new();
        cat_props.insert("name".to_string(), prop(PropertyType::Scalar("String".into())));
        cat_props.insert("lives".to_string(), prop(PropertyType::Scalar("Int".into())));

        let mut objects = IndexMap::new();
        objects.insert("Dog".to_string(), Arc::new(JsonObject { name: "Dog".into(), properties: dog_props }));
        objects.insert("Cat".to_string(), Arc::new(JsonObject { name: "Cat".into(), properties: cat_props }));

        let mut unions = IndexMap::new();
        unions.insert(
            "Pet".to_string(),
            Arc::new(Union::new("Pet", vec!["Dog".to_string(), "Cat".to_string()])),
        );

        let model = Model {
            entities: IndexMap::new(),
            objects,
            interfaces: IndexMap::new(),
            unions,
            enums: IndexMap::new(),
            fts_queries: IndexMap::new(),
        };

        let merged = model.union_variant_properties("Pet").unwrap();
        assert!(merged.contains_key("name"));
        assert!(merged.contains_key("breed"));
        assert!(merged.contains_key("lives"));
        assert!(!merged.get("isTypeOf").unwrap().nullable);

        let merged_again = model.union_variant_properties("Pet").unwrap();
        assert_eq!(merged.len(), merged_again.len());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let model = Model::default();
        assert!(model.entity("Nope").is_err());
    }
}
