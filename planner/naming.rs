//! Deterministic entity/property → table/column naming (`spec.md` §6.2).
//!
//! Unlike the teacher's `layout` module, there is no separate stored
//! "Layout" here: table and column names are a pure function of the Model's
//! own names, computed on the fly by the planner. [`Name`] is kept as a thin
//! newtype (grounded on `datastore/layout.rs`'s `Name`) purely so
//! [`crate::sql_writer::SqlWriter`] can quote it without re-deriving the
//! naming rule at every call site.

/// A SQL identifier, already snake_cased, still requiring quoting before use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(pub String);

impl Name {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Converts an UpperCamelCase or lowerCamelCase identifier to snake_case.
pub fn snake_case(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    let mut prev_lower_or_digit = false;
    for c in ident.chars() {
        if c.is_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(c);
            prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// Entity name → backing table name.
pub fn table_name(entity_name: &str) -> Name {
    Name(snake_case(entity_name))
}

/// Property name → column name.
pub fn column_name(property_name: &str) -> Name {
    Name(snake_case(property_name))
}

/// `fk` property name → foreign key column name (`<prop>_id`).
pub fn fk_column_name(property_name: &str) -> Name {
    Name(format!("{}_id", snake_case(property_name)))
}

/// FTS query name → its generated `tsvector` column.
pub fn fts_tsv_column_name(query_name: &str) -> Name {
    Name(format!("{}_tsv", snake_case(query_name)))
}

/// FTS query name → its generated concatenated-document column.
pub fn fts_doc_column_name(query_name: &str) -> Name {
    Name(format!("{}_doc", snake_case(query_name)))
}
