//! Where-argument parsing and SQL generation (`spec.md` §4.3, §4.4.4).

use anyhow::{Result, bail, ensure};
use model::PropertyType;

use crate::error::user_error;
use super::cursor::Cursor;
use super::value::{bind_scalar_literal, Literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereOp {
    NotEq, Eq, Gt, Gte, Lt, Lte,
    In, NotIn,
    Contains, NotContains,
    StartsWith, NotStartsWith,
    EndsWith, NotEndsWith,
    Some_, Every, None_,
}

impl WhereOp {
    /// The plain binary SQL operator for ops that map directly (everything
    /// but `in`/`not_in`/`contains`/`not_contains`/`startsWith`/`endsWith`
    /// and their negations, and the relation ops, which need bespoke SQL).
    fn sql_operator(self) -> Option<&'static str> {
        Some(match self {
            WhereOp::NotEq => "<>",
            WhereOp::Eq => "=",
            WhereOp::Gt => ">",
            WhereOp::Gte => ">=",
            WhereOp::Lt => "<",
            WhereOp::Lte => "<=",
            _ => return None,
        })
    }
}

/// Suffixes in the order `spec.md` §4.3/§9 requires: longest match first, so
/// `not_in` never gets misclassified as a bare `in`, and `not_startsWith`
/// never as `startsWith`.
const SUFFIXES: &[(&str, WhereOp)] = &[
    ("not_startsWith", WhereOp::NotStartsWith),
    ("not_endsWith", WhereOp::NotEndsWith),
    ("not_contains", WhereOp::NotContains),
    ("startsWith", WhereOp::StartsWith),
    ("not_eq", WhereOp::NotEq),
    ("not_in", WhereOp::NotIn),
    ("endsWith", WhereOp::EndsWith),
    ("contains", WhereOp::Contains),
    ("every", WhereOp::Every),
    ("none", WhereOp::None_),
    ("some", WhereOp::Some_),
    ("gte", WhereOp::Gte),
    ("lte", WhereOp::Lte),
    ("not", WhereOp::NotEq),
    ("in", WhereOp::In),
    ("gt", WhereOp::Gt),
    ("lt", WhereOp::Lt),
    ("eq", WhereOp::Eq),
];

/// Parses a where-input key into `(field, op)`. A field with no recognized
/// suffix defaults to `eq` over the whole key.
pub fn parse_key(key: &str) -> (String, WhereOp) {
    for (suffix, op) in SUFFIXES {
        if let Some(field) = key.strip_suffix(&format!("_{suffix}")) {
            if !field.is_empty() {
                return (field.to_string(), *op);
            }
        }
    }
    (key.to_string(), WhereOp::Eq)
}

/// True iff `w` has any key other than `AND`/`OR`, or any nested `AND`/`OR`
/// branch does (invariant 5, `spec.md` §8).
pub fn has_conditions(w: &Literal) -> bool {
    let Ok(map) = w.as_object() else { return false };
    for (key, value) in map {
        match key.as_str() {
            "AND" | "OR" => {
                if let Ok(items) = value.as_list() {
                    if items.iter().any(|item| has_conditions(item)) {
                        return true;
                    }
                }
            },
            _ => return true,
        }
    }
    false
}

/// Translates a where-input into a SQL boolean expression, or `None` when it
/// has no conditions.
pub fn generate_where(cursor: &Cursor, w: &Literal) -> Result<Option<String>> {
    if !has_conditions(w) {
        return Ok(None);
    }
    let map = w.as_object()?;
    let mut and_terms = Vec::new();
    let mut or_terms: Vec<String> = Vec::new();

    for (key, value) in map {
        match key.as_str() {
            "AND" => {
                for item in value.as_list()? {
                    if let Some(expr) = generate_where(cursor, item)? {
                        and_terms.push(expr);
                    }
                }
            },
            "OR" => {
                for item in value.as_list()? {
                    if let Some(expr) = generate_where(cursor, item)? {
                        or_terms.push(expr);
                    }
                }
            },
            _ => {
                let (field, op) = parse_key(key);
                if let Some(expr) = add_prop_condition(cursor, &field, op, value)? {
                    and_terms.push(expr);
                }
            },
        }
    }

    let and_group = if and_terms.is_empty() {
        None
    } else {
        Some(format!("({})", and_terms.join(" AND ")))
    };

    if or_terms.is_empty() {
        return Ok(and_group);
    }
    let mut branches: Vec<String> = Vec::new();
    if let Some(and_group) = &and_group {
        branches.push(and_group.clone());
    }
    branches.extend(or_terms);
    Ok(Some(format!("({})", branches.join(" OR "))))
}

fn add_prop_condition(cursor: &Cursor, field: &str, op: WhereOp, value: &Literal) -> Result<Option<String>> {
    let prop = cursor.property(field)?;
    match &prop.type_ {
        PropertyType::Scalar(scalar_name) => scalar_condition(cursor, field, scalar_name, op, value).map(Some),
        PropertyType::Enum(_) => enum_condition(cursor, field, op, value).map(Some),
        PropertyType::Object(_) | PropertyType::Union(_) => {
            ensure!(op == WhereOp::Eq, user_error(format!("{field}: only eq is valid on an object/union field")));
            let child = cursor.child(field)?;
            generate_where(&child, value)
        },
        PropertyType::Fk(_) => {
            ensure!(op == WhereOp::Eq, user_error(format!("{field}: only eq is valid on an fk field")));
            if !has_conditions(value) {
                return Ok(None);
            }
            let child = cursor.child(field)?;
            generate_where(&child, value)
        },
        PropertyType::ListRelation { entity, field: inverse_field } => {
            relation_condition(cursor, field, entity, inverse_field, op, value)
        },
        PropertyType::List(_) => bail!(user_error(format!("{field}: cannot filter directly on a list field"))),
    }
}

fn scalar_condition(cursor: &Cursor, field: &str, scalar_name: &str, op: WhereOp, value: &Literal) -> Result<String> {
    let lhs = cursor.native(field)?;
    match op {
        WhereOp::In | WhereOp::NotIn => {
            let items = value.as_list()?;
            let mut placeholders = Vec::with_capacity(items.len());
            for item in items {
                let bound = bind_scalar_literal(scalar_name, item)?;
                placeholders.push(cursor.bind(bound));
            }
            let not = if op == WhereOp::NotIn { "NOT " } else { "" };
            Ok(format!("{lhs} {not}IN ({})", placeholders.join(", ")))
        },
        WhereOp::Contains | WhereOp::NotContains => {
            let placeholder = cursor.bind(bind_scalar_literal(scalar_name, value)?);
            let cmp = if op == WhereOp::Contains { "> 0" } else { "= 0" };
            Ok(format!("position({placeholder} in {lhs}) {cmp}"))
        },
        WhereOp::StartsWith | WhereOp::NotStartsWith => {
            let placeholder = cursor.bind(bind_scalar_literal(scalar_name, value)?);
            let expr = format!("starts_with({lhs}, {placeholder})");
            Ok(if op == WhereOp::StartsWith { expr } else { format!("NOT {expr}") })
        },
        WhereOp::EndsWith | WhereOp::NotEndsWith => {
            let placeholder = cursor.bind(bind_scalar_literal(scalar_name, value)?);
            let expr = format!("right({lhs}, length({placeholder})) = {placeholder}");
            Ok(if op == WhereOp::EndsWith { expr } else { format!("NOT ({expr})") })
        },
        WhereOp::Some_ | WhereOp::Every | WhereOp::None_ => {
            bail!(user_error(format!("{field}: some/every/none is only valid on a list-relation field")))
        },
        _ => {
            let sql_op = op.sql_operator().expect("all remaining WhereOp variants map to an operator");
            let placeholder = cursor.bind(bind_scalar_literal(scalar_name, value)?);
            Ok(format!("{lhs} {sql_op} {placeholder}"))
        },
    }
}

fn enum_condition(cursor: &Cursor, field: &str, op: WhereOp, value: &Literal) -> Result<String> {
    // Enums are stored and bound as plain text; every op valid for a scalar
    // is valid here (Int/Float-only ops like `contains` are nonsensical but
    // not actually exercised against enums by a well-formed schema).
    scalar_condition(cursor, field, "String", op, value)
}

fn relation_condition(
    cursor: &Cursor,
    field: &str,
    entity: &str,
    inverse_field: &str,
    op: WhereOp,
    value: &Literal,
) -> Result<Option<String>> {
    ensure!(matches!(op, WhereOp::Some_ | WhereOp::Every | WhereOp::None_),
        user_error(format!("{field}: expected some/every/none on a list-relation field")));

    let table = crate::naming::table_name(entity);

    // The some/every/none subquery is its own standalone FROM/JOIN scope: a
    // nested fk condition inside `value` (e.g. `history_some: { account: {
    // wallet_eq: "x" } }`) registers a join via `rel_cursor.child(...)`, and
    // that join must be rendered inside *this* subquery's FROM, not the
    // outer statement's — swap in a fresh JoinSet for the duration, keeping
    // the shared AliasAllocator (plan-wide alias uniqueness) and
    // bound-parameter vector (correct placeholder ordering) untouched.
    let outer_joins = {
        let mut state = cursor.state().borrow_mut();
        std::mem::replace(&mut state.joins, super::alias::JoinSet::new())
    };
    let rel_cursor = super::cursor::Cursor::root(cursor.model(), entity, cursor.state().clone())?;

    let parent_id = format!("{}.\"id\"", quote(cursor.alias().as_str()));
    let correlation = format!("{}.\"{}\" = {parent_id}", quote(rel_cursor.alias().as_str()), crate::naming::fk_column_name(inverse_field).0);

    let inner_where = generate_where(&rel_cursor, value)?;
    let where_clause = match &inner_where {
        Some(expr) => format!("{correlation} AND {expr}"),
        None => correlation.clone(),
    };

    let inner_joins_sql = cursor.state().borrow().joins.render();
    cursor.state().borrow_mut().joins = outer_joins;

    let from = format!("\"{}\" {}{}", table.0, quote(rel_cursor.alias().as_str()), inner_joins_sql);

    Ok(Some(match op {
        WhereOp::Some_ => format!("EXISTS (SELECT true FROM {from} WHERE {where_clause} LIMIT 1)"),
        WhereOp::Every => {
            if inner_where.is_none() {
                // every with an empty inner where is a no-op.
                return Ok(None);
            }
            format!(
                "(SELECT count(*) FROM {from} WHERE {where_clause}) = (SELECT count(*) FROM {from} WHERE {correlation})"
            )
        },
        WhereOp::None_ => format!(
            "(SELECT count(*) FROM (SELECT true FROM {from} WHERE {where_clause} LIMIT 1) AS _none_check) = 0"
        ),
        _ => unreachable!("guarded above"),
    }))
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_longest_suffix_first() {
        assert_eq!(parse_key("balance_not_in"), ("balance".to_string(), WhereOp::NotIn));
        assert_eq!(parse_key("balance_in"), ("balance".to_string(), WhereOp::In));
        assert_eq!(parse_key("name_not_startsWith"), ("name".to_string(), WhereOp::NotStartsWith));
        assert_eq!(parse_key("name_startsWith"), ("name".to_string(), WhereOp::StartsWith));
    }

    #[test]
    fn bare_not_suffix_means_not_eq() {
        assert_eq!(parse_key("balance_not"), ("balance".to_string(), WhereOp::NotEq));
    }

    #[test]
    fn no_suffix_defaults_to_eq() {
        assert_eq!(parse_key("wallet"), ("wallet".to_string(), WhereOp::Eq));
    }

    #[test]
    fn relation_suffixes_parse() {
        assert_eq!(parse_key("history_some"), ("history".to_string(), WhereOp::Some_));
        assert_eq!(parse_key("history_every"), ("history".to_string(), WhereOp::Every));
        assert_eq!(parse_key("history_none"), ("history".to_string(), WhereOp::None_));
    }

    #[test]
    fn empty_where_has_no_conditions() {
        let empty = Literal::Object(indexmap::IndexMap::new());
        assert!(!has_conditions(&empty));
    }

    #[test]
    fn empty_and_or_have_no_conditions() {
        let mut map = indexmap::IndexMap::new();
        map.insert("AND".to_string(), Literal::List(vec![]));
        map.insert("OR".to_string(), Literal::List(vec![]));
        assert!(!has_conditions(&Literal::Object(map)));
    }

    #[test]
    fn a_plain_condition_has_conditions() {
        let mut map = indexmap::IndexMap::new();
        map.insert("balance_gt".to_string(), Literal::Int(10));
        assert!(has_conditions(&Literal::Object(map)));
    }
}
