//! Order-by argument parsing and SQL generation (`spec.md` §4.3, §4.4.3 step 7).

use anyhow::{Result, bail, ensure};
use model::PropertyType;

use crate::error::user_error;
use super::cursor::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Parses `"<field>[_<field>...]_ASC|_DESC"` into the property-name chain and
/// its direction.
fn parse_item(item: &str) -> Result<(Vec<&str>, Direction)> {
    let (chain, direction) = if let Some(prefix) = item.strip_suffix("_ASC") {
        (prefix, Direction::Asc)
    } else if let Some(prefix) = item.strip_suffix("_DESC") {
        (prefix, Direction::Desc)
    } else {
        bail!(user_error(format!("{item:?}: orderBy value must end in _ASC or _DESC")));
    };
    ensure!(!chain.is_empty(), user_error(format!("{item:?}: missing field name")));
    Ok((chain.split('_').collect(), direction))
}

/// Walks each order-by item's property chain through object/union/fk,
/// requiring the terminal step to be scalar/enum, and renders the
/// `ORDER BY` body (without the `ORDER BY` keyword). Returns `None` when
/// `items` is empty.
pub fn populate_order_by(cursor: &Cursor, items: &[String]) -> Result<Option<String>> {
    if items.is_empty() {
        return Ok(None);
    }
    let mut terms = Vec::with_capacity(items.len());
    for item in items {
        let (segments, direction) = parse_item(item)?;
        let mut step = cursor.clone();
        for segment in &segments[..segments.len() - 1] {
            step = step.child(segment).map_err(|e| {
                user_error(format!("{item:?}: {e:#}"))
            })?;
        }
        let leaf = segments.last().expect("parse_item guarantees at least one segment");
        let prop = step.property(leaf)?;
        ensure!(
            matches!(prop.type_, PropertyType::Scalar(_) | PropertyType::Enum(_)),
            user_error(format!("{item:?}: sort path must terminate on a scalar or enum field"))
        );
        let expr = step.native(leaf)?;
        terms.push(format!("{expr} {}", direction.as_sql()));
    }
    Ok(Some(terms.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_field() {
        let (segments, dir) = parse_item("balance_DESC").unwrap();
        assert_eq!(segments, vec!["balance"]);
        assert_eq!(dir, Direction::Desc);
    }

    #[test]
    fn parses_multi_field_chain() {
        let (segments, dir) = parse_item("account_wallet_ASC").unwrap();
        assert_eq!(segments, vec!["account", "wallet"]);
        assert_eq!(dir, Direction::Asc);
    }

    #[test]
    fn rejects_missing_direction() {
        assert!(parse_item("balance").is_err());
    }

    #[test]
    fn empty_items_produce_no_order_by() {
        use model::{Model, Entity};
        use std::sync::Arc;
        use super::super::cursor::{Cursor, PlanState};

        let mut entities = indexmap::IndexMap::new();
        entities.insert("Account".to_string(), Arc::new(Entity::new("Account", indexmap::IndexMap::new())));
        let model = Model { entities, ..Model::default() };
        let state = PlanState::new(sqlx::any::AnyKind::Postgres);
        let cursor = Cursor::root(&model, "Account", state).unwrap();
        assert!(populate_order_by(&cursor, &[]).unwrap().is_none());
    }
}
