//! Relay connection planning (`spec.md` §4.4.6).
//!
//! Grounded on `datastore/crud.rs`'s `Cursor` (base64-encoded JSON sort
//! position) and its `hasNextPage`/`totalCount` derivation, generalized
//! from a multi-axis `(SortKey, Value)` cursor to `spec.md`'s
//! `{orderBy, offset}` shape. `paginate` is the pure post-fetch half;
//! `query::Planner::execute_select` (in `query/mod.rs`) is the caller that
//! runs the underlying list with `limit = first + 1` and feeds the decoded
//! rows through it.

use anyhow::{Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::error::user_error;

/// The decoded shape of a connection's `after` cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorPayload {
    #[serde(rename = "orderBy")]
    pub order_by: Vec<String>,
    pub offset: i64,
}

impl CursorPayload {
    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).expect("CursorPayload always serializes");
        base64::encode(json)
    }

    /// Decodes `after` and checks it was issued for the same `orderBy` this
    /// connection is being read with (`spec.md` §4.4.6: "a mismatched
    /// orderBy is rejected").
    pub fn decode(after: &str, order_by: &[String]) -> Result<Self> {
        let bytes = base64::decode(after).map_err(|e| user_error(format!("invalid cursor: {e}")))?;
        let payload: CursorPayload = serde_json::from_slice(&bytes)
            .map_err(|e| user_error(format!("invalid cursor: {e}")))?;
        ensure!(payload.offset > 0, user_error("cursor offset must be a positive integer"));
        ensure!(payload.order_by == order_by, user_error("cursor orderBy does not match the connection's orderBy"));
        Ok(payload)
    }
}

/// Validates the connection's own `orderBy` argument, required per
/// `spec.md` §4.4.6, and resolves the starting offset from an optional
/// `after` cursor.
pub fn resolve_offset(order_by: &[String], after: Option<&str>) -> Result<i64> {
    ensure!(!order_by.is_empty(), user_error("a connection's orderBy argument is required and must not be empty"));
    match after {
        None => Ok(0),
        Some(after) => Ok(CursorPayload::decode(after, order_by)?.offset),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// One `node` together with the outbound cursor pointing at it.
#[derive(Debug, Clone)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
    /// `Some` when the page fit within `first` and the total is therefore
    /// known for free; `None` means the caller must run
    /// `builder::select_count` to answer `totalCount` (`spec.md` §4.4.6).
    pub exact_total: Option<i64>,
}

/// Turns `first + 1` over-fetched `nodes` into a Relay page. `nodes` must
/// have been fetched with `limit = first + 1` and `offset = offset_in`.
pub fn paginate<T>(mut nodes: Vec<T>, order_by: &[String], offset_in: i64, first: i64) -> Result<Page<T>> {
    ensure!(first > 0, user_error("a connection's first argument must be a positive integer"));
    let has_next_page = nodes.len() as i64 > first;
    if has_next_page {
        nodes.truncate(first as usize);
    }
    let returned = nodes.len() as i64;

    let edges: Vec<Edge<T>> = nodes
        .into_iter()
        .enumerate()
        .map(|(i, node)| {
            let cursor = CursorPayload { order_by: order_by.to_vec(), offset: offset_in + i as i64 + 1 }.encode();
            Edge { cursor, node }
        })
        .collect();

    let has_previous_page = offset_in > 0 && returned > 0;
    let start_cursor = edges.first().map(|e| e.cursor.clone());
    let end_cursor = edges.last().map(|e| e.cursor.clone());
    let exact_total = (!has_next_page).then_some(offset_in + returned);

    Ok(Page {
        edges,
        page_info: PageInfo { has_next_page, has_previous_page, start_cursor, end_cursor },
        exact_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_by() -> Vec<String> {
        vec!["balance_DESC".to_string()]
    }

    #[test]
    fn cursor_round_trips_through_base64_json() {
        let payload = CursorPayload { order_by: order_by(), offset: 7 };
        let encoded = payload.encode();
        let decoded = CursorPayload::decode(&encoded, &order_by()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn decode_rejects_mismatched_order_by() {
        let payload = CursorPayload { order_by: order_by(), offset: 7 };
        let encoded = payload.encode();
        assert!(CursorPayload::decode(&encoded, &["wallet_ASC".to_string()]).is_err());
    }

    #[test]
    fn decode_rejects_non_positive_offset() {
        let payload = CursorPayload { order_by: order_by(), offset: 0 };
        let encoded = payload.encode();
        assert!(CursorPayload::decode(&encoded, &order_by()).is_err());
    }

    #[test]
    fn missing_order_by_is_a_user_error() {
        assert!(resolve_offset(&[], None).is_err());
    }

    #[test]
    fn exact_page_reports_total_and_no_next_page() {
        let page = paginate(vec!["a", "b"], &order_by(), 0, 5).unwrap();
        assert!(!page.page_info.has_next_page);
        assert!(!page.page_info.has_previous_page);
        assert_eq!(page.exact_total, Some(2));
        assert_eq!(page.edges.len(), 2);
    }

    #[test]
    fn overfetched_page_truncates_and_defers_total_count() {
        let page = paginate(vec!["a", "b", "c"], &order_by(), 10, 2).unwrap();
        assert!(page.page_info.has_next_page);
        assert!(page.page_info.has_previous_page);
        assert_eq!(page.edges.len(), 2);
        assert_eq!(page.exact_total, None);
    }

    #[test]
    fn outbound_cursors_continue_from_offset_in() {
        let page = paginate(vec!["a"], &order_by(), 3, 5).unwrap();
        let decoded = CursorPayload::decode(&page.edges[0].cursor, &order_by()).unwrap();
        assert_eq!(decoded.offset, 4);
    }
}
