//! Scalar Codec Registry (`spec.md` §4.5).
//!
//! Per scalar: wire (transport) ↔ native-SQL casts, for both plain columns
//! and columns embedded inside JSON. Grounded on `datastore/layout.rs`'s
//! `ColumnRepr` enum and the exhaustive `match type_ { ... }` dispatch in
//! `datastore/decode_v8.rs`/`datastore/encode_v8.rs`, generalized from "JS
//! value ↔ SQL" to "wire string ↔ SQL" since this crate has no embedded JS
//! runtime — the (out-of-scope) transport layer is what turns wire strings
//! into whatever the client protocol needs.
//!
//! `BigInt`, `DateTime`, and `Bytes` are carried as strings end-to-end (wire,
//! SQL text, intermediate materialization) to avoid precision loss and
//! ambiguous timezone handling; the planner never arithmetics over them
//! (`spec.md` §9).

use anyhow::{Result, bail, ensure, Context as _};
use crate::sql_writer::SqlWriter;

/// The builtin scalar names this registry recognizes.
pub const ID: &str = "ID";
pub const STRING: &str = "String";
pub const BOOLEAN: &str = "Boolean";
pub const INT: &str = "Int";
pub const FLOAT: &str = "Float";
pub const BIG_INT: &str = "BigInt";
pub const DATE_TIME: &str = "DateTime";
pub const BYTES: &str = "Bytes";

fn unknown_scalar(name: &str) -> anyhow::Error {
    anyhow::anyhow!("unknown scalar {:?} in scalar codec registry", name)
}

/// Validates that `wire` is well-formed for `scalar`'s wire representation.
/// For the identity scalars this only checks the shape implied by the
/// GraphQL literal type the transport layer would have already enforced
/// (so this is mostly relevant to `BigInt`/`DateTime`/`Bytes`).
pub fn validate_transport(scalar: &str, wire: &str) -> Result<()> {
    match scalar {
        ID | STRING | BOOLEAN | INT | FLOAT => Ok(()),
        BIG_INT => validate_big_int(wire),
        DATE_TIME => validate_date_time(wire),
        BYTES => validate_bytes(wire),
        other => bail!(unknown_scalar(other)),
    }
}

fn validate_big_int(wire: &str) -> Result<()> {
    let digits = wire.strip_prefix(['+', '-']).unwrap_or(wire);
    ensure!(!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        "invalid BigInt literal {:?}: expected an optional sign followed by decimal digits", wire);
    Ok(())
}

fn validate_date_time(wire: &str) -> Result<()> {
    chrono::DateTime::parse_from_rfc3339(wire)
        .with_context(|| format!("invalid DateTime literal {:?}: expected RFC 3339", wire))?;
    Ok(())
}

fn validate_bytes(wire: &str) -> Result<()> {
    let hex = wire.strip_prefix("0x")
        .with_context(|| format!("invalid Bytes literal {:?}: expected a 0x-prefixed hex string", wire))?;
    ensure!(hex.len() % 2 == 0 && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        "invalid Bytes literal {:?}: expected an even number of hex digits after 0x", wire);
    Ok(())
}

/// How a top-level SELECT column should be decoded off the wire into a
/// `serde_json::Value` (`query::shape`). Nested list-relation/object levels
/// never need this: they arrive pre-shaped as JSON via `json_build_array`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Int,
    Float,
    Bool,
    Json,
}

/// The decode kind for a scalar's *identity*-cast (unwrapped) SELECT
/// projection, i.e. what `toTransportCast` actually leaves the driver
/// returning for this scalar at the top level.
pub fn column_kind(scalar: &str) -> Result<ColumnKind> {
    Ok(match scalar {
        INT => ColumnKind::Int,
        FLOAT => ColumnKind::Float,
        BOOLEAN => ColumnKind::Bool,
        ID | STRING | BIG_INT | DATE_TIME | BYTES => ColumnKind::Text,
        other => bail!(unknown_scalar(other)),
    })
}

/// Native SQL type used for `CAST`s and for declaring array element types.
pub fn native_sql_type(scalar: &str) -> Result<&'static str> {
    Ok(match scalar {
        ID | STRING => "text",
        BOOLEAN => "boolean",
        INT => "integer",
        FLOAT => "double precision",
        BIG_INT => "numeric",
        DATE_TIME => "timestamptz",
        BYTES => "bytea",
        other => bail!(unknown_scalar(other)),
    })
}

/// `fromTransportCast(expr)`: wire-string (bound parameter) → native SQL
/// value. `ID`/`String`/`Boolean`/`Int`/`Float` bind natively already (no
/// cast needed); `BigInt`/`DateTime`/`Bytes` are bound as text and need an
/// explicit cast.
pub fn write_from_transport_cast(
    scalar: &str,
    w: &mut SqlWriter,
    expr: impl FnOnce(&mut SqlWriter),
) -> Result<()> {
    match scalar {
        ID | STRING | BOOLEAN | INT | FLOAT => expr(w),
        BIG_INT | DATE_TIME => {
            w.write_str("CAST(");
            expr(w);
            w.write_str(" AS ");
            w.write_str(native_sql_type(scalar)?);
            w.write_str(")");
        },
        BYTES => {
            w.write_str("decode(substr(");
            expr(w);
            w.write_str(", 3), 'hex')");
        },
        other => bail!(unknown_scalar(other)),
    }
    Ok(())
}

/// `toTransportCast(expr)`: native SQL column value → wire string.
pub fn write_to_transport_cast(
    scalar: &str,
    w: &mut SqlWriter,
    expr: impl FnOnce(&mut SqlWriter),
) -> Result<()> {
    match scalar {
        ID | STRING | BOOLEAN | INT | FLOAT => expr(w),
        BIG_INT => {
            w.write_str("CAST(");
            expr(w);
            w.write_str(" AS text)");
        },
        DATE_TIME => {
            w.write_str("to_char(");
            expr(w);
            w.write_str(" AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')");
        },
        BYTES => {
            w.write_str("('0x' || encode(");
            expr(w);
            w.write_str(", 'hex'))");
        },
        other => bail!(unknown_scalar(other)),
    }
    Ok(())
}

/// `fromTransportArrayCast(expr)`: array of wire strings (bound parameter,
/// already a native array of `text`) → native array column value.
pub fn write_from_transport_array_cast(
    scalar: &str,
    w: &mut SqlWriter,
    expr: impl FnOnce(&mut SqlWriter),
) -> Result<()> {
    match scalar {
        ID | STRING | BOOLEAN | INT | FLOAT => {
            w.write_str("CAST(");
            expr(w);
            w.write_str(" AS ");
            w.write_str(native_sql_type(scalar)?);
            w.write_str("[])");
        },
        BIG_INT | DATE_TIME => {
            w.write_str("CAST(");
            expr(w);
            w.write_str(" AS ");
            w.write_str(native_sql_type(scalar)?);
            w.write_str("[])");
        },
        BYTES => {
            w.write_str("(SELECT array_agg(decode(substr(x, 3), 'hex')) FROM unnest(");
            expr(w);
            w.write_str(") AS x)");
        },
        other => bail!(unknown_scalar(other)),
    }
    Ok(())
}

/// `toTransportArrayCast(expr)`: native array column value → array of wire
/// strings.
pub fn write_to_transport_array_cast(
    scalar: &str,
    w: &mut SqlWriter,
    expr: impl FnOnce(&mut SqlWriter),
) -> Result<()> {
    match scalar {
        ID | STRING | BOOLEAN | INT | FLOAT => {
            w.write_str("CAST(");
            expr(w);
            w.write_str(" AS text[])");
        },
        BIG_INT => {
            w.write_str("(SELECT array_agg(CAST(x AS text)) FROM unnest(");
            expr(w);
            w.write_str(") AS x)");
        },
        DATE_TIME => {
            w.write_str("(SELECT array_agg(to_char(x AT TIME ZONE 'UTC', ");
            w.write_str("'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')) FROM unnest(");
            expr(w);
            w.write_str(") AS x)");
        },
        BYTES => {
            w.write_str("(SELECT array_agg('0x' || encode(x, 'hex')) FROM unnest(");
            expr(w);
            w.write_str(") AS x)");
        },
        other => bail!(unknown_scalar(other)),
    }
    Ok(())
}

/// `fromJsonCast(scalar, obj, prop)`: extract `prop` from the JSON object
/// expression `obj` and cast it to its native SQL type. `Int`/`Float` use
/// `->` (keeping the JSON numeric, then casting) rather than `->>`, which
/// always yields text.
pub fn write_from_json_cast(
    scalar: &str,
    w: &mut SqlWriter,
    obj: impl FnOnce(&mut SqlWriter),
    prop: &str,
) -> Result<()> {
    match scalar {
        INT | FLOAT => {
            w.write_str("CAST((");
            obj(w);
            w.write_str("->");
            w.write_literal_str(prop)?;
            w.write_str(") AS ");
            w.write_str(native_sql_type(scalar)?);
            w.write_str(")");
        },
        ID | STRING | BOOLEAN => {
            w.write_str("CAST((");
            obj(w);
            w.write_str("->>");
            w.write_literal_str(prop)?;
            w.write_str(") AS ");
            w.write_str(native_sql_type(scalar)?);
            w.write_str(")");
        },
        BIG_INT | DATE_TIME => {
            w.write_str("CAST((");
            obj(w);
            w.write_str("->>");
            w.write_literal_str(prop)?;
            w.write_str(") AS ");
            w.write_str(native_sql_type(scalar)?);
            w.write_str(")");
        },
        BYTES => {
            w.write_str("decode(substr((");
            obj(w);
            w.write_str("->>");
            w.write_literal_str(prop)?;
            w.write_str("), 3), 'hex')");
        },
        other => bail!(unknown_scalar(other)),
    }
    Ok(())
}

/// `fromJsonToTransportCast(scalar, obj, prop)`: extract `prop` from `obj`
/// as its canonical wire string. For `Int`/`Float`/`Boolean`/`ID`/`String`
/// this is simply the `->>'` text extraction (already the wire format);
/// `BigInt`/`DateTime`/`Bytes` round-trip through their native cast first so
/// the text is canonical (e.g. a `DateTime` stored with non-millisecond
/// precision is still serialized with milliseconds).
pub fn write_from_json_to_transport_cast(
    scalar: &str,
    w: &mut SqlWriter,
    obj: impl FnOnce(&mut SqlWriter) + Copy,
    prop: &str,
) -> Result<()> {
    match scalar {
        ID | STRING | BOOLEAN | INT | FLOAT => {
            obj(w);
            w.write_str("->>");
            w.write_literal_str(prop)?;
        },
        BIG_INT | DATE_TIME | BYTES => {
            write_to_transport_cast(scalar, w, |w| {
                write_from_json_cast(scalar, w, obj, prop).expect("prop is a valid literal");
            })?;
        },
        other => bail!(unknown_scalar(other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::any::AnyKind;

    fn sql(f: impl FnOnce(&mut SqlWriter) -> Result<()>) -> String {
        let mut w = SqlWriter::new(AnyKind::Postgres);
        f(&mut w).unwrap();
        w.build()
    }

    #[test]
    fn identity_scalars_pass_through_transport_casts() {
        for scalar in [ID, STRING, BOOLEAN, INT, FLOAT] {
            let out = sql(|w| write_from_transport_cast(scalar, w, |w| w.write_str("$1")));
            assert_eq!(out, "$1", "scalar {scalar}");
            let out = sql(|w| write_to_transport_cast(scalar, w, |w| w.write_str("col")));
            assert_eq!(out, "col", "scalar {scalar}");
        }
    }

    #[test]
    fn bigint_casts_to_numeric_and_back_to_text() {
        assert_eq!(
            sql(|w| write_from_transport_cast(BIG_INT, w, |w| w.write_str("$1"))),
            "CAST($1 AS numeric)"
        );
        assert_eq!(
            sql(|w| write_to_transport_cast(BIG_INT, w, |w| w.write_str("col"))),
            "CAST(col AS text)"
        );
    }

    #[test]
    fn bytes_decode_and_encode_with_0x_prefix() {
        assert_eq!(
            sql(|w| write_from_transport_cast(BYTES, w, |w| w.write_str("$1"))),
            "decode(substr($1, 3), 'hex')"
        );
        assert_eq!(
            sql(|w| write_to_transport_cast(BYTES, w, |w| w.write_str("col"))),
            "('0x' || encode(col, 'hex'))"
        );
    }

    #[test]
    fn json_extraction_uses_arrow_for_numeric_scalars() {
        let out = sql(|w| write_from_json_cast(INT, w, |w| w.write_str("obj"), "age"));
        assert_eq!(out, "CAST((obj->'age') AS integer)");
    }

    #[test]
    fn json_extraction_uses_double_arrow_for_text_scalars() {
        let out = sql(|w| write_from_json_cast(STRING, w, |w| w.write_str("obj"), "name"));
        assert_eq!(out, "CAST((obj->>'name') AS text)");
    }

    #[test]
    fn validates_big_int_literals() {
        assert!(validate_big_int("123").is_ok());
        assert!(validate_big_int("-123").is_ok());
        assert!(validate_big_int("+123").is_ok());
        assert!(validate_big_int("12.3").is_err());
        assert!(validate_big_int("").is_err());
        assert!(validate_big_int("abc").is_err());
    }

    #[test]
    fn validates_date_time_literals() {
        assert!(validate_date_time("2021-01-01T00:00:00Z").is_ok());
        assert!(validate_date_time("2021-01-01T00:00:00.123Z").is_ok());
        assert!(validate_date_time("not a date").is_err());
    }

    #[test]
    fn validates_bytes_literals() {
        assert!(validate_bytes("0xdeadbeef").is_ok());
        assert!(validate_bytes("0xDEADBEEF").is_ok());
        assert!(validate_bytes("deadbeef").is_err());
        assert!(validate_bytes("0xabc").is_err());
        assert!(validate_bytes("0xzz").is_err());
    }

    #[test]
    fn rejects_unknown_scalars() {
        assert!(validate_transport("Nope", "x").is_err());
        assert!(native_sql_type("Nope").is_err());
    }

    #[test]
    fn column_kind_dispatches_numerics_and_text() {
        assert_eq!(column_kind(INT).unwrap(), ColumnKind::Int);
        assert_eq!(column_kind(FLOAT).unwrap(), ColumnKind::Float);
        assert_eq!(column_kind(BOOLEAN).unwrap(), ColumnKind::Bool);
        for text_scalar in [ID, STRING, BIG_INT, DATE_TIME, BYTES] {
            assert_eq!(column_kind(text_scalar).unwrap(), ColumnKind::Text);
        }
        assert!(column_kind("Nope").is_err());
    }
}
