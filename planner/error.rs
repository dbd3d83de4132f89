//! Public error taxonomy (`spec.md` §7).
//!
//! Internally the planner works in `anyhow::Result`, using `bail!`/`ensure!`/
//! `.context(...)` freely (grounded on the teacher's `ctx.rs`/`query/mod.rs`
//! use of `anyhow`). [`UserError`] and [`SchemaError`] are thin marker types
//! anyhow code can raise to tag *why* something failed; [`PlannerError`] is
//! the thiserror-derived surface a caller (the out-of-scope Transport Layer)
//! actually matches on, recovered from the internal `anyhow::Error` at the
//! boundary via [`PlannerError::from_anyhow`].

use std::fmt;

/// A condition the client caused: bad argument, malformed literal, invalid
/// cursor, unknown where/orderBy property, `some/every/none` on a non-relation
/// field, a sort path that doesn't terminate on a scalar/enum.
#[derive(Debug)]
pub struct UserError(pub String);

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UserError {}

pub fn user_error(msg: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(UserError(msg.into()))
}

/// A model invariant the (out-of-scope) schema validator should have caught.
/// Reaching the planner means the model itself is broken, not the request.
#[derive(Debug)]
pub struct SchemaError(pub String);

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SchemaError {}

pub fn schema_error(msg: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(SchemaError(msg.into()))
}

/// The four-way taxonomy callers match on. Anything that isn't a tagged
/// [`UserError`]/[`SchemaError`]/[`sqlx::Error`] is a [`PlannerError::Bug`] —
/// an unreachable branch over the closed `PropertyType` dispatch, per
/// `spec.md` §9.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("{0}")]
    User(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("database error: {0}")]
    Io(#[from] sqlx::Error),
    #[error("internal error: {0}")]
    Bug(String),
}

impl PlannerError {
    /// Classifies an internal `anyhow::Error` into the public taxonomy.
    /// Never panics: an unclassified error becomes `Bug`, which is itself
    /// the documented behavior for "this should be unreachable".
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<UserError>() {
            return PlannerError::User(e.0.clone());
        }
        if let Some(e) = err.downcast_ref::<SchemaError>() {
            return PlannerError::Schema(e.0.clone());
        }
        if let Some(e) = err.downcast_ref::<model::ModelError>() {
            return PlannerError::Schema(e.to_string());
        }
        match err.downcast::<sqlx::Error>() {
            Ok(e) => PlannerError::Io(e),
            Err(err) => PlannerError::Bug(format!("{err:#}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlannerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tagged_user_errors() {
        let err = user_error("orderBy is required");
        assert!(matches!(PlannerError::from_anyhow(err), PlannerError::User(_)));
    }

    #[test]
    fn classifies_tagged_schema_errors() {
        let err = schema_error("union variant is not a JsonObject");
        assert!(matches!(PlannerError::from_anyhow(err), PlannerError::Schema(_)));
    }

    #[test]
    fn classifies_model_errors_as_schema_errors() {
        let err = anyhow::Error::new(model::ModelError::UnknownType("Foo".into()));
        assert!(matches!(PlannerError::from_anyhow(err), PlannerError::Schema(_)));
    }

    #[test]
    fn unclassified_errors_become_bugs() {
        let err = anyhow::anyhow!("unreachable arm");
        assert!(matches!(PlannerError::from_anyhow(err), PlannerError::Bug(_)));
    }
}
