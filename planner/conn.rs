use std::sync::Arc;

/// A pooled database connection, paired with the process-wide `Model`
/// (`spec.md` §3.3, §5: "the Model and Scalar Codec Registry are
/// process-wide, immutable after construction"). Grounded on the teacher's
/// `DataConn`, generalized from `layout::Layout` to `model::Model`.
#[derive(Debug)]
pub struct DataConn {
    pub model: Arc<model::Model>,
    pub pool: sqlx::AnyPool,
}

impl DataConn {
    pub fn new(model: Arc<model::Model>, pool: sqlx::AnyPool) -> Self {
        Self { model, pool }
    }

    pub fn kind(&self) -> sqlx::any::AnyKind {
        self.pool.any_kind()
    }
}
