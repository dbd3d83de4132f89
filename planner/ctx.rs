use anyhow::{Result, Context};
use std::sync::Arc;

use crate::conn::DataConn;

/// One request's bound execution context: a process-wide `Model` handle
/// plus an open transaction (`spec.md` §5 — "each GraphQL request is
/// handled inside one serializable read-only transaction... opened at
/// request start and committed at response end"). Grounded on the
/// teacher's `DataCtx`; `begin` additionally issues `SET TRANSACTION
/// ISOLATION LEVEL SERIALIZABLE READ ONLY` on Postgres, where the
/// read-only optimizer can use it — SQLite has no matching isolation knob
/// and is left at its default.
pub struct DataCtx {
    pub model: Arc<model::Model>,
    pub kind: sqlx::any::AnyKind,
    pub txn: sqlx::Transaction<'static, sqlx::Any>,
}

impl DataCtx {
    pub async fn begin(conn: &DataConn) -> Result<DataCtx> {
        let mut txn = conn.pool.begin().await
            .context("could not begin an SQL transaction")?;
        let kind = conn.kind();
        if kind == sqlx::any::AnyKind::Postgres {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE READ ONLY")
                .execute(&mut txn)
                .await
                .context("could not set transaction isolation level")?;
        }
        Ok(Self { model: conn.model.clone(), kind, txn })
    }

    pub async fn commit(self) -> Result<()> {
        self.txn.commit().await.context("could not commit SQL transaction")
    }

    pub async fn rollback(self) -> Result<()> {
        self.txn.rollback().await.context("could not rollback SQL transaction")
    }
}
