//! PostgreSQL `COPY FROM STDIN` sink

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use super::{BulkSink, SinkError};
use crate::db::quote_ident;
use crate::payload::{BulkPayload, CopyTarget};

/// Bytes sent per CopyData message.
const COPY_CHUNK_SIZE: usize = 1 << 20;

pub struct PgSink {
    pool: PgPool,
    target: CopyTarget,
    copy_statement: String,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSink {
    pub fn new(pool: PgPool, target: CopyTarget) -> Self {
        let copy_statement = target.copy_statement();
        Self {
            pool,
            target,
            copy_statement,
            tx: None,
        }
    }

    pub fn target(&self) -> &CopyTarget {
        &self.target
    }
}

#[async_trait]
impl BulkSink for PgSink {
    async fn bulk_copy(&mut self, payload: &BulkPayload) -> Result<u64, SinkError> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        let tx = self.tx.insert(tx);

        let mut copy = tx.copy_in_raw(&self.copy_statement).await?;
        for chunk in payload.data.chunks(COPY_CHUNK_SIZE) {
            let sent = copy.send(chunk).await.map(|_| ());
            if let Err(e) = sent {
                if let Err(abort_err) = copy.abort(e.to_string()).await {
                    warn!(error = %abort_err, "Failed to abort COPY after send error");
                }
                return Err(e.into());
            }
        }
        let rows = copy.finish().await?;

        if rows != payload.rows {
            return Err(SinkError::Rejected(format!(
                "COPY accepted {} rows, payload had {}",
                rows, payload.rows
            )));
        }

        debug!(
            source = payload.source_index,
            rows,
            bytes = payload.data.len(),
            "Payload copied"
        );
        Ok(rows)
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| SinkError::Rejected("commit without an open transaction".to_string()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn committed_rows(&mut self, source_index: u64) -> Result<u64, SinkError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = $1",
            quote_ident(&self.target.table),
            quote_ident(&self.target.source_column)
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(source_index as i64)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
