//! Venue name resolution
//!
//! Venues live in a dimension table maintained outside this loader. The index
//! is built once per run and only read afterwards, so it is shared between
//! files behind an `Arc` without locking.

use std::collections::HashMap;

use pingload_common::VenueId;
use sqlx::PgPool;
use tracing::info;

use crate::db::quote_ident;

/// Immutable venue name to id mapping.
#[derive(Debug, Clone, Default)]
pub struct VenueIndex {
    by_name: HashMap<String, VenueId>,
}

impl VenueIndex {
    /// Build from `(id, name)` pairs.
    ///
    /// Pairs are applied in ascending id order, so when a name repeats the
    /// highest id wins regardless of snapshot order.
    pub fn from_snapshot<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (VenueId, String)>,
    {
        let mut rows: Vec<(VenueId, String)> = rows.into_iter().collect();
        rows.sort_by_key(|(id, _)| *id);

        let by_name = rows.into_iter().map(|(id, name)| (name, id)).collect();
        Self { by_name }
    }

    /// Load every venue from `table` (columns `id`, `name`).
    pub async fn load_from_db(pool: &PgPool, table: &str) -> Result<Self, sqlx::Error> {
        let sql = format!(
            "SELECT id, name FROM {} WHERE name IS NOT NULL ORDER BY id",
            quote_ident(table)
        );
        let rows: Vec<(VenueId, String)> = sqlx::query_as(&sql).fetch_all(pool).await?;

        let index = Self::from_snapshot(rows);
        info!(table, venues = index.len(), "Venue index loaded");
        Ok(index)
    }

    pub fn lookup(&self, name: &str) -> Option<VenueId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
