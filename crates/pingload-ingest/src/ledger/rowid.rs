//! Row-id arithmetic
//!
//! Each committed file owns a contiguous range of row ids. The first file
//! starts at 1 and every later file starts one past the end of the file
//! committed before it, so ids never repeat across restarts.

use pingload_common::RowId;

/// First row id ever handed out.
pub const FIRST_ROW_ID: RowId = 1;

/// The ids assigned to one file's accepted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: RowId,
    pub count: u64,
}

impl RowRange {
    pub fn new(start: RowId, count: u64) -> Self {
        Self { start, count }
    }

    /// Last id in the range. An empty range ends just before its start.
    pub fn end(&self) -> RowId {
        self.start + self.count as RowId - 1
    }

    /// Id of the `offset`-th accepted record (0-based).
    pub fn id_at(&self, offset: u64) -> RowId {
        self.start + offset as RowId
    }
}

/// Computes where the next file's range begins.
#[derive(Debug, Default, Clone, Copy)]
pub struct RowIdAllocator;

impl RowIdAllocator {
    /// Start id for a file whose predecessor was allocated `prior`
    /// (`None` when it is the first file to be loaded).
    pub fn start_after(prior: Option<&RowRange>) -> RowId {
        match prior {
            Some(range) => range.end() + 1,
            None => FIRST_ROW_ID,
        }
    }

    /// Replays a run of committed row counts in processing order and
    /// returns the range of the last one.
    pub fn replay(row_counts: impl IntoIterator<Item = u64>) -> Option<RowRange> {
        row_counts.into_iter().fold(None, |prior, count| {
            let start = Self::start_after(prior.as_ref());
            Some(RowRange::new(start, count))
        })
    }
}
