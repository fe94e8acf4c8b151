//! Bulk-load payload encoding
//!
//! Accepted records are written in PostgreSQL `COPY ... FROM STDIN` text
//! format: one line per row, tab between fields, and a configurable token for
//! absent values. Column order is fixed by [`PING_COLUMNS`]; the last column
//! carries the sequence index of the file the row came from.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use pingload_common::RowId;
use serde::{Deserialize, Serialize};

use crate::db::quote_ident;
use crate::ledger::rowid::RowRange;
use crate::normalize::PingRecord;

/// Destination columns, in payload order, before the source column.
pub const PING_COLUMNS: [&str; 21] = [
    "id",
    "device_id",
    "location_at",
    "timestamp",
    "latitude",
    "longitude",
    "altitude",
    "horizontal_accuracy",
    "vertical_accuracy",
    "heading",
    "speed",
    "ipv_4",
    "ipv_6",
    "final_country",
    "user_agent",
    "background",
    "publisher_id",
    "wifi_ssid",
    "wifi_bssid",
    "venue_id",
    "dwell_time",
];

/// Null token PostgreSQL uses by default in text COPY.
pub const DEFAULT_NULL_TOKEN: &str = "\\N";

/// How the derived timestamp is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampMode {
    /// `2020-09-13 12:26:40`, for `timestamp without time zone` columns
    #[default]
    UtcNaive,
    /// `2020-09-13 12:26:40+00`, for `timestamptz` columns
    UtcAware,
}

impl TimestampMode {
    pub fn render(self, timestamp: &DateTime<Utc>) -> String {
        let naive = timestamp.format("%Y-%m-%d %H:%M:%S");
        match self {
            TimestampMode::UtcNaive => naive.to_string(),
            TimestampMode::UtcAware => format!("{}+00", naive),
        }
    }
}

impl std::str::FromStr for TimestampMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "utc_naive" | "naive" => Ok(TimestampMode::UtcNaive),
            "utc_aware" | "aware" => Ok(TimestampMode::UtcAware),
            other => Err(format!(
                "Invalid timestamp mode: {}. Must be 'utc_naive' or 'utc_aware'",
                other
            )),
        }
    }
}

/// Where a payload is copied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    pub table: String,
    pub source_column: String,
    pub null_token: String,
}

impl CopyTarget {
    pub fn copy_statement(&self) -> String {
        let columns = PING_COLUMNS
            .iter()
            .copied()
            .chain(std::iter::once(self.source_column.as_str()))
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT text, NULL '{}')",
            quote_ident(&self.table),
            columns,
            self.null_token.replace('\'', "''")
        )
    }
}

/// One file's encoded rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkPayload {
    pub source_index: u64,
    pub first_row_id: RowId,
    pub rows: u64,
    pub data: Vec<u8>,
}

impl BulkPayload {
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row_range(&self) -> RowRange {
        RowRange::new(self.first_row_id, self.rows)
    }
}

/// Numbers records from a starting row id and appends them to a payload.
pub struct PayloadEncoder {
    mode: TimestampMode,
    null_token: String,
    payload: BulkPayload,
    line: String,
}

impl PayloadEncoder {
    pub fn new(mode: TimestampMode, null_token: impl Into<String>, source_index: u64, first_row_id: RowId) -> Self {
        Self {
            mode,
            null_token: null_token.into(),
            payload: BulkPayload {
                source_index,
                first_row_id,
                rows: 0,
                data: Vec::new(),
            },
            line: String::new(),
        }
    }

    /// Append `record` with the next row id and return that id.
    pub fn push(&mut self, record: &PingRecord) -> RowId {
        let row_id = self.payload.row_range().id_at(self.payload.rows);
        self.line.clear();

        self.number(Some(row_id));
        self.text(Some(&record.device_id));
        self.number(record.observed_at);
        let timestamp = record.timestamp.map(|ts| self.mode.render(&ts));
        self.text(timestamp.as_deref());
        self.number(record.latitude);
        self.number(record.longitude);
        self.number(record.altitude);
        self.number(record.horizontal_accuracy);
        self.number(record.vertical_accuracy);
        self.text(record.heading.as_deref());
        self.number(record.speed);
        self.text(record.ipv4.as_deref());
        self.text(record.ipv6.as_deref());
        self.text(record.country.as_deref());
        self.text(record.user_agent.as_deref());
        self.text(record.background.as_deref());
        self.text(record.publisher_id.as_deref());
        self.text(record.wifi_ssid.as_deref());
        self.text(record.wifi_bssid.as_deref());
        self.number(record.venue_id);
        self.number(record.dwell_time);
        self.number(Some(self.payload.source_index));

        self.line.push('\n');
        self.payload.data.extend_from_slice(self.line.as_bytes());
        self.payload.rows += 1;
        row_id
    }

    fn separator(&mut self) {
        if !self.line.is_empty() {
            self.line.push('\t');
        }
    }

    fn number<T: std::fmt::Display>(&mut self, value: Option<T>) {
        self.separator();
        match value {
            // Writing into a String cannot fail
            Some(v) => {
                let _ = write!(self.line, "{}", v);
            },
            None => self.line.push_str(&self.null_token),
        }
    }

    fn text(&mut self, value: Option<&str>) {
        self.separator();
        match value {
            Some(v) => escape_copy_text(v, &mut self.line),
            None => self.line.push_str(&self.null_token),
        }
    }

    pub fn rows(&self) -> u64 {
        self.payload.rows
    }

    pub fn finish(self) -> BulkPayload {
        self.payload
    }
}

/// Append `value` to `out` with COPY text-format escapes applied.
pub fn escape_copy_text(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}
