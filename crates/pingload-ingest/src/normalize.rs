//! Per-record normalization
//!
//! [`RecordNormalizer::normalize`] turns one raw input row into a typed
//! [`PingRecord`]. It never mutates its input and never fails the file: every
//! problem is a [`RecordError`] that the caller counts and skips.
//!
//! Rules, in order:
//!
//! 1. A row needs at least one of latitude, longitude, location_at
//! 2. Those three parse as float, float and epoch seconds
//! 3. The timestamp is the UTC instant of location_at
//! 4. Optional numerics parse as float when present
//! 5. Optional strings are sanitized for the tab-delimited bulk format
//! 6. The venue name resolves through the [`VenueIndex`]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use csv::StringRecord;
use pingload_common::VenueId;
use serde::Serialize;
use thiserror::Error;

use crate::header::{Column, HeaderIndex};
use crate::venue::VenueIndex;

/// SSID reported when the device could not identify the network.
pub const UNKNOWN_SSID: &str = "<unknown ssid>";

/// BSSID reported when the device could not identify the access point.
pub const UNKNOWN_BSSID: &str = "<unknown bssid>";

/// Why a single row was skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Record has no latitude, longitude or location_at")]
    IncompleteRecord,

    #[error("Field {field} is not a valid number: '{value}'")]
    MalformedNumeric { field: &'static str, value: String },

    #[error("Record has {fields} fields, header requires {required}")]
    Truncated { fields: usize, required: usize },

    #[error("Record could not be decoded: {0}")]
    Unreadable(String),
}

/// Coarse kind of a [`RecordError`], for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordErrorKind {
    Incomplete,
    MalformedNumeric,
    Truncated,
    Unreadable,
}

impl RecordError {
    pub fn kind(&self) -> RecordErrorKind {
        match self {
            RecordError::IncompleteRecord => RecordErrorKind::Incomplete,
            RecordError::MalformedNumeric { .. } => RecordErrorKind::MalformedNumeric,
            RecordError::Truncated { .. } => RecordErrorKind::Truncated,
            RecordError::Unreadable(_) => RecordErrorKind::Unreadable,
        }
    }
}

/// Skipped-record counters for one file or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub incomplete: u64,
    pub malformed_numeric: u64,
    pub truncated: u64,
    pub unreadable: u64,
}

impl SkipCounts {
    pub fn record(&mut self, kind: RecordErrorKind) {
        match kind {
            RecordErrorKind::Incomplete => self.incomplete += 1,
            RecordErrorKind::MalformedNumeric => self.malformed_numeric += 1,
            RecordErrorKind::Truncated => self.truncated += 1,
            RecordErrorKind::Unreadable => self.unreadable += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.incomplete + self.malformed_numeric + self.truncated + self.unreadable
    }
}

impl std::ops::AddAssign for SkipCounts {
    fn add_assign(&mut self, other: Self) {
        self.incomplete += other.incomplete;
        self.malformed_numeric += other.malformed_numeric;
        self.truncated += other.truncated;
        self.unreadable += other.unreadable;
    }
}

/// A normalized ping, ready to be numbered and encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct PingRecord {
    pub device_id: String,
    pub observed_at: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub horizontal_accuracy: Option<f64>,
    pub vertical_accuracy: Option<f64>,
    pub heading: Option<String>,
    pub speed: Option<f64>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub country: Option<String>,
    pub user_agent: Option<String>,
    pub background: Option<String>,
    pub publisher_id: Option<String>,
    pub wifi_ssid: Option<String>,
    pub wifi_bssid: Option<String>,
    pub venue_id: Option<VenueId>,
    pub dwell_time: Option<f64>,
}

/// Non-fatal problem with an accepted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataQualityWarning {
    /// Venue name present but absent from the venue table
    UnmappedVenue(String),
}

/// Output of a successful normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: PingRecord,
    pub warning: Option<DataQualityWarning>,
}

/// Replace tabs with spaces and trim; `None` when nothing is left.
pub fn sanitize(raw: &str) -> Option<String> {
    let cleaned = raw.replace('\t', " ");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn sanitize_ssid(raw: &str) -> Option<String> {
    let cleaned = sanitize(raw)?;
    let unquoted = cleaned.trim_matches('"').trim();
    if unquoted.is_empty() || unquoted == UNKNOWN_SSID {
        None
    } else {
        Some(unquoted.to_string())
    }
}

fn sanitize_bssid(raw: &str) -> Option<String> {
    sanitize(raw).filter(|value| value != UNKNOWN_BSSID)
}

fn parse_float(column: Column, raw: &str) -> Result<Option<f64>, RecordError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(RecordError::MalformedNumeric {
            field: column.name(),
            value: raw.to_string(),
        }),
    }
}

fn parse_epoch(raw: &str) -> Result<Option<(i64, DateTime<Utc>)>, RecordError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let malformed = || RecordError::MalformedNumeric {
        field: Column::LocationAt.name(),
        value: raw.to_string(),
    };
    let seconds = raw.parse::<i64>().map_err(|_| malformed())?;
    let timestamp = DateTime::from_timestamp(seconds, 0).ok_or_else(malformed)?;
    Ok(Some((seconds, timestamp)))
}

/// Normalizes raw rows against a shared venue index.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    venues: Arc<VenueIndex>,
}

impl RecordNormalizer {
    pub fn new(venues: Arc<VenueIndex>) -> Self {
        Self { venues }
    }

    pub fn normalize(&self, row: &StringRecord, header: &HeaderIndex) -> Result<Normalized, RecordError> {
        if row.len() < header.min_width() {
            return Err(RecordError::Truncated {
                fields: row.len(),
                required: header.min_width(),
            });
        }
        let field = |column: Column| row.get(header.position(column)).unwrap_or("");

        let raw_latitude = field(Column::Latitude);
        let raw_longitude = field(Column::Longitude);
        let raw_observed = field(Column::LocationAt);
        if [raw_latitude, raw_longitude, raw_observed]
            .iter()
            .all(|raw| raw.trim().is_empty())
        {
            return Err(RecordError::IncompleteRecord);
        }

        let latitude = parse_float(Column::Latitude, raw_latitude)?;
        let longitude = parse_float(Column::Longitude, raw_longitude)?;
        let observed = parse_epoch(raw_observed)?;

        let optional = |column: Column| parse_float(column, field(column));
        let altitude = optional(Column::Altitude)?;
        let horizontal_accuracy = optional(Column::HorizontalAccuracy)?;
        let vertical_accuracy = optional(Column::VerticalAccuracy)?;
        let speed = optional(Column::Speed)?;
        let dwell_time = optional(Column::DwellTime)?;

        let venue_name = field(Column::VenueName);
        let (venue_id, warning) = match venue_name.trim() {
            "" => (None, None),
            name => match self.venues.lookup(name) {
                Some(id) => (Some(id), None),
                None => (None, Some(DataQualityWarning::UnmappedVenue(name.to_string()))),
            },
        };

        let record = PingRecord {
            device_id: sanitize(field(Column::AdvertiserId)).unwrap_or_default(),
            observed_at: observed.map(|(seconds, _)| seconds),
            timestamp: observed.map(|(_, timestamp)| timestamp),
            latitude,
            longitude,
            altitude,
            horizontal_accuracy,
            vertical_accuracy,
            heading: sanitize(field(Column::Heading)),
            speed,
            ipv4: sanitize(field(Column::Ipv4)),
            ipv6: sanitize(field(Column::Ipv6)),
            country: sanitize(field(Column::FinalCountry)),
            user_agent: sanitize(field(Column::UserAgent)),
            background: sanitize(field(Column::Background)),
            publisher_id: sanitize(field(Column::PublisherId)),
            wifi_ssid: sanitize_ssid(field(Column::WifiSsid)),
            wifi_bssid: sanitize_bssid(field(Column::WifiBssid)),
            venue_id,
            dwell_time,
        };

        Ok(Normalized { record, warning })
    }
}
