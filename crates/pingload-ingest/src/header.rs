//! Input header contract
//!
//! Every input file starts with a header row. [`HeaderIndex::from_header`]
//! maps each required column to its field position; files that lack any of
//! them are rejected as a whole.

use std::fmt;

use thiserror::Error;

/// Columns every input file must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    AdvertiserId,
    LocationAt,
    Latitude,
    Longitude,
    Altitude,
    HorizontalAccuracy,
    VerticalAccuracy,
    Heading,
    Speed,
    Ipv4,
    Ipv6,
    FinalCountry,
    UserAgent,
    Background,
    PublisherId,
    WifiSsid,
    WifiBssid,
    VenueName,
    DwellTime,
}

impl Column {
    pub const ALL: [Column; 19] = [
        Column::AdvertiserId,
        Column::LocationAt,
        Column::Latitude,
        Column::Longitude,
        Column::Altitude,
        Column::HorizontalAccuracy,
        Column::VerticalAccuracy,
        Column::Heading,
        Column::Speed,
        Column::Ipv4,
        Column::Ipv6,
        Column::FinalCountry,
        Column::UserAgent,
        Column::Background,
        Column::PublisherId,
        Column::WifiSsid,
        Column::WifiBssid,
        Column::VenueName,
        Column::DwellTime,
    ];

    /// Header name as it appears in input files.
    pub fn name(self) -> &'static str {
        match self {
            Column::AdvertiserId => "advertiser_id",
            Column::LocationAt => "location_at",
            Column::Latitude => "latitude",
            Column::Longitude => "longitude",
            Column::Altitude => "altitude",
            Column::HorizontalAccuracy => "horizontal_accuracy",
            Column::VerticalAccuracy => "vertical_accuracy",
            Column::Heading => "heading",
            Column::Speed => "speed",
            Column::Ipv4 => "ipv_4",
            Column::Ipv6 => "ipv_6",
            Column::FinalCountry => "final_country",
            Column::UserAgent => "user_agent",
            Column::Background => "background",
            Column::PublisherId => "publisher_id",
            Column::WifiSsid => "wifi_ssid",
            Column::WifiBssid => "wifi_bssid",
            Column::VenueName => "venue_name",
            Column::DwellTime => "dwell_time",
        }
    }

    fn ordinal(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Required columns missing from a header row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Input header is missing required columns: {}", .missing.join(", "))]
pub struct HeaderMismatch {
    pub missing: Vec<&'static str>,
}

/// Field position of every required column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderIndex {
    positions: [usize; 19],
    width: usize,
}

impl HeaderIndex {
    /// Build the index from a header row. Extra columns are ignored; names
    /// are matched after trimming surrounding whitespace.
    pub fn from_header<'a, I>(header: I) -> Result<Self, HeaderMismatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<&str> = header.into_iter().map(str::trim).collect();
        let mut positions = [0usize; 19];
        let mut missing = Vec::new();

        for column in Column::ALL {
            match names.iter().position(|name| *name == column.name()) {
                Some(pos) => positions[column.ordinal()] = pos,
                None => missing.push(column.name()),
            }
        }

        if !missing.is_empty() {
            return Err(HeaderMismatch { missing });
        }

        let width = positions.iter().copied().max().map_or(0, |max| max + 1);
        Ok(Self { positions, width })
    }

    pub fn position(&self, column: Column) -> usize {
        self.positions[column.ordinal()]
    }

    /// Minimum number of fields a row needs to reach every required column.
    pub fn min_width(&self) -> usize {
        self.width
    }
}
