//! # Observation records
//!
//! This module holds the raw input of the pipeline: one [`Observation`] per
//! hour for a single location, and the [`ObservationSeries`] that enforces the
//! ordering invariants every later stage relies on.
//!
//! ## Invariants
//!
//! - timestamps are UTC and hour-aligned,
//! - the series is strictly increasing in time,
//! - duplicate timestamps are collapsed with latest-write-wins before use.
//!
//! Raw records arrive as [`RawObservation`] (every field optional, exactly as a
//! CSV row or an API payload would carry them). Converting a raw record into an
//! [`Observation`] either succeeds or yields a
//! [`MalformedObservation`](crate::errors::AqiForecastError::MalformedObservation)
//! error; malformed records are dropped, never defaulted.
//!
//! ```rust
//! use aqi_forecast::data::{ObservationSeries, RawObservation};
//!
//! let raw = vec![RawObservation {
//!     timestamp: Some("2024-01-01T00:00:00Z".to_string()),
//!     index_value: Some(80.0),
//!     pm25: Some(30.0),
//!     pm10: Some(60.0),
//!     o3: Some(40.0),
//!     no2: Some(20.0),
//!     so2: Some(8.0),
//!     co: Some(0.4),
//!     temperature: Some(24.0),
//!     humidity: Some(55.0),
//!     pressure: Some(1012.0),
//!     wind_speed: Some(3.1),
//!     latitude: Some(24.8607),
//!     longitude: Some(67.0011),
//!     ..RawObservation::default()
//! }];
//!
//! let (series, rejected) = ObservationSeries::from_raw(&raw).unwrap();
//! assert_eq!(series.len(), 1);
//! assert!(rejected.is_empty());
//! ```

use crate::errors::{AqiForecastError, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of pollutant concentrations carried by every observation.
pub const POLLUTANT_COUNT: usize = 6;

/// Pollutants measured alongside the index value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pollutant {
    /// Fine particulate matter (μg/m³)
    Pm25,
    /// Coarse particulate matter (μg/m³)
    Pm10,
    /// Ozone (μg/m³)
    O3,
    /// Nitrogen dioxide (μg/m³)
    No2,
    /// Sulphur dioxide (μg/m³)
    So2,
    /// Carbon monoxide (mg/m³)
    Co,
}

impl Pollutant {
    /// All pollutants in storage order.
    pub const ALL: [Pollutant; POLLUTANT_COUNT] = [
        Pollutant::Pm25,
        Pollutant::Pm10,
        Pollutant::O3,
        Pollutant::No2,
        Pollutant::So2,
        Pollutant::Co,
    ];

    /// Position of the pollutant inside [`Observation::pollutants`].
    pub fn index(self) -> usize {
        match self {
            Pollutant::Pm25 => 0,
            Pollutant::Pm10 => 1,
            Pollutant::O3 => 2,
            Pollutant::No2 => 3,
            Pollutant::So2 => 4,
            Pollutant::Co => 5,
        }
    }

    /// Column / feature name of the pollutant.
    pub fn column(self) -> &'static str {
        match self {
            Pollutant::Pm25 => "pm25",
            Pollutant::Pm10 => "pm10",
            Pollutant::O3 => "o3",
            Pollutant::No2 => "no2",
            Pollutant::So2 => "so2",
            Pollutant::Co => "co",
        }
    }
}

/// One validated, hour-aligned reading for the forecast location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Hour-aligned UTC timestamp of the reading
    pub timestamp: DateTime<Utc>,
    /// Pollution index (US EPA scale)
    pub index_value: f64,
    /// Concentrations indexed by [`Pollutant::index`]
    pub pollutants: [f64; POLLUTANT_COUNT],
    /// Air temperature (°C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Surface pressure (hPa)
    pub pressure: f64,
    /// Wind speed (m/s)
    pub wind_speed: f64,
    /// Latitude of the location
    pub latitude: f64,
    /// Longitude of the location
    pub longitude: f64,
}

impl Observation {
    /// Concentration of a single pollutant.
    pub fn pollutant(&self, pollutant: Pollutant) -> f64 {
        self.pollutants[pollutant.index()]
    }
}

/// Unvalidated record as supplied by an observation source.
///
/// Field names follow the CSV layout of the collection scripts, so a
/// `csv::Reader` can deserialize rows directly. Unknown columns are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub timestamp: Option<String>,
    #[serde(alias = "aqi")]
    pub index_value: Option<f64>,
    #[serde(alias = "pm2_5")]
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub o3: Option<f64>,
    pub no2: Option<f64>,
    pub so2: Option<f64>,
    pub co: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Set by a source that could not decode the record; validation rejects it.
    #[serde(skip)]
    pub unreadable: Option<String>,
}

impl RawObservation {
    /// Placeholder for a record the source failed to decode.
    pub fn unreadable(timestamp: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            timestamp,
            unreadable: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Validate the record, producing an [`Observation`].
    ///
    /// `record` is the position of the record in its source and is only used
    /// for error reporting.
    pub fn validate(&self, record: usize) -> Result<Observation> {
        if let Some(reason) = &self.unreadable {
            return Err(AqiForecastError::malformed_observation(
                record,
                "record",
                reason.clone(),
            ));
        }
        let raw_timestamp = self
            .timestamp
            .as_deref()
            .ok_or_else(|| AqiForecastError::malformed_observation(record, "timestamp", "is missing"))?;
        let timestamp = parse_timestamp(raw_timestamp).map_err(|err| {
            AqiForecastError::malformed_observation(record, "timestamp", err.to_string())
        })?;
        if timestamp.minute() != 0 || timestamp.second() != 0 || timestamp.nanosecond() != 0 {
            return Err(AqiForecastError::malformed_observation(
                record,
                "timestamp",
                format!("{} is not hour-aligned", timestamp),
            ));
        }

        let pollutants = [
            required(record, "pm25", self.pm25)?,
            required(record, "pm10", self.pm10)?,
            required(record, "o3", self.o3)?,
            required(record, "no2", self.no2)?,
            required(record, "so2", self.so2)?,
            required(record, "co", self.co)?,
        ];

        Ok(Observation {
            timestamp,
            index_value: required(record, "index_value", self.index_value)?,
            pollutants,
            temperature: required(record, "temperature", self.temperature)?,
            humidity: required(record, "humidity", self.humidity)?,
            pressure: required(record, "pressure", self.pressure)?,
            wind_speed: required(record, "wind_speed", self.wind_speed)?,
            latitude: required(record, "latitude", self.latitude)?,
            longitude: required(record, "longitude", self.longitude)?,
        })
    }
}

impl From<&Observation> for RawObservation {
    fn from(observation: &Observation) -> Self {
        Self {
            timestamp: Some(observation.timestamp.to_rfc3339()),
            index_value: Some(observation.index_value),
            pm25: Some(observation.pollutant(Pollutant::Pm25)),
            pm10: Some(observation.pollutant(Pollutant::Pm10)),
            o3: Some(observation.pollutant(Pollutant::O3)),
            no2: Some(observation.pollutant(Pollutant::No2)),
            so2: Some(observation.pollutant(Pollutant::So2)),
            co: Some(observation.pollutant(Pollutant::Co)),
            temperature: Some(observation.temperature),
            humidity: Some(observation.humidity),
            pressure: Some(observation.pressure),
            wind_speed: Some(observation.wind_speed),
            latitude: Some(observation.latitude),
            longitude: Some(observation.longitude),
            unreadable: None,
        }
    }
}

fn required(record: usize, field: &'static str, value: Option<f64>) -> Result<f64> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(AqiForecastError::malformed_observation(
            record,
            field,
            format!("is not finite ({})", v),
        )),
        None => Err(AqiForecastError::malformed_observation(record, field, "is missing")),
    }
}

/// Parse an RFC 3339 timestamp or a naive `YYYY-MM-DD HH:MM:SS` one (read as UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Strictly increasing, deduplicated sequence of observations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObservationSeries {
    observations: Vec<Observation>,
    duplicates_removed: usize,
}

impl ObservationSeries {
    /// Build a series from validated observations.
    ///
    /// The input must already be sorted by timestamp. Records sharing a
    /// timestamp are collapsed so that the one supplied last wins; any record
    /// earlier than its predecessor is a precondition violation.
    pub fn from_observations(records: Vec<Observation>) -> Result<Self> {
        let mut observations: Vec<Observation> = Vec::with_capacity(records.len());
        let mut duplicates_removed = 0;

        for (position, record) in records.into_iter().enumerate() {
            match observations.last_mut() {
                Some(last) if record.timestamp == last.timestamp => {
                    *last = record;
                    duplicates_removed += 1;
                }
                Some(last) if record.timestamp < last.timestamp => {
                    return Err(AqiForecastError::malformed_input(format!(
                        "observation {} at {} precedes {}",
                        position, record.timestamp, last.timestamp
                    )));
                }
                _ => observations.push(record),
            }
        }

        if duplicates_removed > 0 {
            debug!(duplicates_removed, "collapsed duplicate observation timestamps");
        }

        Ok(Self {
            observations,
            duplicates_removed,
        })
    }

    /// Validate raw records and build a series from the well-formed ones.
    ///
    /// Returns the series together with one
    /// [`MalformedObservation`](AqiForecastError::MalformedObservation) per
    /// dropped record.
    pub fn from_raw(raw: &[RawObservation]) -> Result<(Self, Vec<AqiForecastError>)> {
        let mut valid = Vec::with_capacity(raw.len());
        let mut rejected = Vec::new();
        for (record, candidate) in raw.iter().enumerate() {
            match candidate.validate(record) {
                Ok(observation) => valid.push(observation),
                Err(err) => rejected.push(err),
            }
        }
        Ok((Self::from_observations(valid)?, rejected))
    }

    /// Borrow the observations in timestamp order.
    pub fn as_slice(&self) -> &[Observation] {
        &self.observations
    }

    /// Iterate over the observations in timestamp order.
    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether the series holds no observations.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Number of records replaced by a later write for the same timestamp.
    pub fn duplicates_removed(&self) -> usize {
        self.duplicates_removed
    }

    /// First and last timestamp of the series.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.observations.first(), self.observations.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    /// Index value recorded exactly at `timestamp`, if any.
    pub fn index_at(&self, timestamp: DateTime<Utc>) -> Option<f64> {
        self.observations
            .binary_search_by(|obs| obs.timestamp.cmp(&timestamp))
            .ok()
            .map(|pos| self.observations[pos].index_value)
    }

    /// Sub-series containing only observations at or before `timestamp`.
    pub fn until(&self, timestamp: DateTime<Utc>) -> ObservationSeries {
        let end = self
            .observations
            .partition_point(|obs| obs.timestamp <= timestamp);
        ObservationSeries {
            observations: self.observations[..end].to_vec(),
            duplicates_removed: 0,
        }
    }
}

/// Health category of an index value (US EPA breakpoints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
    /// The value is not a number
    Unknown,
}

impl AqiCategory {
    /// Categorise an index value.
    pub fn from_index(value: f64) -> Self {
        if value.is_nan() {
            AqiCategory::Unknown
        } else if value <= 50.0 {
            AqiCategory::Good
        } else if value <= 100.0 {
            AqiCategory::Moderate
        } else if value <= 150.0 {
            AqiCategory::UnhealthyForSensitiveGroups
        } else if value <= 200.0 {
            AqiCategory::Unhealthy
        } else if value <= 300.0 {
            AqiCategory::VeryUnhealthy
        } else {
            AqiCategory::Hazardous
        }
    }

    /// Human readable category name.
    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
            AqiCategory::Unknown => "Unknown",
        }
    }

    /// Display colour conventionally associated with the category.
    pub fn color(&self) -> &'static str {
        match self {
            AqiCategory::Good => "#00E400",
            AqiCategory::Moderate => "#FFFF00",
            AqiCategory::UnhealthyForSensitiveGroups => "#FF7E00",
            AqiCategory::Unhealthy => "#FF0000",
            AqiCategory::VeryUnhealthy => "#8F3F97",
            AqiCategory::Hazardous => "#7E0023",
            AqiCategory::Unknown => "#808080",
        }
    }

    /// Health guidance for the category.
    pub fn health_message(&self) -> &'static str {
        match self {
            AqiCategory::Good => {
                "Air quality is satisfactory, and air pollution poses little or no risk."
            }
            AqiCategory::Moderate => {
                "Air quality is acceptable. However, there may be a risk for some people."
            }
            AqiCategory::UnhealthyForSensitiveGroups => {
                "Members of sensitive groups may experience health effects."
            }
            AqiCategory::Unhealthy => {
                "Some members of the general public may experience health effects."
            }
            AqiCategory::VeryUnhealthy => {
                "Health alert: The risk of health effects is increased for everyone."
            }
            AqiCategory::Hazardous => {
                "Health warning of emergency conditions: everyone is more likely to be affected."
            }
            AqiCategory::Unknown => "Data not available",
        }
    }
}

/// Approximate index value for a reading on the OpenWeather 1–5 scale.
///
/// Values outside the scale map to 100, the midpoint of the moderate band.
pub fn index_from_openweather_scale(scale: u8) -> f64 {
    match scale {
        1 => 25.0,
        2 => 75.0,
        3 => 125.0,
        4 => 175.0,
        5 => 250.0,
        _ => 100.0,
    }
}
