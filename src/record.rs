use crate::geo::Coordinate;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use rust_decimal::Decimal;
use std::fmt::Display;

pub type Timestamp = DateTime<FixedOffset>;

/// A value observed at a point in time. Stages never mutate one in place;
/// each stage builds a new record for its output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampedRecord<V> {
    pub timestamp: Timestamp,
    pub value: V,
}

/// Where and when a post was made.
pub type Located = TimestampedRecord<Coordinate>;
/// Current temperature at a post's location.
pub type TemperatureReading = TimestampedRecord<Decimal>;
/// Running mean over the sliding window, stamped with the newest reading.
pub type AverageReading = TimestampedRecord<Decimal>;

impl<V> TimestampedRecord<V> {
    pub fn new(timestamp: Timestamp, value: V) -> Self {
        Self { timestamp, value }
    }

    /// Carries the timestamp over to a new value.
    pub fn with_value<U>(&self, value: U) -> TimestampedRecord<U> {
        TimestampedRecord {
            timestamp: self.timestamp,
            value,
        }
    }
}

impl<V: Display> TimestampedRecord<V> {
    /// `<timestamp>,<value>\n`, the line layout of both output files.
    pub fn to_line(&self) -> String {
        format!(
            "{},{}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.value
        )
    }
}
