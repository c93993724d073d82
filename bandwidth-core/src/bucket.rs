//! Month buckets.

use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;

/// Bucket label format. Zero-padded, so labels sort chronologically.
pub const MONTH_FORMAT: &str = "%Y-%m";

pub fn month_bucket<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    at.format(MONTH_FORMAT).to_string()
}

/// Bucket of the current local month
pub fn current_month() -> String {
    month_bucket(&Local::now())
}
