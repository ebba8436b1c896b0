//! Season labels ("WINTER 2020") derived from partial dates

use chrono::{DateTime, Datelike};

use crate::types::UNKNOWN;

/// Label a broadcast season from a year and an optional month.
///
/// A known year with no month is labelled WINTER; there is no way to tell the
/// real season in that case and the first quarter is used.
pub fn season_label(year: Option<i32>, month: Option<u32>) -> String {
    let Some(year) = year else {
        return UNKNOWN.to_string();
    };

    let season = match month {
        Some(1..=3) | None => "WINTER",
        Some(4..=6) => "SPRING",
        Some(7..=9) => "SUMMER",
        Some(10..=12) => "FALL",
        // Out-of-range months still get a year-bearing label
        Some(_) => "WINTER",
    };
    format!("{} {}", season, year)
}

/// Label from explicit season/year fields, falling back to a start date.
///
/// The season name is upper-cased ("winter" from one source, "WINTER" from the other).
pub fn season_or_fallback(
    season: Option<&str>,
    year: Option<i32>,
    start_year: Option<i32>,
    start_month: Option<u32>,
) -> String {
    match (season.map(str::trim).filter(|s| !s.is_empty()), year) {
        (Some(season), Some(year)) => format!("{} {}", season.to_uppercase(), year),
        _ => season_label(start_year, start_month),
    }
}

/// Year and month of an RFC 3339 timestamp such as "2020-01-10T00:00:00+00:00"
pub fn year_month_of(timestamp: &str) -> (Option<i32>, Option<u32>) {
    match DateTime::parse_from_rfc3339(timestamp.trim()) {
        Ok(date) => (Some(date.year()), Some(date.month())),
        Err(_) => (None, None),
    }
}
