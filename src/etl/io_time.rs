use once_cell::sync::Lazy;
use regex::Regex;

use crate::etl::io_common::{cell_text, Sheet};
use crate::etl::*;

static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})-(\d{2})-(\d{2})\s+(\d{2}):(\d{2}):(\d{2})").expect("Invalid regex")
});

/// Reads the report time from the first cell of the sheet.
pub fn extract_time(sheet: &Sheet) -> TimeRecord {
    let first_cell = cell_text(sheet.cell(0, 0)).unwrap_or_default();
    debug!("extract_time: first cell: {:?}", first_cell);
    parse_timestamp(&first_cell)
}

/// Looks for a `YYYY-MM-DD HH:MM:SS` timestamp anywhere in the text. The
/// seconds are ignored. Text without a timestamp gives the fallback time.
pub fn parse_timestamp(text: &str) -> TimeRecord {
    let caps = match TIMESTAMP_RE.captures(text) {
        Some(caps) => caps,
        None => {
            warn!("No timestamp found in {:?}, using the fallback time", text);
            return TimeRecord::FALLBACK;
        }
    };
    // The groups are made of digits only and are at most 4 characters long.
    let num = |idx: usize| -> u32 {
        caps.get(idx)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0)
    };
    TimeRecord {
        year: num(1) as i32,
        month: Month::from_number(num(2)),
        day: num(3),
        hour: num(4),
        minute: num(5),
    }
}
