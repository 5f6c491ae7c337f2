//! Recording filename parsing.
//!
//! The decoder names per-call files like
//! `20251113_200214_26522_DMR_CC_3_GROUP_TGT_1_SRC_1.wav`: a date stamp,
//! a time stamp, then call metadata with the source radio ID last.

use chrono::NaiveTime;

/// Fields derived from a recording filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    /// 8-digit `YYYYMMDD` date key
    pub date_key: String,
    /// Human-readable time of day, or the raw filename when unparseable
    pub time_display: String,
    /// Source radio unit ID, when the trailing segment is numeric
    pub unit_id: Option<u32>,
}

impl ParsedFilename {
    /// Parse a filename, requiring a valid date key.
    ///
    /// Returns `None` on any validation failure, never a partial result.
    pub fn parse(filename: &str) -> Option<Self> {
        let date_key = parse_date_key(filename)?;
        Some(Self {
            date_key,
            time_display: parse_time_display(filename),
            unit_id: unit_id(filename),
        })
    }
}

/// Extract and validate the `YYYYMMDD` date key.
///
/// The stamp is everything before the first `_` and must be exactly 8
/// digits with year in [2000, 2100], month in [1, 12], day in [1, 31].
pub fn parse_date_key(filename: &str) -> Option<String> {
    let (stamp, _) = filename.split_once('_')?;

    if stamp.len() != 8 || !stamp.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let year: u32 = stamp[..4].parse().ok()?;
    let month: u32 = stamp[4..6].parse().ok()?;
    let day: u32 = stamp[6..8].parse().ok()?;

    if !(2000..=2100).contains(&year) {
        return None;
    }
    if !(1..=12).contains(&month) {
        return None;
    }
    if !(1..=31).contains(&day) {
        return None;
    }

    Some(stamp.to_string())
}

/// Format the time stamp as a 12-hour clock string.
///
/// Handles both the 6-digit `HHMMSS` form and the 5-digit form produced
/// when a leading zero is dropped. Falls back to the raw filename.
pub fn parse_time_display(filename: &str) -> String {
    let Some(time_str) = filename.split('_').nth(1) else {
        return filename.to_string();
    };
    if !time_str.chars().all(|c| c.is_ascii_digit()) {
        return filename.to_string();
    }

    let parsed = match time_str.len() {
        6 => (
            time_str[..2].parse::<u32>(),
            time_str[2..4].parse::<u32>(),
            time_str[4..6].parse::<u32>(),
        ),
        5 => (
            time_str[..1].parse::<u32>(),
            time_str[1..3].parse::<u32>(),
            time_str[3..5].parse::<u32>(),
        ),
        _ => return filename.to_string(),
    };

    let (Ok(hours), Ok(minutes), Ok(seconds)) = parsed else {
        return filename.to_string();
    };

    match NaiveTime::from_hms_opt(hours, minutes, seconds) {
        Some(time) => time.format("%I:%M:%S %p").to_string(),
        None => filename.to_string(),
    }
}

/// Extract the source radio unit ID from the trailing `_<digits>` segment
pub fn unit_id(filename: &str) -> Option<u32> {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    let last = stem.rsplit('_').next()?;
    last.parse().ok()
}

/// Format a date key as `YYYY/MM/DD` for display
pub fn format_date_display(date_key: &str) -> String {
    if date_key.len() == 8 {
        format!("{}/{}/{}", &date_key[..4], &date_key[4..6], &date_key[6..])
    } else {
        date_key.to_string()
    }
}
