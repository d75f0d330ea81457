//! Date cells to elapsed seconds
//!
//! DATE variables are held as seconds elapsed since the SPSS epoch
//! (1582-10-14 00:00:00), so ranges, sorting and arithmetic work on
//! plain floats.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Start of the Gregorian calendar, origin of every stored date.
pub const SPSS_EPOCH: (i32, u32, u32) = (1582, 10, 14);

const DATE_FORMATS: [&str; 5] = ["%d-%m-%Y", "%m/%d/%Y", "%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

fn epoch() -> Option<NaiveDateTime> {
    let (y, m, d) = SPSS_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d).and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Parse a date (optionally followed by a time) into seconds since the epoch.
///
/// Returns `None` for anything that does not match a known layout.
pub fn date_to_seconds(input: &str) -> Option<f64> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let origin = epoch()?;

    let (date_part, time_part) = match input.split_once(' ') {
        Some((d, t)) => (d.trim(), Some(t.trim())),
        None => (input, None),
    };

    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())?;

    let time = match time_part {
        Some(t) if !t.is_empty() => TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(t, fmt).ok())?,
        _ => NaiveTime::MIN,
    };

    let elapsed = date.and_time(time) - origin;
    Some(elapsed.num_seconds() as f64)
}

/// Format seconds since the epoch as `dd-mm-yyyy`, with the time appended
/// when it is not midnight.
pub fn seconds_to_date_string(seconds: f64) -> String {
    let Some(origin) = epoch() else {
        return seconds.to_string();
    };
    if !seconds.is_finite() {
        return String::new();
    }
    let Some(dt) = origin.checked_add_signed(Duration::seconds(seconds.round() as i64)) else {
        return seconds.to_string();
    };
    if dt.time() == NaiveTime::MIN {
        dt.format("%d-%m-%Y").to_string()
    } else {
        dt.format("%d-%m-%Y %H:%M:%S").to_string()
    }
}
