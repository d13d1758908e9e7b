use anyhow::{Context, Result, bail};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z.
pub const COCOA_EPOCH_OFFSET_SECONDS: f64 = 978_307_200.0;

const NANOS_PER_MILLI: i128 = 1_000_000;
const MILLIS_PER_SECOND: f64 = 1_000.0;
const RFC3339_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

#[must_use]
pub fn cocoa_to_unix(cocoa_seconds: f64) -> f64 {
    cocoa_seconds + COCOA_EPOCH_OFFSET_SECONDS
}

/// Rounds fractional seconds to whole milliseconds, the precision every
/// artifact carries.
#[must_use]
pub fn unix_seconds_to_millis(unix_seconds: f64) -> Option<i128> {
    if !unix_seconds.is_finite() {
        return None;
    }

    let millis = (unix_seconds * MILLIS_PER_SECOND).round();
    if millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(millis as i128)
}

/// `None` when the instant falls outside the years RFC 3339 can express.
#[must_use]
pub fn format_unix_seconds(unix_seconds: f64) -> Option<String> {
    let millis = unix_seconds_to_millis(unix_seconds)?;
    let nanos = millis.checked_mul(NANOS_PER_MILLI)?;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()?
        .to_offset(UtcOffset::UTC);
    if !RFC3339_YEARS.contains(&dt.year()) {
        return None;
    }
    Some(format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.millisecond()
    ))
}

pub fn parse_rfc3339_to_unix_millis(raw: &str) -> Result<i128> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        bail!("timestamp input is empty");
    }

    let parsed = OffsetDateTime::parse(candidate, &Rfc3339)
        .with_context(|| format!("timestamp is not RFC3339: {candidate}"))?;
    Ok(parsed.unix_timestamp_nanos() / NANOS_PER_MILLI)
}

pub fn now_utc_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format current UTC timestamp")
}
