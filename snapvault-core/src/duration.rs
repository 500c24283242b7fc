use crate::error::{Error, Result};
use chrono::Duration;

/// Parse `<number><unit>` with unit one of `m` (minutes), `h`, `d`, `w`, or
/// `M` (30 days).
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let invalid = || Error::InvalidDuration(input.to_string());

    let unit = input.chars().last().ok_or_else(invalid)?;
    let digits = &input[..input.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: i64 = digits.parse().map_err(|_| invalid())?;

    let duration = match unit {
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        'w' => Duration::try_weeks(amount),
        'M' => amount.checked_mul(30).and_then(Duration::try_days),
        _ => None,
    };
    duration.ok_or_else(invalid)
}

/// Whether `input` has the shape of a duration, without checking overflow.
pub fn looks_like_duration(input: &str) -> bool {
    let Some(unit) = input.chars().last() else {
        return false;
    };
    let digits = &input[..input.len() - unit.len_utf8()];
    matches!(unit, 'm' | 'h' | 'd' | 'w' | 'M')
        && !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
}
