//! Duration parsing: either a bare millisecond count or a human string
//! `"<num><unit>"` with units `ms`, `s`, `m`, `h`, `d`, `w`.

use crate::error::CacheError;
use std::time::Duration;

/// Parse a duration literal. Accepts a plain non-negative integer
/// (milliseconds) or a string matching `^(\d+(\.\d+)?)\s*(ms|s|m|h|d|w)$`,
/// case-insensitively.
pub fn parse_duration(input: &str) -> Result<Duration, CacheError> {
    let trimmed = input.trim();

    if let Ok(ms) = trimmed.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let lower = trimmed.to_ascii_lowercase();
    let split_at = lower
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| i)
        .ok_or_else(|| CacheError::Config(format!("invalid duration: {input}")))?;

    let (number_part, unit_part) = lower.split_at(split_at);
    let number_part = number_part.trim();
    let unit_part = unit_part.trim();

    let value: f64 = number_part
        .parse()
        .map_err(|_| CacheError::Config(format!("invalid duration: {input}")))?;

    if value < 0.0 {
        return Err(CacheError::Config(format!("invalid duration: {input}")));
    }

    let ms_per_unit: f64 = match unit_part {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        "w" => 604_800_000.0,
        _ => return Err(CacheError::Config(format!("invalid duration: {input}"))),
    };

    Ok(Duration::from_millis((value * ms_per_unit).round() as u64))
}

/// Parse a millisecond count directly.
pub fn from_millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number_is_milliseconds() {
        assert_eq!(parse_duration("1500").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn units_parse() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(604_800));
    }

    #[test]
    fn case_insensitive_and_whitespace() {
        assert_eq!(parse_duration("5 S").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("5H").unwrap(), Duration::from_secs(18_000));
    }

    #[test]
    fn fractional_values() {
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("banana").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("-5s").is_err());
    }
}
