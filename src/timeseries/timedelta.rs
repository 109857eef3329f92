//! Duration expressions such as `"1hr30m"`, `"5m"` or `"2.5s"`

use regex::Regex;

const USEC_PER_SEC: f64 = 1_000_000.0;

/// Parse a duration expression into microseconds
///
/// Accepts any combination of `<n>hr`, `<n>m` and `<n>s` in that order,
/// with optional fractional parts. A bare integer is taken as microseconds.
/// Returns `None` for an empty or unrecognized expression.
pub fn parse_timedelta(expr: &str) -> Option<i64> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }
    if let Ok(usecs) = expr.parse::<i64>() {
        return Some(usecs);
    }

    let re = Regex::new(
        r"^(?:(?P<hours>\d*\.?\d+)hr)?(?:(?P<minutes>\d*\.?\d+)m)?(?:(?P<seconds>\d*\.?\d+)s)?$",
    )
    .ok()?;
    let caps = re.captures(expr)?;

    let mut seconds = 0.0;
    let mut matched = false;
    for (name, scale) in [("hours", 3600.0), ("minutes", 60.0), ("seconds", 1.0)] {
        if let Some(part) = caps.name(name) {
            seconds += part.as_str().parse::<f64>().ok()? * scale;
            matched = true;
        }
    }

    if !matched {
        return None;
    }
    Some((seconds * USEC_PER_SEC).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(parse_timedelta("30s"), Some(30_000_000));
        assert_eq!(parse_timedelta("5m"), Some(300_000_000));
        assert_eq!(parse_timedelta("2hr"), Some(7_200_000_000));
    }

    #[test]
    fn test_fractions_and_combinations() {
        assert_eq!(parse_timedelta("1.5hr"), Some(5_400_000_000));
        assert_eq!(parse_timedelta("1hr30m"), Some(5_400_000_000));
        assert_eq!(parse_timedelta("1m0.5s"), Some(60_500_000));
        assert_eq!(parse_timedelta(".25s"), Some(250_000));
    }

    #[test]
    fn test_plain_integer_is_microseconds() {
        assert_eq!(parse_timedelta("1500"), Some(1500));
    }

    #[test]
    fn test_invalid() {
        assert_eq!(parse_timedelta(""), None);
        assert_eq!(parse_timedelta("soon"), None);
        assert_eq!(parse_timedelta("5x"), None);
        assert_eq!(parse_timedelta("30s5m"), None);
    }
}
