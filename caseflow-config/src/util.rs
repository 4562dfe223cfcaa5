use std::time::Duration;

/// Parse a boolean value from a raw string, accepting common env-style forms.
///
/// Accepted truthy values (case-insensitive): `"1"`, `"true"`, `"yes"`, `"on"`.
/// Accepted falsy values: `"0"`, `"false"`, `"no"`, `"off"`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_bool_var(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|raw| parse_bool(&raw))
}

pub fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Durations accept humantime forms (`"90s"`, `"5m"`, `"1h 30m"`) as well as
/// a bare integer number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    let trimmed = raw.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_forms() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn duration_forms() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(
            parse_duration("1h 30m").unwrap(),
            Duration::from_secs(5400)
        );
        assert!(parse_duration("soon").is_err());
    }
}
