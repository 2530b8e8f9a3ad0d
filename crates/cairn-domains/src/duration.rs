//! Duration strings of the form `30s`, `5m`, `1h30m` or `250ms`.

use std::time::Duration;

/// Parse a duration string. A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in '{input}'"))?;
        if digits == 0 {
            return Err(format!("expected a number in '{input}'"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("invalid number in '{input}': {e}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            unit => return Err(format!("unknown unit '{unit}' in '{input}'")),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("duration out of range: '{input}'"))?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}
