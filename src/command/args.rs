//! Argument decoding shared by the command families.

use std::time::Duration;

use crate::error::{
    CommandError, INVALID_MIN_MAX_FLOAT, INVALID_MIN_MAX_STR, TIMEOUT_NEGATIVE, TIMEOUT_NOT_FLOAT,
    TIMEOUT_OUT_OF_RANGE,
};
use crate::storage::ScanOptions;
use crate::zset::{LexBound, ScoreBound};

/// Strict integer: canonical decimal only (no `+`, no leading zeros, no
/// whitespace, no `-0`).
pub fn parse_int(arg: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(arg).ok()?;
    let n: i64 = text.parse().ok()?;
    if n.to_string() == text {
        Some(n)
    } else {
        None
    }
}

pub fn int(arg: &[u8]) -> Result<i64, CommandError> {
    parse_int(arg).ok_or_else(CommandError::invalid_int)
}

/// Non-negative integer, reported with `err` when out of range.
pub fn non_negative(arg: &[u8], err: &str) -> Result<usize, CommandError> {
    match parse_int(arg) {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(CommandError::malformed(err)),
    }
}

/// Strict float: NaN is rejected, as is anything that only parses by
/// overflowing to infinity or underflowing to zero. `inf`, `+inf` and
/// `-inf` are accepted.
pub fn parse_float(arg: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(arg).ok()?;
    if text.is_empty() || text.trim() != text {
        return None;
    }
    let value: f64 = text.parse().ok()?;
    if value.is_nan() {
        return None;
    }
    // 1e999 / 1e-999
    if (value.is_infinite() || value == 0.0) && has_significant_digit(text) {
        return None;
    }
    Some(value)
}

/// True if a non-zero digit appears before any letter.
fn has_significant_digit(text: &str) -> bool {
    for b in text.bytes() {
        if b.is_ascii_alphabetic() {
            return false;
        }
        if (b'1'..=b'9').contains(&b) {
            return true;
        }
    }
    false
}

pub fn float(arg: &[u8]) -> Result<f64, CommandError> {
    parse_float(arg).ok_or_else(CommandError::invalid_float)
}

/// Reply formatting of a float: integers without a fraction, `inf`/`-inf`,
/// otherwise the shortest representation that round-trips.
pub fn format_float(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if value == value.trunc() && value.abs() < 1e17 {
        return format!("{}", value as i64);
    }
    format!("{}", value)
}

pub fn float_bytes(value: f64) -> Vec<u8> {
    format_float(value).into_bytes()
}

/// `1.5`, `(1.5`, `-inf`, `+inf`.
pub fn score_bound(arg: &[u8]) -> Result<ScoreBound, CommandError> {
    let (exclusive, rest) = match arg.split_first() {
        Some((b'(', rest)) => (true, rest),
        _ => (false, arg),
    };
    let bad = || CommandError::malformed(INVALID_MIN_MAX_FLOAT);
    let text = std::str::from_utf8(rest).map_err(|_| bad())?;
    let value: f64 = text.trim_start().parse().map_err(|_| bad())?;
    if value.is_nan() {
        return Err(bad());
    }
    Ok(ScoreBound { value, exclusive })
}

/// `-`, `+`, `[member`, `(member`.
pub fn lex_bound(arg: &[u8]) -> Result<LexBound, CommandError> {
    match arg.split_first() {
        Some((b'-', [])) => Ok(LexBound::NegInf),
        Some((b'+', [])) => Ok(LexBound::PosInf),
        Some((b'[', rest)) => Ok(LexBound::Inclusive(rest.to_vec())),
        Some((b'(', rest)) => Ok(LexBound::Exclusive(rest.to_vec())),
        _ => Err(CommandError::malformed(INVALID_MIN_MAX_STR)),
    }
}

/// Blocking timeout in seconds; `0` waits forever.
pub fn timeout(arg: &[u8]) -> Result<Option<Duration>, CommandError> {
    let secs = std::str::from_utf8(arg)
        .ok()
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandError::malformed(TIMEOUT_NOT_FLOAT))?;
    if secs < 0.0 {
        return Err(CommandError::malformed(TIMEOUT_NEGATIVE));
    }
    if secs == 0.0 {
        return Ok(None);
    }
    // 超时以毫秒计，必须放得进 i64
    if secs > (i64::MAX / 1000) as f64 {
        return Err(CommandError::malformed(TIMEOUT_OUT_OF_RANGE));
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| CommandError::malformed(TIMEOUT_OUT_OF_RANGE))
}

/// Case-insensitive keyword comparison.
pub fn is(arg: &[u8], keyword: &str) -> bool {
    arg.eq_ignore_ascii_case(keyword.as_bytes())
}

/// Redis list/zset range: negative indexes count from the end, the result
/// is a half-open `start..end` clamped to `len`.
pub fn fix_range(start: i64, end: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let end = if end < 0 { end + len } else { end };
    if start > end || start >= len {
        return (0, 0);
    }
    let end = end.min(len - 1);
    (start as usize, (end + 1) as usize)
}

/// GETRANGE/BITCOUNT flavour of [`fix_range`]: a negative end clamps to 0
/// instead of emptying the range.
pub fn fix_range_string(start: i64, end: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    if start < 0 && end < 0 && start > end {
        return (0, 0);
    }
    let start = if start < 0 { (start + len).max(0) } else { start };
    let end = if end < 0 { (end + len).max(0) } else { end };
    let end = end.min(len - 1) + 1;
    if start >= end {
        return (0, 0);
    }
    (start as usize, end as usize)
}

/// `[MATCH pattern] [COUNT n] [TYPE t]`; `allow_type` is false for the
/// per-key variants.
pub fn scan_options(args: &[Vec<u8>], allow_type: bool) -> Result<ScanOptions, CommandError> {
    let mut opts = ScanOptions::default();
    if args.len() % 2 != 0 {
        return Err(CommandError::syntax());
    }
    for pair in args.chunks(2) {
        let (name, value) = (&pair[0], &pair[1]);
        if is(name, "match") {
            opts.pattern = Some(value.clone());
        } else if is(name, "count") {
            let count = int(value)?;
            if count <= 0 {
                return Err(CommandError::syntax());
            }
            opts.count = count as usize;
        } else if allow_type && is(name, "type") {
            opts.type_filter = Some(value.clone());
        } else {
            return Err(CommandError::syntax());
        }
    }
    Ok(opts)
}

/// Cursor argument of the SCAN family.
pub fn cursor(arg: &[u8]) -> Result<usize, CommandError> {
    match parse_int(arg) {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(CommandError::malformed("ERR invalid cursor")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_must_be_canonical() {
        assert_eq!(parse_int(b"42"), Some(42));
        assert_eq!(parse_int(b"-7"), Some(-7));
        assert_eq!(parse_int(b"+7"), None);
        assert_eq!(parse_int(b"007"), None);
        assert_eq!(parse_int(b" 7"), None);
        assert_eq!(parse_int(b"-0"), None);
        assert_eq!(parse_int(b"9223372036854775808"), None);
    }

    #[test]
    fn floats_reject_nan_and_overflow() {
        assert_eq!(parse_float(b"1.5"), Some(1.5));
        assert_eq!(parse_float(b"-inf"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_float(b"+inf"), Some(f64::INFINITY));
        assert_eq!(parse_float(b"0e5"), Some(0.0));
        assert_eq!(parse_float(b"nan"), None);
        assert_eq!(parse_float(b"1e999"), None);
        assert_eq!(parse_float(b"1e-999"), None);
        assert_eq!(parse_float(b" 1"), None);
        assert_eq!(parse_float(b""), None);
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(3.0), "3");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn list_ranges() {
        assert_eq!(fix_range(0, -1, 5), (0, 5));
        assert_eq!(fix_range(-2, -1, 5), (3, 5));
        assert_eq!(fix_range(-100, 1, 5), (0, 2));
        assert_eq!(fix_range(3, 1, 5), (0, 0));
        assert_eq!(fix_range(5, 10, 5), (0, 0));
        assert_eq!(fix_range(0, -1, 0), (0, 0));
    }

    #[test]
    fn string_ranges() {
        assert_eq!(fix_range_string(0, -1, 5), (0, 5));
        assert_eq!(fix_range_string(-3, -1, 5), (2, 5));
        assert_eq!(fix_range_string(-1, -3, 5), (0, 0));
        assert_eq!(fix_range_string(0, -100, 5), (0, 1));
        assert_eq!(fix_range_string(0, 10, 0), (0, 0));
    }

    #[test]
    fn bounds_and_timeouts() {
        assert_eq!(score_bound(b"(1.5").unwrap(), ScoreBound { value: 1.5, exclusive: true });
        assert!(score_bound(b"abc").is_err());
        assert_eq!(lex_bound(b"[a").unwrap(), LexBound::Inclusive(b"a".to_vec()));
        assert!(lex_bound(b"a").is_err());
        assert_eq!(timeout(b"0").unwrap(), None);
        assert_eq!(timeout(b"0.5").unwrap(), Some(Duration::from_millis(500)));
        assert_eq!(timeout(b"-1").unwrap_err().to_string(), TIMEOUT_NEGATIVE);
        assert_eq!(timeout(b"x").unwrap_err().to_string(), TIMEOUT_NOT_FLOAT);
        assert_eq!(timeout(b"inf").unwrap_err().to_string(), TIMEOUT_NOT_FLOAT);
        assert_eq!(timeout(b"1e300").unwrap_err().to_string(), TIMEOUT_OUT_OF_RANGE);
        let tiny = timeout(b"0.0001").unwrap().unwrap();
        assert!(tiny > Duration::ZERO && tiny < Duration::from_millis(1));
    }

    #[test]
    fn scan_option_pairs() {
        let args = vec![b"MATCH".to_vec(), b"k*".to_vec(), b"count".to_vec(), b"3".to_vec()];
        let opts = scan_options(&args, false).unwrap();
        assert_eq!(opts.count, 3);
        assert_eq!(opts.pattern.as_deref(), Some(&b"k*"[..]));
        assert!(scan_options(&[b"count".to_vec(), b"0".to_vec()], false).is_err());
        assert!(scan_options(&[b"type".to_vec(), b"list".to_vec()], false).is_err());
        assert!(scan_options(&[b"match".to_vec()], true).is_err());
    }
}
