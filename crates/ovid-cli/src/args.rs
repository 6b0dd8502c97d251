//! Flag-value parsing: sizes with binary units, operation ratios, and
//! durations.

use std::time::Duration;

use ovid_core::error::{Error, Result};

/// Parses a size flag: a single size like `"8k"` or a `"min-max"` range.
/// Units `k`, `m`, `g`; a bare number is bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on malformed input or an inverted
/// range.
pub fn parse_size(value: &str) -> Result<(usize, usize)> {
    let value = value.to_ascii_lowercase();
    let (min_str, max_str) = match value.split_once('-') {
        Some((min, max)) => (min, max),
        None => (value.as_str(), value.as_str()),
    };
    let min = parse_size_unit(min_str)?;
    let max = parse_size_unit(max_str)?;
    if min > max {
        return Err(Error::InvalidInput(format!(
            "max size must not be below min size: {value}"
        )));
    }
    Ok((min, max))
}

/// Parses a multipart threshold with the same unit grammar as sizes.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on malformed input.
pub fn parse_multipart_thresh(value: &str) -> Result<usize> {
    parse_size_unit(&value.to_ascii_lowercase())
}

/// Parses one size term: decimal digits without a leading zero, followed
/// by an optional `k`/`m`/`g` unit.
fn parse_size_unit(value: &str) -> Result<usize> {
    let illegal = || Error::InvalidInput(format!("illegal size format: {value}"));

    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        None => (value, 1usize),
        Some(pos) => {
            let unit = match &value[pos..] {
                "k" => 1usize << 10,
                "m" => 1 << 20,
                "g" => 1 << 30,
                _ => return Err(illegal()),
            };
            (&value[..pos], unit)
        }
    };
    if digits.is_empty() || digits.starts_with('0') {
        return Err(illegal());
    }
    let base: usize = digits.parse().map_err(|_| illegal())?;
    base.checked_mul(unit).ok_or_else(illegal)
}

/// Parses the operation ratio: four comma-separated non-negative integer
/// weights, normalized to fractions.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] unless there are exactly four weights
/// with a positive sum.
pub fn parse_ope_ratio(value: &str) -> Result<Vec<f64>> {
    let weights = value
        .split(',')
        .map(|term| {
            term.trim()
                .parse::<u64>()
                .map_err(|_| Error::InvalidInput(format!("invalid operation ratio: {value}")))
        })
        .collect::<Result<Vec<u64>>>()?;
    if weights.len() != 4 {
        return Err(Error::InvalidInput(format!(
            "operation ratio needs 4 weights (put,get,delete,list): {value}"
        )));
    }
    #[allow(clippy::cast_precision_loss)]
    let sum: f64 = weights.iter().map(|w| *w as f64).sum();
    if sum <= 0.0 {
        return Err(Error::InvalidInput(format!(
            "operation ratio weights must not all be zero: {value}"
        )));
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = weights.iter().map(|w| *w as f64 / sum).collect();
    Ok(ratio)
}

/// Parses a duration flag: `"0"` for infinity, otherwise a number with a
/// `ms`, `s`, `m`, or `h` unit.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on malformed input.
pub fn parse_duration(value: &str) -> Result<Duration> {
    if value == "0" {
        return Ok(Duration::ZERO);
    }
    let illegal = || Error::InvalidInput(format!("illegal duration format: {value}"));

    let pos = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(illegal)?;
    let base: u64 = value[..pos].parse().map_err(|_| illegal())?;
    let duration = match &value[pos..] {
        "ms" => Duration::from_millis(base),
        "s" => Duration::from_secs(base),
        "m" => Duration::from_secs(base * 60),
        "h" => Duration::from_secs(base * 3600),
        _ => return Err(illegal()),
    };
    Ok(duration)
}
