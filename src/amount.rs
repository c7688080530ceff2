//! Conversion between human decimal token amounts and fixed-point integer units.
//!
//! The decimal -> units direction is done purely on digit strings so amounts never pass
//! through `f64`. The units -> decimal direction produces an `f64` for display only.

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

/// Largest scale supported end to end; `Decimal` carries at most 28 fractional digits.
pub const MAX_DECIMALS: u32 = 28;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("'{0}' is not a decimal number")]
    NotNumeric(String),
    #[error("amount '{0}' does not fit in 128-bit units")]
    Overflow(String),
    #[error("unsupported decimal precision {0}")]
    Precision(u32),
}

fn pow_ten(decimals: u32) -> Result<i128, AmountError> {
    if decimals > MAX_DECIMALS {
        return Err(AmountError::Precision(decimals));
    }
    10_i128
        .checked_pow(decimals)
        .ok_or(AmountError::Precision(decimals))
}

/// Scales a decimal string into integer units with `decimals` fractional digits.
///
/// Fractional digits beyond `decimals` are truncated. The sign is kept on the result.
pub fn to_fixed_units(amount: &str, decimals: u32) -> Result<i128, AmountError> {
    pow_ten(decimals)?;

    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }

    let (negative, unsigned) = match trimmed.as_bytes()[0] {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (unsigned, ""),
    };

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(AmountError::NotNumeric(trimmed.to_string()));
    }

    let width = decimals as usize;
    let mut digits = String::with_capacity(int_part.len() + width);
    digits.push_str(if int_part.is_empty() { "0" } else { int_part });
    if frac_part.len() >= width {
        digits.push_str(&frac_part[..width]);
    } else {
        digits.push_str(frac_part);
        digits.extend(std::iter::repeat('0').take(width - frac_part.len()));
    }

    let magnitude: i128 = digits
        .parse()
        .map_err(|_| AmountError::Overflow(trimmed.to_string()))?;

    Ok(if negative { -magnitude } else { magnitude })
}

/// Same as [`to_fixed_units`] for a float input, formatted through its shortest decimal form.
pub fn to_fixed_units_f64(amount: f64, decimals: u32) -> Result<i128, AmountError> {
    if !amount.is_finite() {
        return Err(AmountError::NotNumeric(amount.to_string()));
    }
    to_fixed_units(&amount.to_string(), decimals)
}

/// Amount as a client sends it: a numeric string or a bare JSON number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(f64),
}

impl AmountInput {
    pub fn to_units(&self, decimals: u32) -> Result<i128, AmountError> {
        match self {
            AmountInput::Text(raw) => to_fixed_units(raw, decimals),
            AmountInput::Number(value) => to_fixed_units_f64(*value, decimals),
        }
    }
}

impl From<&str> for AmountInput {
    fn from(raw: &str) -> Self {
        AmountInput::Text(raw.to_string())
    }
}

/// Permissive variant for optional form fields: missing or malformed input becomes zero.
///
/// Callers opt into this explicitly; use [`to_fixed_units`] wherever a bad amount must be rejected.
pub fn to_fixed_units_or_zero(amount: Option<&str>, decimals: u32) -> i128 {
    match amount {
        Some(raw) => match to_fixed_units(raw, decimals) {
            Ok(units) => units,
            Err(err) => {
                tracing::debug!("Treating amount {:?} as zero: {}", raw, err);
                0
            }
        },
        None => 0,
    }
}

/// Converts integer units to a display float. `None` yields `0.0`.
pub fn to_decimal(units: Option<i128>, decimals: u32) -> f64 {
    let Some(units) = units else {
        return 0.0;
    };
    if decimals == 0 {
        return units as f64;
    }
    let Ok(scale) = pow_ten(decimals) else {
        return units as f64 / 10_f64.powi(decimals as i32);
    };

    let magnitude = units.unsigned_abs();
    let scale = scale as u128;
    let whole = magnitude / scale;
    let frac = magnitude % scale;
    let sign = if units < 0 { "-" } else { "" };
    let text = format!("{sign}{whole}.{frac:0width$}", width = decimals as usize);

    text.parse().unwrap_or(0.0)
}

/// Exact decimal form of integer units, for values that are forwarded rather than displayed.
pub fn to_decimal_exact(units: i128, decimals: u32) -> Result<Decimal, AmountError> {
    if decimals > MAX_DECIMALS {
        return Err(AmountError::Precision(decimals));
    }
    Decimal::try_from_i128_with_scale(units, decimals)
        .map_err(|_| AmountError::Overflow(units.to_string()))
}
