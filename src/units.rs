//! Fixed-point token amounts.
//!
//! Every balance in the bank is an integer count of base units. A token with
//! `decimals = 18` has `10^18` base units per whole token, so `100` tokens are
//! stored as `100 * 10^18`. Reward arithmetic is done on base units only;
//! [`parse_units`] and [`format_units`] exist for the human-facing edges.

pub type Amount = u128;

pub const DECIMALS: u8 = 18;
pub const UNIT: Amount = 1_000_000_000_000_000_000; // 1 token = 1e18 base units

/// Largest `decimals` value whose scale still fits in an [`Amount`].
pub const MAX_DECIMALS: u8 = 38;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount {0:?}")]
    InvalidDigit(String),
    #[error("amount {value:?} has more than {decimals} fractional digits")]
    TooPrecise { value: String, decimals: u8 },
    #[error("amount {0:?} does not fit in 128 bits")]
    Overflow(String),
    #[error("unsupported decimals {0}")]
    UnsupportedDecimals(u8),
}

/// `10^decimals`.
pub fn scale(decimals: u8) -> Result<Amount, UnitsError> {
    if decimals > MAX_DECIMALS {
        return Err(UnitsError::UnsupportedDecimals(decimals));
    }
    Ok(10u128.pow(decimals as u32))
}

/// Parses a decimal token amount ("100", "0.25", "11.111111111111111111")
/// into base units.
pub fn parse_units(value: &str, decimals: u8) -> Result<Amount, UnitsError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::InvalidDigit(value.to_string()));
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) {
        return Err(UnitsError::InvalidDigit(value.to_string()));
    }
    if frac.len() > decimals as usize {
        return Err(UnitsError::TooPrecise {
            value: value.to_string(),
            decimals,
        });
    }

    let overflow = || UnitsError::Overflow(value.to_string());
    let unit = scale(decimals)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<Amount>().map_err(|_| overflow())?
    };
    let frac_units = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = decimals as usize);
        padded.parse::<Amount>().map_err(|_| overflow())?
    };
    whole_units
        .checked_mul(unit)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Formats base units as a decimal token amount, trimming trailing zeros.
pub fn format_units(amount: Amount, decimals: u8) -> String {
    let Ok(unit) = scale(decimals) else {
        return amount.to_string();
    };
    let whole = amount / unit;
    let frac = amount % unit;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0>width$}", width = decimals as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Whole tokens to base units at [`DECIMALS`].
pub const fn tokens(n: u64) -> Amount {
    n as Amount * UNIT
}

/// Serializes amounts as decimal strings of base units.
pub mod serde_amount {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse::<Amount>().map_err(D::Error::custom)
    }
}

/// Same as [`serde_amount`] for every value of a string-keyed map.
pub mod serde_amount_map {
    use std::collections::BTreeMap;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S>(map: &BTreeMap<String, Amount>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(map.iter().map(|(k, v)| (k, v.to_string())))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Amount>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| {
                v.parse::<Amount>()
                    .map(|amount| (k, amount))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_tokens() {
        assert_eq!(parse_units("100", 18).unwrap(), tokens(100));
        assert_eq!(parse_units("0.5", 18).unwrap(), UNIT / 2);
        assert_eq!(parse_units(".5", 18).unwrap(), UNIT / 2);
        assert_eq!(parse_units("1.", 18).unwrap(), UNIT);
        assert_eq!(parse_units("42", 0).unwrap(), 42);
        assert_eq!(
            parse_units("11.111111111111111111", 18).unwrap(),
            11_111_111_111_111_111_111
        );
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert_eq!(parse_units("  ", 18), Err(UnitsError::Empty));
        assert!(matches!(
            parse_units("-1", 18),
            Err(UnitsError::InvalidDigit(_))
        ));
        assert!(matches!(
            parse_units("1e5", 18),
            Err(UnitsError::InvalidDigit(_))
        ));
        assert!(matches!(
            parse_units(".", 18),
            Err(UnitsError::InvalidDigit(_))
        ));
        assert!(matches!(
            parse_units("0.001", 2),
            Err(UnitsError::TooPrecise { decimals: 2, .. })
        ));
        assert!(matches!(
            parse_units("999999999999999999999999", 18),
            Err(UnitsError::Overflow(_))
        ));
    }

    #[test]
    fn formats_with_trimmed_fraction() {
        assert_eq!(format_units(tokens(100), 18), "100");
        assert_eq!(format_units(0, 18), "0");
        assert_eq!(format_units(UNIT / 4, 18), "0.25");
        assert_eq!(
            format_units(tokens(100) / 9, 18),
            "11.111111111111111111"
        );
        assert_eq!(format_units(1, 18), "0.000000000000000001");
    }

    #[test]
    fn amounts_serialize_as_strings() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Wrapper {
            #[serde(with = "serde_amount")]
            amount: Amount,
        }
        let json = serde_json::to_string(&Wrapper { amount: tokens(1_000_000) }).unwrap();
        assert_eq!(json, r#"{"amount":"1000000000000000000000000"}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.amount, tokens(1_000_000));
    }
}
