use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of fractional digits carried by [`Amount`].
pub const DECIMALS: u32 = 8;

/// Base units per whole coin.
pub const UNIT: u64 = 10u64.pow(DECIMALS);

/// Non-negative fixed-point amount with eight decimal places.
///
/// Always rendered with all eight digits (`"10.00000000"`) so that the
/// serialized form, and therefore every hash over it, is stable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    pub fn from_coins(coins: u64) -> Option<Self> {
        coins.checked_mul(UNIT).map(Self)
    }

    pub const fn units(&self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Sum amounts without overflow, or `None`.
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(iter: I) -> Option<Amount> {
        iter.into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / UNIT, self.0 % UNIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount {0:?}")]
pub struct ParseAmountError(String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAmountError(s.to_string());
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || frac.len() > DECIMALS as usize {
            return Err(err());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(err());
        }

        let whole: u64 = whole.parse().map_err(|_| err())?;
        let mut frac_units: u64 = 0;
        if !frac.is_empty() {
            let padded = format!("{frac:0<width$}", width = DECIMALS as usize);
            frac_units = padded.parse().map_err(|_| err())?;
        }

        whole
            .checked_mul(UNIT)
            .and_then(|w| w.checked_add(frac_units))
            .map(Amount)
            .ok_or_else(err)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_canonically() {
        let a: Amount = "10.0".parse().unwrap();
        assert_eq!(a, Amount::from_coins(10).unwrap());
        assert_eq!(a.to_string(), "10.00000000");

        let b: Amount = "0.5".parse().unwrap();
        assert_eq!(b.units(), UNIT / 2);
        assert_eq!("7".parse::<Amount>().unwrap().to_string(), "7.00000000");
        assert_eq!(
            "0.00000001".parse::<Amount>().unwrap(),
            Amount::from_units(1)
        );
    }

    #[test]
    fn rejects_bad_input() {
        for s in ["", ".5", "-1", "1.000000001", "1e3", "abc", "1.2.3"] {
            assert!(s.parse::<Amount>().is_err(), "{s} should not parse");
        }
    }

    #[test]
    fn checked_sum_detects_overflow() {
        let max = Amount::from_units(u64::MAX);
        assert_eq!(Amount::checked_sum([max, Amount::from_units(1)]), None);
        assert_eq!(
            Amount::checked_sum(["1.5".parse().unwrap(), "2.5".parse().unwrap()]),
            Some(Amount::from_coins(4).unwrap())
        );
    }

    #[test]
    fn serializes_as_string() {
        let a: Amount = "1.25".parse().unwrap();
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"1.25000000\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
