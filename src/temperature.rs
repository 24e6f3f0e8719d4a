//! Fixed-precision decimal temperature type.
//!
//! All user-facing temperature arithmetic goes through this type instead
//! of binary floating point, per the source's own rule: construct from a
//! string (or an integer millicelsius reading), never from an `f64`.

use std::fmt;
use std::ops::{Add, Div, Sub};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 9 significant digits, half-up rounding. The sensor sentinel used
/// throughout the control loop when a reading is unavailable.
pub fn sensor_sentinel() -> Temperature {
    Temperature(Decimal::from(-1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Temperature(Decimal);

// Serialized as a JSON string, not a number: the crate's `rust_decimal`
// dependency carries the `serde-float` feature for other callers, but a
// temperature must round-trip through settings/history JSON without ever
// passing through a binary float.
impl Serialize for Temperature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Temperature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Decimal::from_str(&raw).map(Temperature).map_err(DeError::custom)
    }
}

impl Temperature {
    pub fn from_decimal(value: Decimal) -> Self {
        Temperature(value)
    }

    /// Parse from a decimal string. Never go through `f64`, so exact
    /// decimal values survive round-tripping through JSON untouched.
    pub fn parse(value: &str) -> Result<Self, rust_decimal::Error> {
        Decimal::from_str(value).map(Temperature)
    }

    /// Convert a raw 1-wire millicelsius integer, dividing by 1000
    /// through the decimal type rather than a binary float.
    pub fn from_millicelsius(milli: i64) -> Self {
        Temperature(Decimal::new(milli, 3))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Round to the nearest whole degree, half-up. Used for outbound
    /// `temperature_data` payloads, which publish rounded integers.
    pub fn round_to_integer(&self) -> i64 {
        self.0
            .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
            .to_string()
            .parse()
            .unwrap_or(0)
    }

    pub fn is_sentinel(&self) -> bool {
        *self == sensor_sentinel()
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Temperature {
    type Output = Temperature;
    fn add(self, rhs: Temperature) -> Temperature {
        Temperature(self.0 + rhs.0)
    }
}

impl Sub for Temperature {
    type Output = Temperature;
    fn sub(self, rhs: Temperature) -> Temperature {
        Temperature(self.0 - rhs.0)
    }
}

impl Div for Temperature {
    type Output = Decimal;
    fn div(self, rhs: Temperature) -> Decimal {
        self.0 / rhs.0
    }
}

impl From<Decimal> for Temperature {
    fn from(value: Decimal) -> Self {
        Temperature(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn from_millicelsius_divides_exactly() {
        let t = Temperature::from_millicelsius(21562);
        assert_eq!(t.as_decimal(), dec!(21.562));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Temperature::parse("not-a-number").is_err());
    }

    #[test]
    fn round_to_integer_is_half_up() {
        assert_eq!(Temperature::from_decimal(dec!(21.5)).round_to_integer(), 22);
        assert_eq!(Temperature::from_decimal(dec!(-21.5)).round_to_integer(), -22);
        assert_eq!(Temperature::from_decimal(dec!(21.4)).round_to_integer(), 21);
    }

    #[test]
    fn sentinel_is_out_of_range() {
        assert!(sensor_sentinel().is_sentinel());
        assert!(sensor_sentinel() < Temperature::from_decimal(Decimal::ZERO));
    }
}
