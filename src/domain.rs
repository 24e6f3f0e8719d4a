//! Core tagged-variant types: user-selected `Mode`, engine-commanded
//! `State`, `WeekDay`, and the validated `SetpointRange`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_derive::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::temperature::Temperature;

pub fn min_temperature() -> Temperature {
    Temperature::from_decimal(Decimal::ZERO)
}

pub fn max_temperature() -> Temperature {
    Temperature::from_decimal(Decimal::from(35))
}

/// User-selected operating mode. Restricts which `State` transitions the
/// control loop may command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Off,
    Auto,
    Heat,
    Cool,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Off => "off",
            Mode::Auto => "auto",
            Mode::Heat => "heat",
            Mode::Cool => "cool",
        }
    }

    /// `toggle_mode`: cycles Auto -> Heat -> Cool -> Auto. `Off` is left
    /// untouched — power is a separate axis (`toggle_power`).
    pub fn cycle(self) -> Mode {
        match self {
            Mode::Auto => Mode::Heat,
            Mode::Heat => Mode::Cool,
            Mode::Cool => Mode::Auto,
            Mode::Off => Mode::Off,
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Mode::Off),
            "auto" => Ok(Mode::Auto),
            "heat" => Ok(Mode::Heat),
            "cool" => Ok(Mode::Cool),
            other => Err(ValidationError::UnknownUnit(other.to_string())),
        }
    }
}

/// Engine-commanded HVAC state. Drives relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Idle,
    Heat,
    Cool,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Heat => "heat",
            State::Cool => "cool",
        }
    }
}

/// Monday..Sunday with a canonical integer 0..6, matching
/// `chrono::Weekday::num_days_from_monday`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl WeekDay {
    pub const ALL: [WeekDay; 7] = [
        WeekDay::Monday,
        WeekDay::Tuesday,
        WeekDay::Wednesday,
        WeekDay::Thursday,
        WeekDay::Friday,
        WeekDay::Saturday,
        WeekDay::Sunday,
    ];

    pub fn from_chrono(weekday: chrono::Weekday) -> Self {
        Self::ALL[weekday.num_days_from_monday() as usize]
    }

    pub fn as_index(&self) -> u8 {
        Self::ALL.iter().position(|d| d == self).unwrap() as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WeekDay::Monday => "monday",
            WeekDay::Tuesday => "tuesday",
            WeekDay::Wednesday => "wednesday",
            WeekDay::Thursday => "thursday",
            WeekDay::Friday => "friday",
            WeekDay::Saturday => "saturday",
            WeekDay::Sunday => "sunday",
        }
    }
}

/// An ordered pair `(low, high)` with the invariant `MIN <= low <= high
/// <= MAX` enforced at construction — the single chokepoint every
/// mutator must go through.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetpointRange {
    low: Temperature,
    high: Temperature,
}

impl SetpointRange {
    pub fn new(low: Temperature, high: Temperature) -> Result<Self, ValidationError> {
        if low < min_temperature() {
            return Err(ValidationError::BelowMinimum {
                value: low.to_string(),
                min: min_temperature().to_string(),
            });
        }
        if high > max_temperature() {
            return Err(ValidationError::AboveMaximum {
                value: high.to_string(),
                max: max_temperature().to_string(),
            });
        }
        if high < low {
            return Err(ValidationError::InvertedRange {
                low: low.to_string(),
                high: high.to_string(),
            });
        }
        Ok(SetpointRange { low, high })
    }

    pub fn low(&self) -> Temperature {
        self.low
    }

    pub fn high(&self) -> Temperature {
        self.high
    }

    /// Target temperature biased toward the ceiling:
    /// `(low+high)/2 + (high-low)/4`.
    pub fn equilibrium(&self) -> Temperature {
        let midpoint = (self.low.as_decimal() + self.high.as_decimal()) / Decimal::from(2);
        let bias = (self.high.as_decimal() - self.low.as_decimal()) / Decimal::from(4);
        Temperature::from_decimal(midpoint + bias)
    }
}

impl Default for SetpointRange {
    fn default() -> Self {
        SetpointRange {
            low: min_temperature(),
            high: min_temperature(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn t(v: rust_decimal::Decimal) -> Temperature {
        Temperature::from_decimal(v)
    }

    #[test]
    fn equilibrium_is_biased_toward_high() {
        let range = SetpointRange::new(t(dec!(20)), t(dec!(22))).unwrap();
        assert_eq!(range.equilibrium().as_decimal(), dec!(21.5));
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(SetpointRange::new(t(dec!(22)), t(dec!(20))).is_err());
    }

    #[test]
    fn rejects_out_of_bounds() {
        assert!(SetpointRange::new(t(dec!(-1)), t(dec!(20))).is_err());
        assert!(SetpointRange::new(t(dec!(10)), t(dec!(36))).is_err());
    }

    #[test]
    fn mode_cycle_skips_off() {
        assert_eq!(Mode::Auto.cycle(), Mode::Heat);
        assert_eq!(Mode::Heat.cycle(), Mode::Cool);
        assert_eq!(Mode::Cool.cycle(), Mode::Auto);
        assert_eq!(Mode::Off.cycle(), Mode::Off);
    }

    #[test]
    fn weekday_index_matches_chrono() {
        assert_eq!(WeekDay::Monday.as_index(), 0);
        assert_eq!(WeekDay::Sunday.as_index(), 6);
    }
}
