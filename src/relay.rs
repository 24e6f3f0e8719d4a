//! GPIO relay actuator: drives the fan/heat/cool pins to
//! the combination mandated by each `State`.

use std::fs;

use tracing::{debug, info};

use crate::domain::State;
use crate::util::on_target;

const GPIO_EXPORT: &str = "/sys/class/gpio/export";

/// Active-low: writing `0` energizes the relay, `1` de-energizes it.
const ENERGIZED: &str = "0";
const DEENERGIZED: &str = "1";

/// BCM pin numbers for the three relays. The exact assignment is
/// configuration — defaults are 13/12/16, but `Config::from_env` may
/// override them per installation.
#[derive(Debug, Clone, Copy)]
pub struct RelayPins {
    pub fan: u8,
    pub heat: u8,
    pub cool: u8,
}

impl Default for RelayPins {
    fn default() -> Self {
        RelayPins { fan: 13, heat: 12, cool: 16 }
    }
}

/// Drive the three relay pins for `state`. Total over `State`: every
/// variant maps to exactly one `(fan, heat, cool)` pin-value tuple.
pub fn apply(state: State, pins: RelayPins) {
    let (fan, heat, cool) = pins_for(state);

    if !on_target() {
        info!(?state, fan, heat, cool, "off target, not touching GPIO");
        return;
    }

    write_pin(pins.fan, fan);
    write_pin(pins.heat, heat);
    write_pin(pins.cool, cool);
}

fn pins_for(state: State) -> (&'static str, &'static str, &'static str) {
    match state {
        State::Idle => (DEENERGIZED, DEENERGIZED, DEENERGIZED),
        State::Heat => (ENERGIZED, ENERGIZED, DEENERGIZED),
        State::Cool => (ENERGIZED, DEENERGIZED, ENERGIZED),
    }
}

fn write_pin(pin: u8, value: &str) {
    let _ = fs::write(GPIO_EXPORT, pin.to_string());
    let direction_path = format!("/sys/class/gpio/gpio{pin}/direction");
    let value_path = format!("/sys/class/gpio/gpio{pin}/value");
    if let Err(e) = fs::write(&direction_path, "out") {
        debug!(pin, error = %e, "failed to set GPIO direction");
        return;
    }
    if let Err(e) = fs::write(&value_path, value) {
        debug!(pin, error = %e, "failed to write GPIO value");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_deenergizes_every_pin() {
        assert_eq!(pins_for(State::Idle), (DEENERGIZED, DEENERGIZED, DEENERGIZED));
    }

    #[test]
    fn heat_energizes_fan_and_heat_only() {
        assert_eq!(pins_for(State::Heat), (ENERGIZED, ENERGIZED, DEENERGIZED));
    }

    #[test]
    fn cool_energizes_fan_and_cool_only() {
        assert_eq!(pins_for(State::Cool), (ENERGIZED, DEENERGIZED, ENERGIZED));
    }
}
