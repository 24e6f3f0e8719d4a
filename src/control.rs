//! The heartbeat loop and shared mutable state: the
//! single owner of `mode`, `state`, `temperature_range` and the current
//! reading. Every other task talks to it by sending a `ControlCommand`
//! over a bounded channel rather than touching shared locks directly.

use std::path::PathBuf;

use chrono::{Datelike, Timelike, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::decision::{
    DecisionEngine, ENERGY_COST, EXTERNAL_TEMPERATURE, HISTORY_TEMPERATURE, INTERNAL_TEMPERATURE,
};
use crate::domain::{min_temperature, Mode, SetpointRange, State, WeekDay};
use crate::error::PersistenceError;
use crate::history::{round_time, HistoryGrid};
use crate::relay::{self, RelayPins};
use crate::sensor;
use crate::settings::{PrettyValue, SettingScalar, SettingValue, Settings};
use crate::tariff::TariffTable;
use crate::temperature::Temperature;
use crate::util::on_target;
use crate::weather::WeatherHandle;

/// Half a degree — the hysteresis margin added/subtracted from the
/// setpoint range to form the coarse heat/cool bands.
const TEMPERATURE_INCREMENT: &str = "1.5";

fn temperature_increment() -> Decimal {
    TEMPERATURE_INCREMENT.parse().expect("valid decimal literal")
}

/// Messages sent by the protocol receiver (and any other task) to the
/// control loop. The loop is the only place these are ever applied.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    TogglePower,
    ToggleMode,
    SetMode(Mode),
    UpdateTemperatureRange { low: Temperature, high: Temperature },
    UpdateSetting { pretty_name: String, value: SettingScalar },
    RequestTemperatures,
    RequestMode,
    RequestSettings,
}

/// Outbound telemetry the control loop (or protocol layer on its
/// behalf) publishes in response to state changes or requests.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    TemperatureData { current: Option<i64>, low: i64, high: i64 },
    ModeData { mode: Mode },
    StateData { state: State },
    SettingsData { settings: IndexMap<String, PrettyValue> },
}

pub struct Thermostat {
    settings: Settings,
    history: HistoryGrid,
    tariff: TariffTable,
    weather: WeatherHandle,
    decision_engine: DecisionEngine,

    mode: Mode,
    state: State,
    temperature_range: SetpointRange,
    current_temperature: Temperature,

    last_state_update: Option<Instant>,
    last_history_record: Instant,

    sensor_serial: String,
    relay_pins: RelayPins,
    oscillation_delay: Duration,
    history_record_interval: Duration,
    settings_path: PathBuf,
    history_path: PathBuf,
}

impl Thermostat {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        history: HistoryGrid,
        tariff: TariffTable,
        weather: WeatherHandle,
        sensor_serial: String,
        relay_pins: RelayPins,
        oscillation_delay: Duration,
        history_record_interval: Duration,
        settings_path: PathBuf,
        history_path: PathBuf,
    ) -> Self {
        Thermostat {
            settings,
            history,
            tariff,
            weather,
            decision_engine: DecisionEngine::new(),
            mode: Mode::Off,
            state: State::Idle,
            temperature_range: SetpointRange::default(),
            current_temperature: crate::temperature::sensor_sentinel(),
            last_state_update: None,
            last_history_record: Instant::now(),
            sensor_serial,
            relay_pins,
            oscillation_delay,
            history_record_interval,
            settings_path,
            history_path,
        }
    }

    /// Runs until `shutdown` fires: drains queued commands, refreshes
    /// the sensor reading, recomputes the candidate state, and — gated
    /// by the oscillation guard and mode filter — commits it (relay
    /// write, `last_state_update` bump, event publish) in that order.
    /// The history-recorder is folded into this same heartbeat rather
    /// than run on its own timer: `maybe_record_history` self-throttles
    /// to `history_record_interval`, which keeps the mutable state
    /// single-owner instead of needing a second lock or channel just
    /// for this.
    ///
    /// On shutdown, flushes settings and history to the paths given at
    /// construction before returning — the tariff connection closes on
    /// drop, and unsubscribing is the caller's responsibility (dropping
    /// the MQTT event loop).
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ControlCommand>,
        events: mpsc::Sender<ControlEvent>,
        update_interval: Duration,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) {
        if on_target() {
            sensor::init();
            self.current_temperature = sensor::read(&self.sensor_serial);
        }

        let mut ticker = interval(update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain_commands(&mut commands, &events).await;
                    self.tick(&events).await;
                    self.maybe_record_history();
                }
                Some(command) = commands.recv() => {
                    self.apply_command(command, &events).await;
                }
                _ = &mut shutdown => {
                    info!("shutdown requested, flushing state");
                    break;
                }
            }
        }

        if let Err(e) = self.shutdown() {
            warn!(error = %e, "failed to flush state on shutdown");
        }
    }

    async fn drain_commands(&mut self, commands: &mut mpsc::Receiver<ControlCommand>, events: &mpsc::Sender<ControlEvent>) {
        while let Ok(command) = commands.try_recv() {
            self.apply_command(command, events).await;
        }
    }

    async fn apply_command(&mut self, command: ControlCommand, events: &mpsc::Sender<ControlEvent>) {
        match command {
            ControlCommand::TogglePower => {
                self.mode = if self.mode == Mode::Off { Mode::Auto } else { Mode::Off };
                self.commit_idle(events).await;
                let _ = events.try_send(ControlEvent::ModeData { mode: self.mode });
                info!(?self.mode, "power toggled");
            }
            ControlCommand::ToggleMode => {
                self.mode = self.mode.cycle();
                let _ = events.try_send(ControlEvent::ModeData { mode: self.mode });
                info!(?self.mode, "mode toggled");
            }
            ControlCommand::SetMode(mode) => {
                self.mode = mode;
                if mode == Mode::Off {
                    self.commit_idle(events).await;
                }
                let _ = events.try_send(ControlEvent::ModeData { mode: self.mode });
                info!(?self.mode, "mode set");
            }
            ControlCommand::UpdateTemperatureRange { low, high } => {
                match SetpointRange::new(low, high) {
                    Ok(range) => {
                        self.temperature_range = range;
                        let _ = events.try_send(ControlEvent::TemperatureData {
                            current: self.current_temperature_reading(),
                            low: self.temperature_range.low().round_to_integer(),
                            high: self.temperature_range.high().round_to_integer(),
                        });
                    }
                    Err(e) => warn!(error = %e, "rejected temperature range update"),
                }
            }
            ControlCommand::UpdateSetting { pretty_name, value } => {
                if let Some((name, updated)) = self.settings.unprettify(&pretty_name, value) {
                    self.settings.set(name, updated);
                    if let Err(e) = self.settings.save(&self.settings_path) {
                        warn!(error = %e, "failed to flush settings after remote update");
                    }
                } else {
                    debug!(pretty_name, "unknown setting name, ignored");
                }
            }
            ControlCommand::RequestTemperatures => {
                let _ = events.try_send(ControlEvent::TemperatureData {
                    current: self.current_temperature_reading(),
                    low: self.temperature_range.low().round_to_integer(),
                    high: self.temperature_range.high().round_to_integer(),
                });
            }
            ControlCommand::RequestMode => {
                let _ = events.try_send(ControlEvent::ModeData { mode: self.mode });
            }
            ControlCommand::RequestSettings => {
                let _ = events.try_send(ControlEvent::SettingsData { settings: self.settings.prettify() });
            }
        }
    }

    /// The current reading, rounded, or `None` when the sensor has never
    /// produced a usable value (still at its sentinel).
    fn current_temperature_reading(&self) -> Option<i64> {
        if self.current_temperature.is_sentinel() {
            None
        } else {
            Some(self.current_temperature.round_to_integer())
        }
    }

    async fn tick(&mut self, events: &mpsc::Sender<ControlEvent>) {
        if self.mode == Mode::Off {
            return;
        }

        if on_target() {
            self.current_temperature = sensor::read(&self.sensor_serial);
        }

        let candidate = self.candidate_state();
        let filtered = self.apply_mode_filter(candidate, self.state);

        if filtered == self.state {
            return;
        }
        if let Some(last) = self.last_state_update {
            if last.elapsed() < self.oscillation_delay {
                debug!("oscillation guard blocked a state transition");
                return;
            }
        }

        self.commit_state(filtered, events);
    }

    /// Commits a new state: bumps `last_state_update` strictly before the
    /// relay write, then writes relays and publishes `state_data`, in
    /// that order. Used by both the heartbeat and the power-toggle/
    /// mode-to-off commands, which force `Idle` unconditionally rather
    /// than going through the oscillation guard.
    fn commit_state(&mut self, state: State, events: &mpsc::Sender<ControlEvent>) {
        self.last_state_update = Some(Instant::now());
        relay::apply(state, self.relay_pins);
        self.state = state;
        if events.try_send(ControlEvent::StateData { state }).is_err() {
            debug!("event channel full, dropped state_data publish");
        }
        info!(?state, "state committed");
    }

    /// `toggle_power`/`update_mode(Off)` force `State = Idle` outright,
    /// bypassing the oscillation guard — `Mode = Off` must imply
    /// `State = Idle` the instant power is cut.
    async fn commit_idle(&mut self, events: &mpsc::Sender<ControlEvent>) {
        self.commit_state(State::Idle, events);
    }

    /// Coarse hysteresis bands first; the decision engine only runs when
    /// the reading is inside `[low - increment, high + increment]`. The
    /// sentinel reading is clamped below `min_temperature()` so it can
    /// never itself cross the low-side coarse band into a spurious
    /// `Heat` command — a reading this far out of range means "no
    /// reading", not "very cold".
    fn candidate_state(&self) -> State {
        if self.current_temperature.is_sentinel() || self.current_temperature < min_temperature() {
            return State::Idle;
        }

        let increment = temperature_increment();
        let low_bound = Temperature::from_decimal(self.temperature_range.low().as_decimal() - increment);
        let high_bound = Temperature::from_decimal(self.temperature_range.high().as_decimal() + increment);

        if self.current_temperature < low_bound {
            State::Heat
        } else if self.current_temperature > high_bound {
            State::Cool
        } else {
            self.evaluate_decision_engine()
        }
    }

    fn evaluate_decision_engine(&self) -> State {
        let mut params = Vec::with_capacity(4);

        let internal_rating = self.temperature_range.equilibrium().as_decimal() - self.current_temperature.as_decimal();
        params.push((INTERNAL_TEMPERATURE, internal_rating));

        let weather_snapshot = self.weather.try_snapshot();
        if let Some(snapshot) = weather_snapshot {
            if (Utc::now() - snapshot.last_updated).num_seconds() < 3600 {
                let rating = self.temperature_range.high().as_decimal() - snapshot.temperature.as_decimal();
                params.push((EXTERNAL_TEMPERATURE, rating));
            }
        }

        if let Some(past) = self.history.get(WeekDay::from_chrono(Utc::now().weekday()), Utc::now()) {
            let rating = past.as_decimal() - self.current_temperature.as_decimal();
            params.push((HISTORY_TEMPERATURE, rating));
        }

        if let (Some(SettingValue::Text(country_code)), Some(SettingValue::Text(city))) =
            (self.settings.get("country_code"), self.settings.get("city"))
        {
            if let Ok(schedule) = self.tariff.select(country_code, city) {
                if !schedule.is_empty() {
                    let lowest_cost = schedule.values().min().copied();
                    let current_hour = round_time(Utc::now(), 3600).hour();
                    if let (Some(lowest), Some(current)) = (lowest_cost, schedule.get(&current_hour)) {
                        if current.as_decimal() != Decimal::ZERO {
                            let ratio = lowest.as_decimal() / current.as_decimal();
                            let rating = ratio * internal_rating;
                            params.push((ENERGY_COST, rating));
                        }
                    }
                }
            }
        }

        let matrix = self.decision_engine.build(&params);
        self.decision_engine.evaluate(&matrix)
    }

    /// `Heat` mode never commands `Cool` and vice versa — a disallowed
    /// candidate is rejected in favor of whatever state is already
    /// committed, not forced to `Idle`. `Auto` passes the candidate
    /// through unfiltered.
    fn apply_mode_filter(&self, candidate: State, current: State) -> State {
        match (self.mode, candidate) {
            (Mode::Heat, State::Cool) => current,
            (Mode::Cool, State::Heat) => current,
            _ => candidate,
        }
    }

    fn maybe_record_history(&mut self) {
        if self.last_history_record.elapsed() < self.history_record_interval {
            return;
        }
        self.last_history_record = Instant::now();
        let now = Utc::now();
        self.history.set(WeekDay::from_chrono(now.weekday()), now, self.current_temperature);
        if let Err(e) = self.history.save(&self.history_path) {
            warn!(error = %e, "failed to flush history after recording interval");
        }
    }

    /// Unsubscribe (handled by the caller dropping the receiver), flush
    /// settings and history, and let the tariff connection close on drop.
    pub fn shutdown(&self) -> Result<(), PersistenceError> {
        self.settings.save(&self.settings_path)?;
        self.history.save(&self.history_path)?;
        info!("cleanup completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tariff::TariffTable;

    fn test_thermostat() -> Thermostat {
        Thermostat::new(
            Settings::new(),
            HistoryGrid::new(),
            TariffTable::open(std::path::Path::new(":memory:")).unwrap(),
            WeatherHandle::new(String::new(), String::new(), String::new(), false),
            "0000000000ff".to_string(),
            RelayPins::default(),
            Duration::from_secs(300),
            Duration::from_secs(600),
            std::env::temp_dir().join("control-test-settings.json"),
            std::env::temp_dir().join("control-test-history.json"),
        )
    }

    #[tokio::test]
    async fn toggle_power_forces_idle_and_publishes_mode() {
        let mut thermostat = test_thermostat();
        thermostat.state = State::Heat;
        let (events, mut rx) = mpsc::channel(8);

        thermostat.apply_command(ControlCommand::TogglePower, &events).await;

        assert_eq!(thermostat.mode, Mode::Auto);
        assert_eq!(thermostat.state, State::Idle);
        assert!(matches!(rx.try_recv(), Ok(ControlEvent::StateData { state: State::Idle })));
        assert!(matches!(rx.try_recv(), Ok(ControlEvent::ModeData { mode: Mode::Auto })));
    }

    #[tokio::test]
    async fn set_mode_off_forces_idle() {
        let mut thermostat = test_thermostat();
        thermostat.mode = Mode::Heat;
        thermostat.state = State::Heat;
        let (events, mut rx) = mpsc::channel(8);

        thermostat.apply_command(ControlCommand::SetMode(Mode::Off), &events).await;

        assert_eq!(thermostat.state, State::Idle);
        assert!(matches!(rx.try_recv(), Ok(ControlEvent::StateData { state: State::Idle })));
        assert!(matches!(rx.try_recv(), Ok(ControlEvent::ModeData { mode: Mode::Off })));
    }

    #[tokio::test]
    async fn update_temperature_range_publishes_temperature_data() {
        let mut thermostat = test_thermostat();
        let (events, mut rx) = mpsc::channel(8);

        thermostat
            .apply_command(
                ControlCommand::UpdateTemperatureRange {
                    low: Temperature::parse("19").unwrap(),
                    high: Temperature::parse("23").unwrap(),
                },
                &events,
            )
            .await;

        match rx.try_recv() {
            Ok(ControlEvent::TemperatureData { low, high, .. }) => {
                assert_eq!(low, 19);
                assert_eq!(high, 23);
            }
            other => panic!("expected TemperatureData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_temperature_range_rejects_inverted_bounds_without_publishing() {
        let mut thermostat = test_thermostat();
        let (events, mut rx) = mpsc::channel(8);

        thermostat
            .apply_command(
                ControlCommand::UpdateTemperatureRange {
                    low: Temperature::parse("23").unwrap(),
                    high: Temperature::parse("19").unwrap(),
                },
                &events,
            )
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn mode_filter_holds_current_state_instead_of_forcing_idle() {
        let mut thermostat = test_thermostat();
        thermostat.mode = Mode::Heat;

        assert_eq!(thermostat.apply_mode_filter(State::Cool, State::Heat), State::Heat);
        assert_eq!(thermostat.apply_mode_filter(State::Heat, State::Heat), State::Heat);

        thermostat.mode = Mode::Cool;
        assert_eq!(thermostat.apply_mode_filter(State::Heat, State::Cool), State::Cool);

        thermostat.mode = Mode::Auto;
        assert_eq!(thermostat.apply_mode_filter(State::Heat, State::Idle), State::Heat);
    }

    #[test]
    fn candidate_state_treats_sentinel_reading_as_idle() {
        let mut thermostat = test_thermostat();
        thermostat.temperature_range = SetpointRange::new(
            Temperature::parse("19").unwrap(),
            Temperature::parse("23").unwrap(),
        )
        .unwrap();
        thermostat.current_temperature = crate::temperature::sensor_sentinel();

        assert_eq!(thermostat.candidate_state(), State::Idle);
    }
}
