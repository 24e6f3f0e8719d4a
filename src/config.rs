//! Environment-sourced daemon configuration, optionally backed by a
//! local `.env` file in development.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub thermostat_id: String,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,

    pub gpio_fan_pin: u8,
    pub gpio_heat_pin: u8,
    pub gpio_cool_pin: u8,
    pub sensor_serial: String,

    pub settings_path: PathBuf,
    pub default_settings_path: PathBuf,
    pub history_path: PathBuf,
    pub default_history_path: PathBuf,
    pub tariff_db_path: PathBuf,

    pub weather_api_key: String,
    pub weather_fahrenheit: bool,

    pub update_interval: Duration,
    pub oscillation_delay: Duration,
    pub weather_fetch_interval: Duration,
    pub history_record_interval: Duration,
}

impl Config {
    /// Loads `.env` if present (development convenience only — never
    /// required in production) then reads every variable below, each
    /// with an explicit default so a bare checkout without any env file
    /// still boots.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Config {
            thermostat_id: env_string("THERMOSTAT_ID", Some("thermostat-1".to_string()))?,

            mqtt_host: env_string("MQTT_HOST", Some("127.0.0.1".to_string()))?,
            mqtt_port: env_u64("MQTT_PORT", Some(1883))? as u16,
            mqtt_username: env_optional("MQTT_USERNAME"),
            mqtt_password: env_optional("MQTT_PASSWORD"),

            gpio_fan_pin: env_u64("GPIO_FAN_PIN", Some(13))? as u8,
            gpio_heat_pin: env_u64("GPIO_HEAT_PIN", Some(12))? as u8,
            gpio_cool_pin: env_u64("GPIO_COOL_PIN", Some(16))? as u8,
            sensor_serial: env_string("SENSOR_SERIAL", Some("0315909d1dff".to_string()))?,

            settings_path: PathBuf::from(env_string("SETTINGS_PATH", Some("settings.json".to_string()))?),
            default_settings_path: PathBuf::from(env_string(
                "DEFAULT_SETTINGS_PATH",
                Some("default_settings.json".to_string()),
            )?),
            history_path: PathBuf::from(env_string("HISTORY_PATH", Some("history.json".to_string()))?),
            default_history_path: PathBuf::from(env_string(
                "DEFAULT_HISTORY_PATH",
                Some("default_history.json".to_string()),
            )?),
            tariff_db_path: PathBuf::from(env_string("TARIFF_DB_PATH", Some("app.db".to_string()))?),

            weather_api_key: env_string("WEATHER_API_KEY", Some(String::new()))?,
            weather_fahrenheit: env_bool("WEATHER_FAHRENHEIT", false)?,

            update_interval: Duration::from_secs(env_u64("UPDATE_INTERVAL_SECONDS", Some(5))?),
            // Production default is 300s; overridable down for demo/test builds.
            oscillation_delay: Duration::from_secs(env_u64("OSCILLATION_DELAY_SECONDS", Some(300))?),
            weather_fetch_interval: Duration::from_secs(env_u64(
                "WEATHER_FETCH_INTERVAL_SECONDS",
                Some(1800),
            )?),
            history_record_interval: Duration::from_secs(env_u64(
                "HISTORY_RECORD_INTERVAL_SECONDS",
                Some(600),
            )?),
        })
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value.trim().parse::<u64>().with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<bool>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => Ok(default),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
