//! Process entry point: wires config, persistence, the weather poller,
//! the control loop, and the remote protocol together, then waits for
//! Ctrl-C.

use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::v5::{AsyncClient, MqttOptions};
use smart_thermostat_core::config::Config;
use smart_thermostat_core::control::{ControlCommand, ControlEvent, Thermostat};
use smart_thermostat_core::geolocation;
use smart_thermostat_core::history::HistoryGrid;
use smart_thermostat_core::protocol::{run_receiver, ProtocolClient};
use smart_thermostat_core::relay::RelayPins;
use smart_thermostat_core::settings::{SettingValue, Settings};
use smart_thermostat_core::tariff::TariffTable;
use smart_thermostat_core::weather::WeatherHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,thermostatd=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let mut settings = Settings::load_or_seed(&config.settings_path, &config.default_settings_path)
        .context("loading settings")?;
    let history = HistoryGrid::load_or_seed(&config.history_path, &config.default_history_path)
        .context("loading history")?;
    let tariff = TariffTable::open(&config.tariff_db_path).context("opening tariff database")?;

    seed_location_if_missing(&mut settings, &config.settings_path).await;

    let country_code = match settings.get("country_code") {
        Some(SettingValue::Text(c)) => c.clone(),
        _ => String::new(),
    };
    let city = match settings.get("city") {
        Some(SettingValue::Text(c)) => c.clone(),
        _ => String::new(),
    };
    let weather = WeatherHandle::new(
        config.weather_api_key.clone(),
        city,
        country_code,
        config.weather_fahrenheit,
    );

    let relay_pins = RelayPins {
        fan: config.gpio_fan_pin,
        heat: config.gpio_heat_pin,
        cool: config.gpio_cool_pin,
    };

    let thermostat = Thermostat::new(
        settings,
        history,
        tariff,
        weather.clone(),
        config.sensor_serial.clone(),
        relay_pins,
        config.oscillation_delay,
        config.history_record_interval,
        config.settings_path.clone(),
        config.history_path.clone(),
    );

    let (command_tx, command_rx) = mpsc::channel::<ControlCommand>(64);
    let (event_tx, event_rx) = mpsc::channel::<ControlEvent>(64);

    let weather_handle = weather.clone();
    let weather_fetch_interval = config.weather_fetch_interval;
    let weather_task = tokio::spawn(async move {
        loop {
            if let Err(err) = weather_handle.run(weather_fetch_interval).await {
                error!(error = %err, "weather poller crashed, restarting");
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });

    let mut mqtt_options = MqttOptions::new(config.thermostat_id.clone(), config.mqtt_host.clone(), config.mqtt_port);
    if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
        mqtt_options.set_credentials(username.clone(), password.clone());
    }
    let (mqtt_client, mqtt_eventloop) = AsyncClient::new(mqtt_options, 64);
    let protocol_client = ProtocolClient::new(mqtt_client, &config.thermostat_id);
    protocol_client.subscribe().await.context("subscribing to command topic")?;

    let receiver_task = tokio::spawn(run_receiver(mqtt_eventloop, command_tx));
    let publisher_task = tokio::spawn(async move {
        protocol_client.run_publisher(event_rx).await;
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let update_interval = config.update_interval;
    let control_task = tokio::spawn(async move {
        thermostat.run(command_rx, event_tx, update_interval, shutdown_rx).await;
    });

    info!(thermostat_id = %config.thermostat_id, "thermostatd started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = weather_task => {}
        _ = receiver_task => {}
        _ = publisher_task => {}
    }

    let _ = shutdown_tx.send(());
    let _ = control_task.await;

    Ok(())
}

/// Fills in `city`/`country_code` from an IP geolocation lookup on first
/// boot, when neither is set yet — a freshly seeded settings file ships
/// with empty defaults since the repository can't know where it's
/// installed. Failure is logged and otherwise ignored: a missing location
/// just means the decision engine's `energy_cost`/`external_temperature`
/// parameters stay absent until the setting is filled in by hand.
async fn seed_location_if_missing(settings: &mut Settings, settings_path: &std::path::Path) {
    let has_city = matches!(settings.get("city"), Some(SettingValue::Text(c)) if !c.is_empty());
    let has_country = matches!(settings.get("country_code"), Some(SettingValue::Text(c)) if !c.is_empty());
    if has_city && has_country {
        return;
    }

    let client = reqwest::Client::new();
    match geolocation::lookup(&client).await {
        Some(location) => {
            settings.set("city", SettingValue::Text(location.city));
            settings.set("country_code", SettingValue::Text(location.country_code));
            if let Err(e) = settings.save(settings_path) {
                error!(error = %e, "failed to persist geolocation-seeded settings");
            }
        }
        None => info!("geolocation lookup unavailable, leaving city/country_code unset"),
    }
}
