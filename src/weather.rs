//! Background outdoor-conditions poller: fetches from an
//! OpenWeatherMap-shaped HTTP endpoint on an adaptive interval and caches
//! the most recent reading.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_derive::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{FatalRemoteError, TransientRemoteError};
use crate::temperature::Temperature;

const DEGRADED_FETCH_INTERVAL_SECS: u64 = 600;
const CONNECTIVITY_PROBE_ADDR: &str = "8.8.8.8:53";
const CONNECTIVITY_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WeatherSnapshot {
    pub temperature: Temperature,
    pub temperature_low: Temperature,
    pub temperature_high: Temperature,
    pub humidity: u8,
    /// Normalized to lowercase, a small open set (`"clear"`, `"rain"`, ...).
    pub condition_tag: String,
    pub last_updated: DateTime<Utc>,
}

impl Default for WeatherSnapshot {
    fn default() -> Self {
        WeatherSnapshot {
            temperature: Temperature::from_millicelsius(0),
            temperature_low: Temperature::from_millicelsius(0),
            temperature_high: Temperature::from_millicelsius(0),
            humidity: 0,
            condition_tag: "n/a".to_string(),
            last_updated: DateTime::<Utc>::MIN_UTC,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OwmWeatherResponse {
    main: OwmMain,
    weather: Vec<OwmCondition>,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    temp_min: f64,
    temp_max: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    main: String,
}

#[derive(Debug, Deserialize)]
struct OwmForecastResponse {
    list: Vec<OwmForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct OwmForecastEntry {
    dt: i64,
    main: OwmMain,
}

/// Thread-safe handle shared between the poller task and whatever reads
/// the latest reading (the control loop's decision-engine input).
#[derive(Clone)]
pub struct WeatherHandle {
    inner: Arc<RwLock<WeatherSnapshot>>,
    client: reqwest::Client,
    api_key: String,
    city: String,
    country_code: String,
    units: &'static str,
}

impl WeatherHandle {
    pub fn new(api_key: String, city: String, country_code: String, fahrenheit: bool) -> Self {
        WeatherHandle {
            inner: Arc::new(RwLock::new(WeatherSnapshot::default())),
            client: reqwest::Client::new(),
            api_key,
            city,
            country_code,
            units: if fahrenheit { "imperial" } else { "metric" },
        }
    }

    pub async fn snapshot(&self) -> WeatherSnapshot {
        self.inner.read().await.clone()
    }

    /// Non-blocking read for the control loop's per-tick decision
    /// input: `None` rather than stalling the tick if the poller holds
    /// the write lock at the exact same instant.
    pub fn try_snapshot(&self) -> Option<WeatherSnapshot> {
        self.inner.try_read().ok().map(|guard| guard.clone())
    }

    /// Runs forever, polling at `nominal_interval` (default 1800s,
    /// `Config::weather_fetch_interval`), halving it to 600s on a
    /// transient failure and restoring it to the nominal value on the
    /// next success. Only `FatalRemoteError` escapes this loop — the
    /// caller should respawn the task if it does.
    pub async fn run(&self, nominal_interval: Duration) -> Result<(), FatalRemoteError> {
        let mut fetch_interval = nominal_interval;
        loop {
            match self.fetch_current_weather().await {
                Ok(snapshot) => {
                    *self.inner.write().await = snapshot;
                    fetch_interval = nominal_interval;
                    debug!("weather refreshed");
                }
                Err(TransientOrFatal::Transient(e)) => {
                    warn!(error = %e, "weather fetch degraded, shortening poll interval");
                    fetch_interval = Duration::from_secs(DEGRADED_FETCH_INTERVAL_SECS);
                }
                Err(TransientOrFatal::Fatal(e)) => return Err(e),
            }
            tokio::time::sleep(fetch_interval).await;
        }
    }

    async fn fetch_current_weather(&self) -> Result<WeatherSnapshot, TransientOrFatal> {
        if !connected_to_internet().await {
            info!("no internet connectivity");
            return Err(TransientOrFatal::Transient(TransientRemoteError::NoConnectivity));
        }

        let url = format!(
            "https://api.openweathermap.org/data/2.5/weather?q={},{}&units={}&appid={}",
            self.city, self.country_code, self.units, self.api_key
        );
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                TransientOrFatal::Transient(TransientRemoteError::ServiceUnavailable)
            } else {
                TransientOrFatal::Fatal(FatalRemoteError::Request(e))
            }
        })?;

        if response.status().is_server_error() {
            return Err(TransientOrFatal::Transient(TransientRemoteError::ServiceUnavailable));
        }

        let body: OwmWeatherResponse = response
            .json()
            .await
            .map_err(|e| TransientOrFatal::Fatal(FatalRemoteError::Request(e)))?;

        let condition_tag = body
            .weather
            .first()
            .map(|c| c.main.to_lowercase())
            .unwrap_or_else(|| "n/a".to_string());

        Ok(WeatherSnapshot {
            temperature: Temperature::parse(&body.main.temp.to_string())
                .map_err(|_| TransientOrFatal::Fatal(FatalRemoteError::UnexpectedResponse(
                    "non-numeric temperature".to_string(),
                )))?,
            temperature_low: Temperature::parse(&body.main.temp_min.to_string())
                .unwrap_or_else(|_| Temperature::from_millicelsius(0)),
            temperature_high: Temperature::parse(&body.main.temp_max.to_string())
                .unwrap_or_else(|_| Temperature::from_millicelsius(0)),
            humidity: body.main.humidity,
            condition_tag,
            last_updated: Utc::now(),
        })
    }

    /// One-shot 3-hour-step forecast over the provider's available
    /// window. Not cached.
    pub async fn short_forecast(&self) -> Result<Vec<(DateTime<Utc>, Temperature)>, FatalRemoteError> {
        let url = format!(
            "https://api.openweathermap.org/data/2.5/forecast?q={},{}&units={}&appid={}",
            self.city, self.country_code, self.units, self.api_key
        );
        let body: OwmForecastResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(FatalRemoteError::Request)?
            .json()
            .await
            .map_err(FatalRemoteError::Request)?;

        Ok(body
            .list
            .into_iter()
            .filter_map(|entry| {
                let temperature = Temperature::parse(&entry.main.temp.to_string()).ok()?;
                let timestamp = DateTime::<Utc>::from_timestamp(entry.dt, 0)?;
                Some((timestamp, temperature))
            })
            .collect())
    }
}

enum TransientOrFatal {
    Transient(TransientRemoteError),
    Fatal(FatalRemoteError),
}

/// Connectivity probe: a TCP connect attempt to a well-known DNS server,
/// not an actual DNS query.
async fn connected_to_internet() -> bool {
    tokio::task::spawn_blocking(|| {
        let addr = match CONNECTIVITY_PROBE_ADDR.to_socket_addrs() {
            Ok(mut addrs) => match addrs.next() {
                Some(a) => a,
                None => return false,
            },
            Err(_) => return false,
        };
        std::net::TcpStream::connect_timeout(&addr, CONNECTIVITY_PROBE_TIMEOUT).is_ok()
    })
    .await
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_has_epoch_timestamp() {
        let snapshot = WeatherSnapshot::default();
        assert_eq!(snapshot.last_updated, DateTime::<Utc>::MIN_UTC);
    }
}
