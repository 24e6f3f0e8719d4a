//! Remote command/telemetry channel: one MQTT topic pair
//! rooted at `THERMOSTAT_ID`, JSON messages shaped `{action, ...}`.

use std::str::FromStr;

use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::mqttbytes::QoS::AtLeastOnce;
use rumqttc::v5::{AsyncClient, Event::Incoming, EventLoop};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::control::{ControlCommand, ControlEvent};
use crate::domain::Mode;
use crate::error::ProtocolError;
use crate::settings::SettingScalar;
use crate::temperature::Temperature;

#[derive(Debug, Deserialize)]
struct InboundMessage {
    action: String,
    #[serde(default)]
    data: JsonValue,
    #[serde(default)]
    temperature_low: Option<String>,
    #[serde(default)]
    temperature_high: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    setting_name: Option<String>,
    #[serde(default)]
    setting_value: Option<JsonValue>,
}

fn parse_inbound(payload: &[u8]) -> Result<ControlCommand, ProtocolError> {
    let text = std::str::from_utf8(payload).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let message: InboundMessage =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    match message.action.as_str() {
        "request_temperatures" => Ok(ControlCommand::RequestTemperatures),
        "request_mode" => Ok(ControlCommand::RequestMode),
        "request_settings" => Ok(ControlCommand::RequestSettings),
        "update_temperature_range" => {
            let low = message.temperature_low.ok_or(ProtocolError::MissingField("temperature_low"))?;
            let high = message.temperature_high.ok_or(ProtocolError::MissingField("temperature_high"))?;
            let low = Temperature::parse(&low).map_err(|_| ProtocolError::InvalidJson(low))?;
            let high = Temperature::parse(&high).map_err(|_| ProtocolError::InvalidJson(high))?;
            Ok(ControlCommand::UpdateTemperatureRange { low, high })
        }
        "update_mode" => {
            let raw = message.mode.ok_or(ProtocolError::MissingField("mode"))?;
            let mode = Mode::from_str(&raw).map_err(|_| ProtocolError::InvalidJson(raw))?;
            Ok(ControlCommand::SetMode(mode))
        }
        "update_setting" => {
            let pretty_name = message.setting_name.ok_or(ProtocolError::MissingField("setting_name"))?;
            let raw_value = message.setting_value.ok_or(ProtocolError::MissingField("setting_value"))?;
            let value = match raw_value {
                JsonValue::String(s) => SettingScalar::Text(s),
                JsonValue::Number(n) => Decimal::from_str(&n.to_string())
                    .map(SettingScalar::Number)
                    .map_err(|_| ProtocolError::InvalidJson(n.to_string()))?,
                other => return Err(ProtocolError::InvalidJson(other.to_string())),
            };
            Ok(ControlCommand::UpdateSetting { pretty_name, value })
        }
        other => Err(ProtocolError::UnknownAction(other.to_string())),
    }
}

/// Envelope published for every `ControlEvent`.
#[derive(Serialize)]
struct OutboundMessage<'a> {
    action: &'a str,
    data: JsonValue,
}

fn outbound_envelope(event: &ControlEvent) -> OutboundMessage<'_> {
    match event {
        ControlEvent::TemperatureData { current, low, high } => OutboundMessage {
            action: "temperature_data",
            data: serde_json::json!({
                "current_temperature": current,
                "temperature_low": low,
                "temperature_high": high,
            }),
        },
        ControlEvent::ModeData { mode } => OutboundMessage {
            action: "mode_data",
            data: serde_json::json!({ "mode": mode_str(*mode) }),
        },
        ControlEvent::StateData { state } => OutboundMessage {
            action: "state_data",
            data: serde_json::json!({ "state": state.as_str() }),
        },
        ControlEvent::SettingsData { settings } => {
            let data = settings
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect::<serde_json::Map<String, JsonValue>>();
            OutboundMessage { action: "settings_data", data: JsonValue::Object(data) }
        }
    }
}

fn mode_str(mode: Mode) -> &'static str {
    mode.as_str()
}

/// One week, in seconds.
const MESSAGE_EXPIRY_SECONDS: u32 = 60 * 60 * 24 * 7;

pub struct ProtocolClient {
    client: AsyncClient,
    command_topic: String,
    event_topic: String,
}

impl ProtocolClient {
    pub fn new(client: AsyncClient, thermostat_id: &str) -> Self {
        ProtocolClient {
            client,
            command_topic: format!("{thermostat_id}/command"),
            event_topic: format!("{thermostat_id}/event"),
        }
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::v5::ClientError> {
        self.client
            .subscribe(&self.command_topic, rumqttc::v5::mqttbytes::QoS::AtLeastOnce)
            .await
    }

    /// Publish one outbound event, retained, QoS At-Least-Once,
    /// `content_type: application/json`, as `{action, data}`.
    pub async fn publish(&self, event: &ControlEvent) -> Result<(), rumqttc::v5::ClientError> {
        let envelope = outbound_envelope(event);
        let payload = serde_json::to_string(&envelope).expect("envelope always serializes");
        let props = PublishProperties {
            message_expiry_interval: Some(MESSAGE_EXPIRY_SECONDS),
            content_type: Some("application/json".to_string()),
            ..Default::default()
        };
        self.client
            .publish_with_properties(&self.event_topic, AtLeastOnce, true, payload, props)
            .await
    }

    /// Drains outbound events from the control loop and publishes each.
    pub async fn run_publisher(&self, mut events: mpsc::Receiver<ControlEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.publish(&event).await {
                warn!(error = %e, "failed to publish event");
            }
        }
    }
}

/// Polls the MQTT event loop, turning inbound `command` topic publishes
/// into `ControlCommand`s for the control loop. Malformed or
/// unrecognized payloads are logged at `debug` and dropped — never a
/// panic.
pub async fn run_receiver(mut eventloop: EventLoop, commands: mpsc::Sender<ControlCommand>) {
    loop {
        match eventloop.poll().await {
            Ok(Incoming(Packet::Publish(publish))) => match parse_inbound(&publish.payload) {
                Ok(command) => {
                    if commands.send(command).await.is_err() {
                        debug!("control loop command channel closed, stopping receiver");
                        return;
                    }
                }
                Err(e) => debug!(error = %e, "dropped malformed inbound message"),
            },
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt event loop error");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}
