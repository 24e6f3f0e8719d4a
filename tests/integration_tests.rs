use rumqttc::v5::{
    mqttbytes::{
        v5::{Packet, Publish},
        QoS::AtLeastOnce,
    },
    AsyncClient,
    Event::Incoming,
    MqttOptions,
};
use assert_json_diff::assert_json_include;
use serde_json::{json, Value};
use smart_thermostat_core::control::{ControlCommand, ControlEvent, Thermostat};
use smart_thermostat_core::history::HistoryGrid;
use smart_thermostat_core::protocol::{run_receiver, ProtocolClient};
use smart_thermostat_core::relay::RelayPins;
use smart_thermostat_core::settings::Settings;
use smart_thermostat_core::tariff::TariffTable;
use smart_thermostat_core::weather::WeatherHandle;
use std::time::Duration;
use testcontainers_modules::{mosquitto::Mosquitto, testcontainers::runners::AsyncRunner};
use tokio::sync::{mpsc, oneshot};

fn test_thermostat(settings_path: std::path::PathBuf, history_path: std::path::PathBuf) -> Thermostat {
    Thermostat::new(
        Settings::new(),
        HistoryGrid::new(),
        TariffTable::open(std::path::Path::new(":memory:")).unwrap(),
        WeatherHandle::new(String::new(), String::new(), String::new(), false),
        "0000000000ff".to_string(),
        RelayPins::default(),
        Duration::from_secs(300),
        Duration::from_secs(3600),
        settings_path,
        history_path,
    )
}

/// An inbound `update_temperature_range` command, published to the
/// thermostat's command topic, is validated and committed by a live
/// `Thermostat` running its full heartbeat loop, and answered with a
/// `temperature_data` publish on the event topic — the same wire path
/// `thermostatd` drives.
#[tokio::test]
async fn update_temperature_range_round_trips_over_mqtt() {
    let mosquitto_container = Mosquitto::default().start().await.expect("mosquitto container starts");
    let port = mosquitto_container
        .get_host_port_ipv4(1883)
        .await
        .expect("mosquitto exposes its mapped port");

    let (device_client, device_eventloop) =
        AsyncClient::new(MqttOptions::new("thermostat-1", "127.0.0.1", port), 16);
    let protocol = ProtocolClient::new(device_client, "thermostat-1");
    protocol.subscribe().await.expect("subscribe to command topic");

    let (command_tx, command_rx) = mpsc::channel::<ControlCommand>(8);
    let (event_tx, event_rx) = mpsc::channel::<ControlEvent>(8);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(run_receiver(device_eventloop, command_tx.clone()));
    tokio::spawn(async move { protocol.run_publisher(event_rx).await });

    let settings_path = std::env::temp_dir().join(format!("thermostat-test-settings-{port}.json"));
    let history_path = std::env::temp_dir().join(format!("thermostat-test-history-{port}.json"));

    let thermostat = test_thermostat(settings_path.clone(), history_path.clone());
    let control_task = tokio::spawn(async move {
        thermostat.run(command_rx, event_tx, Duration::from_secs(3600), shutdown_rx).await;
        let _ = std::fs::remove_file(&settings_path);
        let _ = std::fs::remove_file(&history_path);
    });

    command_tx
        .send(ControlCommand::SetMode(smart_thermostat_core::domain::Mode::Auto))
        .await
        .expect("send seed mode command");

    // A second connection plays the remote controller: subscribes to the
    // event topic, then publishes the inbound command.
    let (test_client, mut test_eventloop) =
        AsyncClient::new(MqttOptions::new("test-controller", "127.0.0.1", port), 16);
    test_client
        .subscribe("thermostat-1/event", AtLeastOnce)
        .await
        .expect("subscribe to event topic");

    // Drain the mode_data publish triggered by the seed command above
    // before sending the command under test, so the timeout loop below
    // can key off the first temperature_data publish unambiguously.
    let _ = tokio::time::timeout(Duration::from_secs(5), next_publish(&mut test_eventloop)).await;

    let inbound = json!({
        "action": "update_temperature_range",
        "temperature_low": "19",
        "temperature_high": "23",
    });
    test_client
        .publish(
            "thermostat-1/command",
            AtLeastOnce,
            false,
            serde_json::to_vec(&inbound).unwrap(),
        )
        .await
        .expect("publish inbound command");

    let payload = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let value = next_publish(&mut test_eventloop).await;
            if value["action"] == "temperature_data" {
                return value;
            }
        }
    })
    .await
    .expect("temperature_data published within timeout");

    assert_json_include!(
        actual: payload,
        expected: json!({
            "action": "temperature_data",
            "data": { "temperature_low": 19, "temperature_high": 23 },
        })
    );

    let _ = shutdown_tx.send(());
    let _ = control_task.await;
}

async fn next_publish(eventloop: &mut rumqttc::v5::EventLoop) -> Value {
    loop {
        if let Ok(Incoming(Packet::Publish(publish))) = eventloop.poll().await {
            return decode(&publish);
        }
    }
}

fn decode(publish: &Publish) -> Value {
    let text = std::str::from_utf8(&publish.payload).expect("valid UTF-8 payload");
    serde_json::from_str(text).expect("valid JSON payload")
}
