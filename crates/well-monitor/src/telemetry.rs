//! Telemetry collaborator: "publish named value" and "log message".
//!
//! The control loop only talks to the [`Telemetry`] trait. [`MqttTelemetry`]
//! maps names onto `<root>/<name>` topics over rumqttc and never blocks the
//! cycle: a full client queue drops the message with a warning.

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::state::Snapshot;

pub(crate) trait Telemetry: Send + Sync {
    /// Publish `payload` under the value name `name` (e.g. `pump/backoff`).
    fn publish(&self, name: &str, payload: String, retain: bool);

    /// Send a free-form operational log line.
    fn log(&self, message: &str);
}

// ---------------------------------------------------------------------------
// MQTT transport
// ---------------------------------------------------------------------------

pub(crate) struct MqttTelemetry {
    client: AsyncClient,
    root: String,
}

impl MqttTelemetry {
    pub(crate) fn new(client: AsyncClient, root: &str) -> Self {
        Self {
            client,
            root: root.to_string(),
        }
    }
}

impl Telemetry for MqttTelemetry {
    fn publish(&self, name: &str, payload: String, retain: bool) {
        let topic = format!("{}/{name}", self.root);
        if let Err(e) = self
            .client
            .try_publish(topic.as_str(), QoS::AtMostOnce, retain, payload)
        {
            warn!(%topic, "telemetry publish dropped: {e}");
        }
    }

    fn log(&self, message: &str) {
        info!(target: "well_monitor::telemetry", "{message}");
        self.publish("log", message.to_string(), false);
    }
}

/// Drive the MQTT event loop so queued publishes reach the broker.
/// Intended to be `tokio::spawn`-ed from main; never returns.
pub(crate) async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-cycle state publication
// ---------------------------------------------------------------------------

pub(crate) fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Publish the per-cycle snapshot as individual named values plus a JSON
/// summary on `state`.
pub(crate) fn publish_snapshot(telemetry: &dyn Telemetry, snap: &Snapshot) {
    let st = &snap.state;

    // Request inputs are active-low: a high line means "not requesting".
    telemetry.publish("water_request/1", u8::from(!st.req1_requested).to_string(), false);
    telemetry.publish("water_request/2", u8::from(!st.req2_requested).to_string(), false);

    telemetry.publish("pump", on_off(st.pump_on).to_string(), false);
    telemetry.publish("pump/pump_ok", u8::from(st.pump_ok).to_string(), false);
    telemetry.publish("pump/backoff", on_off(st.backoff_active).to_string(), true);
    telemetry.publish(
        "pump/pump_not_ok_count",
        st.pump_not_ok_count.to_string(),
        true,
    );

    telemetry.publish("pump/mains_volts", format!("{:.2}", st.voltage_volts), false);
    telemetry.publish("pump/current_amps", format!("{:.2}", st.current_amps), false);
    telemetry.publish("pump/power_watts", format!("{:.2}", st.power_watts), false);

    telemetry.publish(
        "pump/backoff_timeout_seconds",
        st.backoff_timeout_remaining_secs.to_string(),
        false,
    );

    let summary = json!({
        "state": on_off(st.pump_on),
        "current": (st.current_amps * 100.0).round() / 100.0,
        "power": st.power_watts.round(),
        "ts": snap.ts,
    });
    telemetry.publish("state", summary.to_string(), true);
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Captures everything published so tests can assert on it.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingTelemetry {
    pub(crate) published: std::sync::Mutex<Vec<(String, String, bool)>>,
    pub(crate) logs: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingTelemetry {
    /// Most recent payload published under `name`.
    pub(crate) fn last(&self, name: &str) -> Option<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _, _)| n == name)
            .map(|(_, p, _)| p.clone())
    }

    pub(crate) fn logged(&self, needle: &str) -> bool {
        self.logs.lock().unwrap().iter().any(|l| l.contains(needle))
    }
}

#[cfg(test)]
impl Telemetry for RecordingTelemetry {
    fn publish(&self, name: &str, payload: String, retain: bool) {
        self.published
            .lock()
            .unwrap()
            .push((name.to_string(), payload, retain));
    }

    fn log(&self, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }
}

// ===========================================================================
// Tests
// ===========================================================================
