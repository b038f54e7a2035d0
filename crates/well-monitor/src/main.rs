mod adc;
mod channel;
mod config;
mod control;
mod fault;
mod gpio;
mod pump;
mod requests;
mod sampler;
#[cfg(all(feature = "sim", not(feature = "gpio")))]
mod sim;
mod state;
mod telemetry;

#[cfg(not(any(feature = "gpio", feature = "sim")))]
compile_error!("enable the `gpio` feature (ADS1115) or the `sim` feature (simulated CT clamp)");

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, MqttOptions};
use std::{env, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

use adc::AnalogInput;
use channel::SharedChannel;
use config::Config;
use control::{ControlLoop, Hardware};
use gpio::{InputLine, OutputLine};
use telemetry::{MqttTelemetry, Telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config file + env overrides ─────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "well-monitor.toml".to_string());
    let mut cfg = config::load(&config_path)?;
    if let Ok(host) = env::var("MQTT_HOST") {
        cfg.mqtt.host = host;
    }
    if let Ok(port) = env::var("MQTT_PORT") {
        cfg.mqtt.port = port
            .parse()
            .with_context(|| format!("MQTT_PORT is not a valid port: {port}"))?;
    }
    cfg.validate()?;

    // ── Digital lines (relay and indicator start low) ───────────────
    let relay = OutputLine::new("pump_relay", cfg.pins.pump_relay)?;
    let indicator = OutputLine::new("backoff_indicator", cfg.pins.backoff_indicator)?;
    let req1 = InputLine::new("request_1", cfg.pins.request_1)?;
    let req2 = InputLine::new("request_2", cfg.pins.request_2)?;

    #[cfg(all(feature = "sim", not(feature = "gpio")))]
    sim::apply_requests(
        &env::var("SIM_REQUESTS").unwrap_or_default(),
        &req1,
        &req2,
    );

    // ── Analog channel ──────────────────────────────────────────────
    let input = open_analog_input(&cfg, &relay)?;
    let channel = SharedChannel::new(input, cfg.control.lock_timeout());

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new(cfg.mqtt.client_id.clone(), cfg.mqtt.host.clone(), cfg.mqtt.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, eventloop) = AsyncClient::new(mqttoptions, 64);
    tokio::spawn(telemetry::drive(eventloop));
    let telemetry = Arc::new(MqttTelemetry::new(client, &cfg.mqtt.root));

    info!(
        broker = %cfg.mqtt.host,
        port = cfg.mqtt.port,
        root = %cfg.mqtt.root,
        cycle_secs = cfg.control.cycle_period_secs,
        "well monitor setup complete"
    );
    telemetry.log("well monitor setup complete");

    let hw = Hardware {
        relay,
        indicator,
        req1,
        req2,
        channel,
    };
    ControlLoop::new(&cfg, hw, telemetry).run().await;

    Ok(())
}

#[cfg(feature = "gpio")]
fn open_analog_input(cfg: &Config, _relay: &OutputLine) -> Result<Box<dyn AnalogInput>> {
    let adc = adc::Ads1115::open(cfg.adc.address, cfg.adc.channel)?;
    Ok(Box::new(adc))
}

#[cfg(all(feature = "sim", not(feature = "gpio")))]
fn open_analog_input(cfg: &Config, relay: &OutputLine) -> Result<Box<dyn AnalogInput>> {
    let scenario = sim::Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    Ok(Box::new(sim::CtClampSim::new(scenario, relay.clone(), &cfg.sampler)))
}
