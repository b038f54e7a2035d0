//! TOML config file loading and validation for the sampler, fault
//! protection, control cycle, MQTT telemetry and pin assignments.
//!
//! Every field has a default matching the deployed hardware, so an empty or
//! missing file yields a working configuration.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampler: SamplerConfig,
    pub fault: FaultConfig,
    pub control: ControlConfig,
    pub mqtt: MqttConfig,
    pub pins: PinConfig,
    pub adc: AdcConfig,
}

/// RMS measurement constants for the current transformer front end.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Samples accumulated per RMS measurement.
    pub sample_count: usize,
    /// Bias applied by the voltage divider (half the ADC input range).
    pub dc_offset_volts: f64,
    pub burden_ohms: f64,
    /// CT secondary turns (1:N).
    pub turns_ratio: f64,
    /// Assumed mains voltage; not measured.
    pub line_voltage_volts: f64,
    /// RMS currents below this are reported as exactly 0 A.
    pub noise_floor_amps: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_count: 1000,
            dc_offset_volts: 1.65,
            burden_ohms: 100.0,
            turns_ratio: 2000.0,
            line_voltage_volts: 120.0,
            noise_floor_amps: 0.5,
        }
    }
}

/// Dry-run detection band and backoff policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    pub bad_load_watts_low: f64,
    pub bad_load_watts_high: f64,
    /// Consecutive in-band readings that trigger a backoff.
    pub fault_limit: u32,
    pub cooldown_secs: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            bad_load_watts_low: 1000.0,
            bad_load_watts_high: 1500.0,
            fault_limit: 3,
            cooldown_secs: 2 * 60 * 60,
        }
    }
}

impl FaultConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub cycle_period_secs: u64,
    /// Bounded wait for the shared analog channel.
    pub lock_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle_period_secs: 10,
            lock_timeout_ms: 100,
        }
    }
}

impl ControlConfig {
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(self.cycle_period_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topic prefix for every published value, e.g. `well/monitor`.
    pub root: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "well-monitor".to_string(),
            root: "well/monitor".to_string(),
        }
    }
}

/// BCM pin numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub pump_relay: u8,
    pub backoff_indicator: u8,
    pub request_1: u8,
    pub request_2: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            pump_relay: 17,
            backoff_indicator: 27,
            request_1: 22,
            request_2: 23,
        }
    }
}

/// ADS1115 wiring for the current sensor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    pub address: u16,
    pub channel: usize,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            address: 0x48,
            channel: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Hardware limits
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// ADS1115 ADDR-pin strapping options.
const ADS1115_ADDRESSES: std::ops::RangeInclusive<u16> = 0x48..=0x4B;

const ADS1115_MAX_CHANNEL: usize = 3;

/// Longest accepted cooldown (one week).
const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_sampler(&mut errors);
        self.validate_fault(&mut errors);
        self.validate_control(&mut errors);
        self.validate_mqtt(&mut errors);
        self.validate_pins(&mut errors);
        self.validate_adc(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_sampler(&self, errors: &mut Vec<String>) {
        let s = &self.sampler;

        if s.sample_count == 0 {
            errors.push("sampler: sample_count must be positive".to_string());
        }
        for (name, value) in [
            ("burden_ohms", s.burden_ohms),
            ("turns_ratio", s.turns_ratio),
            ("line_voltage_volts", s.line_voltage_volts),
        ] {
            if !(value > 0.0) {
                errors.push(format!("sampler: {name} must be positive, got {value}"));
            }
        }
        if !(s.dc_offset_volts >= 0.0) {
            errors.push(format!(
                "sampler: dc_offset_volts must not be negative, got {}",
                s.dc_offset_volts
            ));
        }
        if !(s.noise_floor_amps >= 0.0) {
            errors.push(format!(
                "sampler: noise_floor_amps must not be negative, got {}",
                s.noise_floor_amps
            ));
        }
    }

    fn validate_fault(&self, errors: &mut Vec<String>) {
        let f = &self.fault;

        if !(f.bad_load_watts_low <= f.bad_load_watts_high) {
            errors.push(format!(
                "fault: bad_load_watts_low ({}) must not exceed bad_load_watts_high ({})",
                f.bad_load_watts_low, f.bad_load_watts_high
            ));
        }
        if f.fault_limit == 0 {
            errors.push("fault: fault_limit must be at least 1".to_string());
        }
        if f.cooldown_secs == 0 {
            errors.push("fault: cooldown_secs must be positive".to_string());
        } else if f.cooldown_secs > MAX_COOLDOWN_SECS {
            errors.push(format!(
                "fault: cooldown_secs must not exceed {MAX_COOLDOWN_SECS}, got {}",
                f.cooldown_secs
            ));
        }
    }

    fn validate_control(&self, errors: &mut Vec<String>) {
        if self.control.cycle_period_secs == 0 {
            errors.push("control: cycle_period_secs must be positive".to_string());
        }
        if self.control.lock_timeout_ms == 0 {
            errors.push("control: lock_timeout_ms must be positive".to_string());
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt: host is empty".to_string());
        }
        if self.mqtt.port == 0 {
            errors.push("mqtt: port must be positive".to_string());
        }
        if self.mqtt.client_id.trim().is_empty() {
            errors.push("mqtt: client_id is empty".to_string());
        }
        if self.mqtt.root.trim().is_empty() || self.mqtt.root.ends_with('/') {
            errors.push(format!(
                "mqtt: root '{}' must be non-empty without a trailing '/'",
                self.mqtt.root
            ));
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let p = &self.pins;
        let mut seen: HashSet<u8> = HashSet::new();

        for (name, pin) in [
            ("pump_relay", p.pump_relay),
            ("backoff_indicator", p.backoff_indicator),
            ("request_1", p.request_1),
            ("request_2", p.request_2),
        ] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "pins: {name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("pins: {name} {pin} is already used by another line"));
            }
        }
    }

    fn validate_adc(&self, errors: &mut Vec<String>) {
        if !ADS1115_ADDRESSES.contains(&self.adc.address) {
            errors.push(format!(
                "adc: address 0x{:02x} is not an ADS1115 address (0x48-0x4b)",
                self.adc.address
            ));
        }
        if self.adc.channel > ADS1115_MAX_CHANNEL {
            errors.push(format!(
                "adc: channel {} out of range (0-{ADS1115_MAX_CHANNEL})",
                self.adc.channel
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file. A missing file yields the defaults;
/// validation is left to the caller so env overrides can be applied first.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        tracing::info!(path, "config file not found, using defaults");
        return Ok(Config::default());
    }

    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;

    tracing::info!(path, "config loaded");
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
