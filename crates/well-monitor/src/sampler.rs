//! RMS current and apparent power from the current-transformer channel.
//!
//! One measurement takes `sample_count` conversions back to back while
//! holding the shared channel, so it is the longest step in a cycle. The
//! conversions run on a blocking worker; the owned lock guard travels with
//! them and is released when the worker finishes.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::adc::AnalogInput;
use crate::channel::{ChannelBusy, SharedChannel};
use crate::config::SamplerConfig;
use crate::telemetry::Telemetry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PowerReading {
    /// Assumed line voltage; not measured.
    pub voltage_volts: f64,
    pub current_amps: f64,
    /// Apparent power (V × I_rms, no power factor).
    pub power_watts: f64,
}

#[derive(Debug)]
pub(crate) enum SampleError {
    ChannelBusy(ChannelBusy),
    Adc(anyhow::Error),
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelBusy(busy) => write!(f, "{busy}"),
            Self::Adc(e) => write!(f, "adc read failed: {e:#}"),
        }
    }
}

impl std::error::Error for SampleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ChannelBusy(busy) => Some(busy),
            Self::Adc(e) => Some(&**e),
        }
    }
}

pub(crate) struct PowerSampler {
    cfg: SamplerConfig,
    telemetry: Arc<dyn Telemetry>,
}

impl PowerSampler {
    pub(crate) fn new(cfg: SamplerConfig, telemetry: Arc<dyn Telemetry>) -> Self {
        Self { cfg, telemetry }
    }

    /// Take one RMS measurement. Fails fast with
    /// [`SampleError::ChannelBusy`] if the channel is not free within the
    /// bounded wait; there is no retry.
    pub(crate) async fn measure(&self, channel: &SharedChannel) -> Result<PowerReading, SampleError> {
        let started = Instant::now();

        let guard = match channel.acquire().await {
            Ok(guard) => guard,
            Err(busy) => {
                warn!("power sample skipped: {busy}");
                self.telemetry
                    .log(&format!("unable to lock analog channel for power sample: {busy}"));
                return Err(SampleError::ChannelBusy(busy));
            }
        };

        let cfg = self.cfg.clone();
        let acc = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            accumulate(&mut **guard, &cfg)
        })
        .await
        .map_err(|e| SampleError::Adc(anyhow::Error::new(e)))?
        .map_err(SampleError::Adc)?;

        let current_amps = rms_current(acc, self.cfg.sample_count, self.cfg.noise_floor_amps);
        let reading = PowerReading {
            voltage_volts: self.cfg.line_voltage_volts,
            current_amps,
            power_watts: self.cfg.line_voltage_volts * current_amps,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            elapsed_ms,
            current_amps = format_args!("{:.2}", reading.current_amps),
            power_watts = format_args!("{:.0}", reading.power_watts),
            "power sampled"
        );
        self.telemetry
            .publish("metrics/power_sample_ms", elapsed_ms.to_string(), false);
        self.telemetry.log(&format!(
            "power sample: {:.2} A, {:.0} VA in {elapsed_ms} ms",
            reading.current_amps, reading.power_watts
        ));

        Ok(reading)
    }
}

// ---------------------------------------------------------------------------
// Signal chain
// ---------------------------------------------------------------------------

/// Primary-side current for one raw conversion: remove the divider bias,
/// convert burden voltage to secondary current, scale by the turns ratio.
pub(crate) fn primary_current(raw: i32, volts_per_count: f64, cfg: &SamplerConfig) -> f64 {
    let volts = raw as f64 * volts_per_count - cfg.dc_offset_volts;
    (volts / cfg.burden_ohms) * cfg.turns_ratio
}

/// Sum of squared primary currents over `sample_count` conversions.
fn accumulate(input: &mut dyn AnalogInput, cfg: &SamplerConfig) -> anyhow::Result<f64> {
    let volts_per_count = input.volts_per_count();
    let mut acc = 0.0;
    for _ in 0..cfg.sample_count {
        let amps = primary_current(input.read_raw()?, volts_per_count, cfg);
        acc += amps * amps;
    }
    Ok(acc)
}

/// `sqrt(acc / n)`, clamped to exactly zero below the noise floor.
pub(crate) fn rms_current(acc: f64, sample_count: usize, noise_floor_amps: f64) -> f64 {
    if sample_count == 0 {
        return 0.0;
    }
    let rms = (acc / sample_count as f64).sqrt();
    if rms < noise_floor_amps {
        0.0
    } else {
        rms
    }
}

// ===========================================================================
// Tests
// ===========================================================================
