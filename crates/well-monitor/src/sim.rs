//! Simulated current-transformer front end for running without hardware.
//!
//! Models a 12-bit, 3.3 V ADC sampling the burden resistor of a CT clamp on
//! the pump's supply line:
//! - Sine primary current, 20 samples per mains cycle
//! - Amplitude chosen by scenario, and zero whenever the relay is open
//! - Per-conversion electronic noise

use std::f64::consts::{PI, SQRT_2};
use std::fmt;

use crate::adc::AnalogInput;
use crate::config::SamplerConfig;
use crate::gpio::{InputLine, OutputLine};

const FULL_SCALE: i32 = 4095;
const VOLTS_PER_COUNT: f64 = 3.3 / 4096.0;
const SAMPLES_PER_CYCLE: u32 = 20;
const NOISE_SIGMA_COUNTS: f64 = 2.0;

/// Sum of 12 uniforms minus 6, close enough to N(0,1) for ADC noise.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Pump behaviour selected via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Pump moving water: about 14 A, well above the dry-run band.
    Healthy,
    /// Pump running dry: about 10 A, inside the dry-run band at 120 V.
    Dry,
    /// Pump never draws current, e.g. a tripped breaker.
    Off,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "dry" => Self::Dry,
            "off" => Self::Off,
            _ => Self::Healthy,
        }
    }

    /// RMS primary current while the relay is closed.
    fn running_amps(self) -> f64 {
        match self {
            Self::Healthy => 14.0,
            Self::Dry => 10.0,
            Self::Off => 0.0,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Dry => write!(f, "dry"),
            Self::Off => write!(f, "off"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct CtClampSim {
    scenario: Scenario,
    relay: OutputLine,
    dc_offset_volts: f64,
    burden_ohms: f64,
    turns_ratio: f64,
    noise_sigma: f64,
    step: u32,
}

impl CtClampSim {
    pub(crate) fn new(scenario: Scenario, relay: OutputLine, cfg: &SamplerConfig) -> Self {
        tracing::info!(%scenario, "[sim] CT clamp simulator active");
        Self {
            scenario,
            relay,
            dc_offset_volts: cfg.dc_offset_volts,
            burden_ohms: cfg.burden_ohms,
            turns_ratio: cfg.turns_ratio,
            noise_sigma: NOISE_SIGMA_COUNTS,
            step: 0,
        }
    }

    #[cfg(test)]
    fn noiseless(mut self) -> Self {
        self.noise_sigma = 0.0;
        self
    }

    /// Instantaneous burden voltage for the current phase step, bias included.
    fn burden_volts(&self) -> f64 {
        let amps_rms = if self.relay.is_set() {
            self.scenario.running_amps()
        } else {
            0.0
        };
        let phase = 2.0 * PI * self.step as f64 / SAMPLES_PER_CYCLE as f64;
        let primary = amps_rms * SQRT_2 * phase.sin();
        self.dc_offset_volts + primary / self.turns_ratio * self.burden_ohms
    }
}

impl AnalogInput for CtClampSim {
    fn read_raw(&mut self) -> anyhow::Result<i32> {
        let counts = self.burden_volts() / VOLTS_PER_COUNT + self.noise_sigma * approx_std_normal();
        self.step = (self.step + 1) % SAMPLES_PER_CYCLE;
        Ok((counts.round() as i32).clamp(0, FULL_SCALE))
    }

    fn volts_per_count(&self) -> f64 {
        VOLTS_PER_COUNT
    }
}

// ---------------------------------------------------------------------------
// Request inputs
// ---------------------------------------------------------------------------

/// Drive the mock request inputs from `SIM_REQUESTS` (`none`, `1`, `2` or
/// `both`). Unknown values fall back to resident 1 only.
pub(crate) fn apply_requests(levels: &str, req1: &InputLine, req2: &InputLine) {
    let (one, two) = match levels.to_ascii_lowercase().as_str() {
        "none" => (false, false),
        "2" => (false, true),
        "both" => (true, true),
        _ => (true, false),
    };
    // Active-low: a request pulls the line down.
    req1.set_level(!one);
    req2.set_level(!two);
    tracing::info!(req1 = one, req2 = two, "[sim] request inputs set");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(closed: bool) -> OutputLine {
        let line = OutputLine::new("pump_relay", 17).unwrap();
        line.set(closed);
        line
    }

    /// RMS amps recovered from one full mains cycle of raw conversions.
    fn rms_over_cycle(sim: &mut CtClampSim, cfg: &SamplerConfig) -> f64 {
        let mut acc = 0.0;
        for _ in 0..SAMPLES_PER_CYCLE {
            let raw = sim.read_raw().unwrap();
            let amps = crate::sampler::primary_current(raw, sim.volts_per_count(), cfg);
            acc += amps * amps;
        }
        (acc / SAMPLES_PER_CYCLE as f64).sqrt()
    }

    #[test]
    fn scenario_parsing() {
        assert_eq!(Scenario::from_str_lossy("DRY"), Scenario::Dry);
        assert_eq!(Scenario::from_str_lossy("off"), Scenario::Off);
        assert_eq!(Scenario::from_str_lossy("healthy"), Scenario::Healthy);
        assert_eq!(Scenario::from_str_lossy("bogus"), Scenario::Healthy);
        assert_eq!(Scenario::Dry.to_string(), "dry");
    }

    #[test]
    fn running_current_matches_scenario() {
        let cfg = SamplerConfig::default();
        for (scenario, amps) in [(Scenario::Healthy, 14.0), (Scenario::Dry, 10.0)] {
            let mut sim = CtClampSim::new(scenario, relay(true), &cfg).noiseless();
            let rms = rms_over_cycle(&mut sim, &cfg);
            assert!((rms - amps).abs() < 0.2, "{scenario}: {rms}");
        }
    }

    #[test]
    fn open_relay_reads_bias_only() {
        let cfg = SamplerConfig::default();
        let mut sim = CtClampSim::new(Scenario::Healthy, relay(false), &cfg).noiseless();
        assert!(rms_over_cycle(&mut sim, &cfg) < cfg.noise_floor_amps);
    }

    #[test]
    fn follows_relay_changes() {
        let cfg = SamplerConfig::default();
        let line = relay(false);
        let mut sim = CtClampSim::new(Scenario::Dry, line.clone(), &cfg).noiseless();
        assert!(rms_over_cycle(&mut sim, &cfg) < cfg.noise_floor_amps);

        line.set(true);
        assert!(rms_over_cycle(&mut sim, &cfg) > 9.5);
    }

    #[test]
    fn noisy_reads_stay_in_range() {
        let cfg = SamplerConfig::default();
        let mut sim = CtClampSim::new(Scenario::Healthy, relay(true), &cfg);
        for _ in 0..1000 {
            let raw = sim.read_raw().unwrap();
            assert!((0..=FULL_SCALE).contains(&raw));
        }
    }

    #[test]
    fn request_setting_drives_active_low_levels() {
        let req1 = InputLine::new("request_1", 22).unwrap();
        let req2 = InputLine::new("request_2", 23).unwrap();

        apply_requests("both", &req1, &req2);
        assert!(!req1.is_high() && !req2.is_high());

        apply_requests("none", &req1, &req2);
        assert!(req1.is_high() && req2.is_high());

        apply_requests("2", &req1, &req2);
        assert!(req1.is_high() && !req2.is_high());

        apply_requests("", &req1, &req2);
        assert!(!req1.is_high() && req2.is_high());
    }
}
