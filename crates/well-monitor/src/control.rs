//! The control cycle: sense → decide → actuate → report, on a fixed period.
//!
//! ```text
//! poll requests ─▶ measure power ─▶ refresh backoff ─▶ classify ─▶ resolve relay
//!                                                                      │
//!                        diagnostic raw read ◀── publish snapshot ◀────┘
//! ```
//!
//! A cycle never fails as a whole. A skipped measurement keeps the previous
//! readings and skips classification for that cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::channel::SharedChannel;
use crate::config::Config;
use crate::fault::FaultBackoffMonitor;
use crate::gpio::{InputLine, OutputLine};
use crate::pump::PumpController;
use crate::requests::RequestArbiter;
use crate::sampler::PowerSampler;
use crate::state::{Snapshot, SystemState};
use crate::telemetry::{self, Telemetry};

/// Everything the loop touches on the outside.
pub(crate) struct Hardware {
    pub(crate) relay: OutputLine,
    pub(crate) indicator: OutputLine,
    pub(crate) req1: InputLine,
    pub(crate) req2: InputLine,
    pub(crate) channel: SharedChannel,
}

pub(crate) struct ControlLoop {
    arbiter: RequestArbiter,
    sampler: PowerSampler,
    monitor: FaultBackoffMonitor,
    pump: PumpController,
    channel: SharedChannel,
    telemetry: Arc<dyn Telemetry>,
    state: SystemState,
    period: Duration,
    dc_offset_volts: f64,
}

impl ControlLoop {
    pub(crate) fn new(cfg: &Config, hw: Hardware, telemetry: Arc<dyn Telemetry>) -> Self {
        let Hardware {
            relay,
            indicator,
            req1,
            req2,
            channel,
        } = hw;

        Self {
            arbiter: RequestArbiter::new(req1, req2, telemetry.clone()),
            sampler: PowerSampler::new(cfg.sampler.clone(), telemetry.clone()),
            monitor: FaultBackoffMonitor::new(
                cfg.fault.clone(),
                indicator,
                relay.clone(),
                telemetry.clone(),
            ),
            pump: PumpController::new(relay),
            channel,
            telemetry,
            state: SystemState::default(),
            period: cfg.control.cycle_period(),
            dc_offset_volts: cfg.sampler.dc_offset_volts,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &SystemState {
        &self.state
    }

    /// Run cycles forever. A long cycle delays the next tick instead of
    /// triggering a burst of catch-up cycles.
    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_secs = self.period.as_secs(), "control loop started");

        loop {
            ticker.tick().await;
            let snap = self.run_cycle().await;
            debug!(
                pump_on = snap.state.pump_on,
                backoff = snap.state.backoff_active,
                count = snap.state.pump_not_ok_count,
                "cycle complete"
            );
        }
    }

    /// One full cycle in fixed order. Returns what was published.
    pub(crate) async fn run_cycle(&mut self) -> Snapshot {
        let requests = self.arbiter.poll();
        self.state.record_requests(requests);

        let reading = match self.sampler.measure(&self.channel).await {
            Ok(reading) => {
                self.state.record_reading(reading);
                Some(reading)
            }
            Err(e) => {
                warn!("keeping previous power reading: {e}");
                None
            }
        };

        self.monitor.refresh(&mut self.state);
        if let Some(reading) = reading {
            self.monitor.evaluate(reading.power_watts, &mut self.state);
        }

        self.state.pump_on = self.pump.resolve(
            self.state.req1_requested,
            self.state.req2_requested,
            self.state.backoff_active,
        );

        let snap = self.state.snapshot();
        telemetry::publish_snapshot(self.telemetry.as_ref(), &snap);

        self.publish_raw_diagnostics().await;

        snap
    }

    /// Single conversion for calibration, under the same lock as sampling.
    async fn publish_raw_diagnostics(&self) {
        let mut guard = match self.channel.acquire().await {
            Ok(guard) => guard,
            Err(busy) => {
                self.telemetry
                    .log(&format!("unable to lock analog channel for raw read: {busy}"));
                return;
            }
        };

        let raw = match guard.read_raw() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("raw diagnostic read failed: {e:#}");
                return;
            }
        };
        let millivolts = raw as f64 * guard.volts_per_count() * 1000.0;
        drop(guard);

        self.telemetry.publish("raw/adc_value", raw.to_string(), false);
        self.telemetry
            .publish("raw/adc_mv", format!("{millivolts:.0}"), false);
        self.telemetry.publish(
            "raw/adc_adjusted_mv",
            format!("{:.0}", millivolts - self.dc_offset_volts * 1000.0),
            false,
        );
    }
}

// ===========================================================================
// Tests
// ===========================================================================
