use serde::Serialize;
use time::OffsetDateTime;

use crate::requests::WaterRequests;
use crate::sampler::PowerReading;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// The control loop's single mutable record. Owned by
/// [`crate::control::ControlLoop`] and passed by `&mut` to each step in
/// turn; every field has exactly one owning step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemState {
    /// Re-read from the backoff indicator every cycle.
    pub backoff_active: bool,
    pub backoff_timeout_remaining_secs: u64,
    /// Consecutive in-band readings; reset by any out-of-band reading.
    pub pump_not_ok_count: u32,
    pub pump_on: bool,
    pub pump_ok: bool,

    /// Raw level of request input 1 (high = `true`). The inputs are
    /// active-low, so `true` means resident 1 is not calling for water.
    pub req1_requested: bool,
    /// Raw level of request input 2, same convention as `req1_requested`.
    pub req2_requested: bool,

    pub voltage_volts: f64,
    pub current_amps: f64,
    pub power_watts: f64,
}

/// What the telemetry collaborator receives once per cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub ts: i64,
    #[serde(flatten)]
    pub state: SystemState,
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn record_requests(&mut self, requests: WaterRequests) {
        self.req1_requested = requests.req1;
        self.req2_requested = requests.req2;
    }

    pub fn record_reading(&mut self, reading: PowerReading) {
        self.voltage_volts = reading.voltage_volts;
        self.current_amps = reading.current_amps;
        self.power_watts = reading.power_watts;
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            ts: OffsetDateTime::now_utc().unix_timestamp(),
            state: self.clone(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
