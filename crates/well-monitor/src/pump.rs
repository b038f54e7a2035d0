//! Relay resolution: combines the request levels and the backoff state
//! into the single relay command for this cycle.

use tracing::info;

use crate::gpio::OutputLine;
use crate::telemetry::on_off;

/// Whether the pump should run. Precedence:
/// 1. both request lines high (nobody wants water) → off
/// 2. backoff active → off
/// 3. otherwise → on
pub(crate) fn decide(req1: bool, req2: bool, backoff_active: bool) -> bool {
    if req1 && req2 {
        false
    } else {
        !backoff_active
    }
}

pub(crate) struct PumpController {
    relay: OutputLine,
}

impl PumpController {
    pub(crate) fn new(relay: OutputLine) -> Self {
        Self { relay }
    }

    /// Drive the relay to the decided level and return it. Call at most
    /// once per cycle.
    pub(crate) fn resolve(&self, req1: bool, req2: bool, backoff_active: bool) -> bool {
        let on = decide(req1, req2, backoff_active);
        if self.relay.is_set() != on {
            info!(req1, req2, backoff_active, "pump relay {}", on_off(on));
        }
        self.relay.set(on);
        on
    }
}

// ===========================================================================
// Tests
// ===========================================================================
