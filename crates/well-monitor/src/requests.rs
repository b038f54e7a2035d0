//! Water-request inputs from the two residences.
//!
//! Both lines are pulled up and switched to ground by the resident's
//! switch, so low means "water requested". The levels are passed on raw
//! (high = `true`), without debouncing; inversion for display happens in
//! telemetry.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use crate::gpio::InputLine;
use crate::telemetry::Telemetry;

/// Raw request levels for one poll. `true` = line high = not requesting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaterRequests {
    pub req1: bool,
    pub req2: bool,
}

pub(crate) struct RequestArbiter {
    req1: InputLine,
    req2: InputLine,
    telemetry: Arc<dyn Telemetry>,
}

impl RequestArbiter {
    pub(crate) fn new(req1: InputLine, req2: InputLine, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            req1,
            req2,
            telemetry,
        }
    }

    /// Read both inputs once.
    pub(crate) fn poll(&self) -> WaterRequests {
        let started = Instant::now();

        let requests = WaterRequests {
            req1: self.req1.is_high(),
            req2: self.req2.is_high(),
        };

        debug!(
            req1_line = self.req1.name(),
            req1 = requests.req1,
            req2_line = self.req2.name(),
            req2 = requests.req2,
            "request inputs polled"
        );
        self.telemetry.publish(
            "metrics/request_poll_ms",
            started.elapsed().as_millis().to_string(),
            false,
        );

        requests
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;
    use crate::telemetry::RecordingTelemetry;

    fn arbiter() -> (RequestArbiter, InputLine, InputLine, Arc<RecordingTelemetry>) {
        let req1 = InputLine::new("request_1", 22).unwrap();
        let req2 = InputLine::new("request_2", 23).unwrap();
        let rec = Arc::new(RecordingTelemetry::default());
        let arbiter = RequestArbiter::new(req1.clone(), req2.clone(), rec.clone());
        (arbiter, req1, req2, rec)
    }

    #[test]
    fn idle_lines_read_high() {
        let (arbiter, _, _, _) = arbiter();
        assert_eq!(
            arbiter.poll(),
            WaterRequests {
                req1: true,
                req2: true
            }
        );
    }

    #[test]
    fn pulled_low_line_reads_false() {
        let (arbiter, req1, _, _) = arbiter();
        req1.set_level(false);
        assert_eq!(
            arbiter.poll(),
            WaterRequests {
                req1: false,
                req2: true
            }
        );
    }

    #[test]
    fn each_poll_reflects_instantaneous_level() {
        let (arbiter, _, req2, _) = arbiter();
        req2.set_level(false);
        assert!(!arbiter.poll().req2);
        req2.set_level(true);
        assert!(arbiter.poll().req2);
        req2.set_level(false);
        assert!(!arbiter.poll().req2);
    }

    #[test]
    fn poll_publishes_timing_metric() {
        let (arbiter, _, _, rec) = arbiter();
        arbiter.poll();
        assert!(rec.last("metrics/request_poll_ms").is_some());
    }
}
