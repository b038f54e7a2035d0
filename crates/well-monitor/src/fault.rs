//! Dry-run protection: a debounce counter over the power reading plus a
//! one-shot cooldown timer.
//!
//! ## State machine
//!
//! ```text
//!        in band            in band (count < limit)
//!  OK ────────────▶ WARMING ───────────────┐
//!   ▲                  │  ◀────────────────┘
//!   │  out of band     │ in band, count reaches limit
//!   └──────────────────┤
//!                      ▼
//!               BACKOFF_ACTIVE ──[cooldown expiry clears indicator]──▶ OK / WARMING
//! ```
//!
//! The cooldown timer's only effect is clearing the backoff indicator. The
//! in-memory `backoff_active` flag is re-read from the indicator at the start
//! of every cycle, so the timer task never touches [`SystemState`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::FaultConfig;
use crate::gpio::OutputLine;
use crate::state::SystemState;
use crate::telemetry::Telemetry;

// ---------------------------------------------------------------------------
// Cooldown timer
// ---------------------------------------------------------------------------

/// One-shot countdown that clears the backoff indicator on expiry. Reused
/// across backoff episodes; only the background task is re-spawned.
pub(crate) struct CooldownTimer {
    duration: Duration,
    indicator: OutputLine,
    deadline: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

impl CooldownTimer {
    fn new(duration: Duration, indicator: OutputLine) -> Self {
        Self {
            duration,
            indicator,
            deadline: None,
            task: None,
        }
    }

    /// Arm the countdown from now. Fails if there is no runtime to host it
    /// or the deadline is not representable.
    fn start(&mut self) -> Result<()> {
        let handle = Handle::try_current().context("no runtime available for the cooldown timer")?;

        let deadline = Instant::now()
            .checked_add(self.duration)
            .context("cooldown deadline out of range")?;
        let indicator = self.indicator.clone();
        self.task = Some(handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            indicator.set(false);
            info!("cooldown expired, backoff indicator cleared");
        }));
        self.deadline = Some(deadline);
        Ok(())
    }

    pub(crate) fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub(crate) struct FaultBackoffMonitor {
    cfg: FaultConfig,
    indicator: OutputLine,
    relay: OutputLine,
    /// Created on the first limit breach.
    timer: Option<CooldownTimer>,
    telemetry: Arc<dyn Telemetry>,
}

impl FaultBackoffMonitor {
    pub(crate) fn new(
        cfg: FaultConfig,
        indicator: OutputLine,
        relay: OutputLine,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            cfg,
            indicator,
            relay,
            timer: None,
            telemetry,
        }
    }

    /// Closed interval: both endpoints count as a fault.
    pub(crate) fn in_fault_band(&self, power_watts: f64) -> bool {
        (self.cfg.bad_load_watts_low..=self.cfg.bad_load_watts_high).contains(&power_watts)
    }

    /// Start-of-cycle bookkeeping: take `backoff_active` from the indicator
    /// and refresh the remaining cooldown.
    pub(crate) fn refresh(&self, state: &mut SystemState) {
        let indicator_set = self.indicator.is_set();
        if state.backoff_active && !indicator_set {
            info!("backoff released by cooldown expiry");
            self.telemetry.log("backoff released, pump re-enabled");
        }
        state.backoff_active = indicator_set;
        self.update_remaining(state);
    }

    /// Classify a fresh power reading.
    pub(crate) fn evaluate(&mut self, power_watts: f64, state: &mut SystemState) {
        if !self.in_fault_band(power_watts) {
            state.pump_ok = true;
            state.pump_not_ok_count = 0;
            return;
        }

        state.pump_ok = false;
        state.pump_not_ok_count = state.pump_not_ok_count.saturating_add(1);
        warn!(
            power_watts = format_args!("{power_watts:.0}"),
            count = state.pump_not_ok_count,
            limit = self.cfg.fault_limit,
            "power draw in dry-run band"
        );

        if state.pump_not_ok_count >= self.cfg.fault_limit {
            self.indicator.set(true);
            self.relay.set(false);
            state.backoff_active = true;
            state.pump_on = false;
            self.arm_cooldown();
        }

        self.update_remaining(state);
    }

    fn arm_cooldown(&mut self) {
        let cooldown = self.cfg.cooldown();
        let created = self.timer.is_none();
        let timer = self
            .timer
            .get_or_insert_with(|| CooldownTimer::new(cooldown, self.indicator.clone()));

        if !created && timer.is_active() {
            let remaining = timer.remaining().as_secs();
            info!(remaining_secs = remaining, "backoff timer already running");
            self.telemetry.log(&format!(
                "pump backoff: timer already running, {remaining} s remaining"
            ));
            return;
        }

        let action = if created { "created" } else { "restarted" };
        match timer.start() {
            Ok(()) => {
                info!(cooldown_secs = cooldown.as_secs(), "backoff timer {action}");
                self.telemetry.log(&format!(
                    "pump backoff: timer {action}, pump disabled for {} s",
                    cooldown.as_secs()
                ));
            }
            Err(e) => {
                let verb = if created { "started" } else { "restarted" };
                error!("backoff timer could not be {verb}: {e:#}");
                self.telemetry
                    .log(&format!("ERROR: backoff timer could not be {verb}: {e:#}"));
            }
        }
    }

    fn update_remaining(&self, state: &mut SystemState) {
        state.backoff_timeout_remaining_secs = match &self.timer {
            Some(timer) if timer.is_active() => timer.remaining().as_secs(),
            _ => 0,
        };
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;
    use crate::telemetry::RecordingTelemetry;

    const COOLDOWN: Duration = Duration::from_secs(2 * 60 * 60);

    struct Rig {
        monitor: FaultBackoffMonitor,
        indicator: OutputLine,
        relay: OutputLine,
        telemetry: Arc<RecordingTelemetry>,
        state: SystemState,
    }

    fn rig() -> Rig {
        rig_with(FaultConfig::default())
    }

    fn rig_with(cfg: FaultConfig) -> Rig {
        let indicator = OutputLine::new("backoff_indicator", 27).unwrap();
        let relay = OutputLine::new("pump_relay", 17).unwrap();
        let telemetry = Arc::new(RecordingTelemetry::default());
        let monitor = FaultBackoffMonitor::new(
            cfg,
            indicator.clone(),
            relay.clone(),
            telemetry.clone(),
        );
        Rig {
            monitor,
            indicator,
            relay,
            telemetry,
            state: SystemState::default(),
        }
    }

    impl Rig {
        /// One cycle's worth of fault handling.
        fn cycle(&mut self, power_watts: f64) {
            self.monitor.refresh(&mut self.state);
            self.monitor.evaluate(power_watts, &mut self.state);
        }
    }

    // -- Band classification ---------------------------------------------------

    #[test]
    fn band_is_closed_interval() {
        let r = rig();
        assert!(r.monitor.in_fault_band(1000.0));
        assert!(r.monitor.in_fault_band(1500.0));
        assert!(r.monitor.in_fault_band(1234.5));
        assert!(!r.monitor.in_fault_band(999.99));
        assert!(!r.monitor.in_fault_band(1500.01));
        assert!(!r.monitor.in_fault_band(0.0));
    }

    // -- Debounce ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn count_tracks_consecutive_in_band_readings() {
        let mut r = rig();
        for n in 1..3 {
            r.cycle(1200.0);
            assert_eq!(r.state.pump_not_ok_count, n);
            assert!(!r.state.pump_ok);
            assert!(!r.state.backoff_active);
            assert!(!r.indicator.is_set());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn endpoints_count_as_faults() {
        let mut r = rig();
        r.cycle(1000.0);
        r.cycle(1500.0);
        assert_eq!(r.state.pump_not_ok_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_limit_enters_backoff() {
        let mut r = rig();
        r.relay.set(true);
        r.state.pump_on = true;

        for _ in 0..3 {
            r.cycle(1200.0);
        }

        assert_eq!(r.state.pump_not_ok_count, 3);
        assert!(r.state.backoff_active);
        assert!(!r.state.pump_on);
        assert!(r.indicator.is_set());
        assert!(!r.relay.is_set());
        assert_eq!(r.state.backoff_timeout_remaining_secs, COOLDOWN.as_secs());
        assert!(r.telemetry.logged("timer created"));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_band_resets_count_from_any_value() {
        for prior in [0, 1, 2] {
            let mut r = rig();
            for _ in 0..prior {
                r.cycle(1200.0);
            }
            r.cycle(50.0);
            assert_eq!(r.state.pump_not_ok_count, 0);
            assert!(r.state.pump_ok);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_band_leaves_backoff_and_timer_alone() {
        let mut r = rig();
        for _ in 0..3 {
            r.cycle(1200.0);
        }
        r.cycle(1800.0);

        assert_eq!(r.state.pump_not_ok_count, 0);
        assert!(r.state.pump_ok);
        assert!(r.state.backoff_active);
        assert!(r.indicator.is_set());
        assert!(r.monitor.timer.as_ref().unwrap().is_active());
    }

    // -- Cooldown --------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn repeated_faults_do_not_extend_cooldown() {
        let mut r = rig();
        for _ in 0..3 {
            r.cycle(1200.0);
        }

        tokio::time::sleep(Duration::from_secs(600)).await;
        r.cycle(1200.0);

        assert_eq!(r.state.pump_not_ok_count, 4);
        assert_eq!(
            r.state.backoff_timeout_remaining_secs,
            COOLDOWN.as_secs() - 600
        );
        assert!(r.telemetry.logged("already running"));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_clears_indicator_and_next_refresh_releases_backoff() {
        let mut r = rig();
        for _ in 0..3 {
            r.cycle(1200.0);
        }

        tokio::time::sleep(COOLDOWN + Duration::from_secs(1)).await;
        assert!(!r.indicator.is_set(), "timer must clear the indicator");
        // State is untouched until the next cycle reads the indicator back.
        assert!(r.state.backoff_active);

        r.monitor.refresh(&mut r.state);
        assert!(!r.state.backoff_active);
        assert_eq!(r.state.backoff_timeout_remaining_secs, 0);
        // No implicit reset of the debounce counter on release.
        assert_eq!(r.state.pump_not_ok_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn breach_after_expiry_restarts_same_timer() {
        let mut r = rig();
        for _ in 0..3 {
            r.cycle(1200.0);
        }
        tokio::time::sleep(COOLDOWN + Duration::from_secs(1)).await;

        // Counter was never cleared, so the next in-band reading re-trips.
        r.cycle(1200.0);

        assert!(r.state.backoff_active);
        assert!(r.indicator.is_set());
        assert!(r.monitor.timer.as_ref().unwrap().is_active());
        assert_eq!(r.state.backoff_timeout_remaining_secs, COOLDOWN.as_secs());
        assert!(r.telemetry.logged("timer restarted"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_picks_up_indicator_set_before_restart() {
        // Hardware is the source of truth: an indicator already latched high
        // puts a fresh state record into backoff.
        let mut r = rig();
        r.indicator.set(true);
        r.monitor.refresh(&mut r.state);
        assert!(r.state.backoff_active);
        assert_eq!(r.state.backoff_timeout_remaining_secs, 0);
    }

    // -- Timer start failure ---------------------------------------------------

    #[test]
    fn timer_start_failure_keeps_backoff_without_cooldown() {
        // No runtime here, so the timer task cannot be spawned.
        let mut r = rig();
        for _ in 0..3 {
            r.cycle(1200.0);
        }

        assert!(r.state.backoff_active);
        assert!(r.indicator.is_set());
        assert!(!r.relay.is_set());
        assert!(!r.monitor.timer.as_ref().unwrap().is_active());
        assert_eq!(r.state.backoff_timeout_remaining_secs, 0);
        assert!(r.telemetry.logged("ERROR: backoff timer could not be started"));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_cooldown_keeps_backoff_without_cooldown() {
        let mut r = rig_with(FaultConfig {
            cooldown_secs: u64::MAX,
            ..FaultConfig::default()
        });
        for _ in 0..3 {
            r.cycle(1200.0);
        }

        assert!(r.state.backoff_active);
        assert!(!r.state.pump_on);
        assert!(r.indicator.is_set());
        assert!(!r.relay.is_set());
        assert!(!r.monitor.timer.as_ref().unwrap().is_active());
        assert_eq!(r.state.backoff_timeout_remaining_secs, 0);
        assert!(r.telemetry.logged("cooldown deadline out of range"));

        // Next breach retries and fails the same way, without panicking.
        r.cycle(1200.0);
        assert!(r.state.backoff_active);
        assert!(r.telemetry.logged("backoff timer could not be restarted"));
    }
}
