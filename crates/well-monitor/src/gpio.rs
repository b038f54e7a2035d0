//! Digital lines at the actuation boundary: the pump relay and backoff
//! indicator outputs, and the two water-request inputs. The `gpio` feature
//! gates the real rppal driver; without it, in-memory mock lines log level
//! changes and count transitions.
//!
//! Output lines are cheap cloneable handles so the cooldown timer can clear
//! the backoff indicator while the control loop keeps its own handle for
//! read-back.

use anyhow::Result;
use std::sync::Arc;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin, OutputPin};
#[cfg(feature = "gpio")]
use std::sync::{Mutex, PoisonError};

#[cfg(not(feature = "gpio"))]
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

// ---------------------------------------------------------------------------
// Real GPIO lines (rppal, Raspberry Pi only)
// ---------------------------------------------------------------------------

/// Active-high digital output (relay coil driver or indicator LED).
#[cfg(feature = "gpio")]
#[derive(Clone)]
pub(crate) struct OutputLine {
    name: &'static str,
    pin: Arc<Mutex<OutputPin>>,
}

#[cfg(feature = "gpio")]
impl OutputLine {
    /// Claim BCM pin `pin_num` as an output, driven low (off) immediately.
    pub(crate) fn new(name: &'static str, pin_num: u8) -> Result<Self> {
        let pin = Gpio::new()?
            .get(pin_num)
            .with_context(|| format!("failed to claim gpio {pin_num} for {name}"))?
            .into_output_low();

        tracing::info!(line = name, gpio = pin_num, "output line ready (low)");

        Ok(Self {
            name,
            pin: Arc::new(Mutex::new(pin)),
        })
    }

    pub(crate) fn set(&self, on: bool) {
        let mut pin = self.pin.lock().unwrap_or_else(PoisonError::into_inner);
        if pin.is_set_high() != on {
            tracing::debug!(line = self.name, on, "output changed");
        }
        if on {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }

    /// Current output level as latched in the pin's output register.
    pub(crate) fn is_set(&self) -> bool {
        self.pin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_set_high()
    }
}

/// Digital input with the internal pull-up enabled.
#[cfg(feature = "gpio")]
pub(crate) struct InputLine {
    name: &'static str,
    pin: InputPin,
}

#[cfg(feature = "gpio")]
impl InputLine {
    pub(crate) fn new(name: &'static str, pin_num: u8) -> Result<Self> {
        let pin = Gpio::new()?
            .get(pin_num)
            .with_context(|| format!("failed to claim gpio {pin_num} for {name}"))?
            .into_input_pullup();

        tracing::info!(line = name, gpio = pin_num, "input line ready (pull-up)");

        Ok(Self { name, pin })
    }

    pub(crate) fn is_high(&self) -> bool {
        self.pin.is_high()
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }
}

// ---------------------------------------------------------------------------
// Mock lines (no hardware)
// ---------------------------------------------------------------------------

#[cfg(not(feature = "gpio"))]
#[derive(Clone)]
pub(crate) struct OutputLine {
    name: &'static str,
    level: Arc<AtomicBool>,
    transitions: Arc<AtomicU32>,
}

#[cfg(not(feature = "gpio"))]
impl OutputLine {
    pub(crate) fn new(name: &'static str, pin_num: u8) -> Result<Self> {
        tracing::info!(line = name, gpio = pin_num, "[mock-gpio] output line registered (not wired)");
        Ok(Self {
            name,
            level: Arc::new(AtomicBool::new(false)),
            transitions: Arc::new(AtomicU32::new(0)),
        })
    }

    pub(crate) fn set(&self, on: bool) {
        let previous = self.level.swap(on, Ordering::SeqCst);
        if previous != on {
            self.transitions.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(line = self.name, on, "[mock-gpio] output changed");
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    /// Number of level changes seen since the line was created.
    #[cfg(test)]
    pub(crate) fn transitions(&self) -> u32 {
        self.transitions.load(Ordering::SeqCst)
    }
}

/// Mock pull-up input. Idles high like the real wiring; clones share the
/// same level so a test (or the simulator) can drive it.
#[cfg(not(feature = "gpio"))]
#[derive(Clone)]
pub(crate) struct InputLine {
    name: &'static str,
    level: Arc<AtomicBool>,
}

#[cfg(not(feature = "gpio"))]
impl InputLine {
    pub(crate) fn new(name: &'static str, pin_num: u8) -> Result<Self> {
        tracing::info!(line = name, gpio = pin_num, "[mock-gpio] input line registered (not wired)");
        Ok(Self {
            name,
            level: Arc::new(AtomicBool::new(true)),
        })
    }

    pub(crate) fn is_high(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Drive the mock level (`false` = pulled low = water requested).
    pub(crate) fn set_level(&self, high: bool) {
        self.level.store(high, Ordering::SeqCst);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
