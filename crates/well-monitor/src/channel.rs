//! Mutual exclusion around the single analog input.
//!
//! The RMS sampler and the diagnostic raw reader both go through
//! [`SharedChannel::acquire`], which waits at most `timeout` for the lock and
//! otherwise fails fast with [`ChannelBusy`]. No retry, no queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::adc::AnalogInput;

/// Exclusive access to the analog input, held for as long as the guard
/// lives. Owned so it can be moved onto a blocking worker.
pub(crate) type ChannelGuard = OwnedMutexGuard<Box<dyn AnalogInput>>;

#[derive(Clone)]
pub(crate) struct SharedChannel {
    input: Arc<Mutex<Box<dyn AnalogInput>>>,
    timeout: Duration,
}

/// The lock was not acquired within the bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelBusy {
    pub(crate) waited: Duration,
}

impl fmt::Display for ChannelBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "analog channel busy (not acquired within {} ms)",
            self.waited.as_millis()
        )
    }
}

impl std::error::Error for ChannelBusy {}

impl SharedChannel {
    pub(crate) fn new(input: Box<dyn AnalogInput>, timeout: Duration) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            timeout,
        }
    }

    pub(crate) async fn acquire(&self) -> Result<ChannelGuard, ChannelBusy> {
        tokio::time::timeout(self.timeout, Arc::clone(&self.input).lock_owned())
            .await
            .map_err(|_| ChannelBusy {
                waited: self.timeout,
            })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
