//! Analog input abstraction for the current-transformer channel, plus the
//! ADS1115 16-bit ADC driver used on a Raspberry Pi (`gpio` feature).
//!
//! The ADS1115 runs in continuous-conversion mode at 860 SPS, PGA ±4.096 V,
//! so a full RMS measurement reads back-to-back conversions instead of
//! paying the single-shot start/poll round trip per sample.

/// A single analog channel that yields raw ADC counts.
///
/// Reads are blocking; callers run them on a blocking worker and serialise
/// access through [`crate::channel::SharedChannel`].
pub(crate) trait AnalogInput: Send {
    /// Perform one conversion and return the raw count.
    fn read_raw(&mut self) -> anyhow::Result<i32>;

    /// Volts represented by one count.
    fn volts_per_count(&self) -> f64;
}

#[cfg(feature = "gpio")]
pub(crate) use ads1115::Ads1115;

#[cfg(feature = "gpio")]
mod ads1115 {
    use rppal::i2c::I2c;
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::AnalogInput;

    // ── ADS1115 register addresses ──────────────────────────────────────────

    /// Conversion result register (read-only, 16-bit signed).
    const REG_CONVERSION: u8 = 0x00;
    /// Configuration register (read/write).
    const REG_CONFIG: u8 = 0x01;

    // ── Config register bit fields ──────────────────────────────────────────
    //
    // Layout (MSB first):
    //   [15]    OS       : ignored in continuous mode
    //   [14:12] MUX      : input multiplexer (channel selection)
    //   [11:9]  PGA      : programmable gain amplifier
    //   [8]     MODE     : 0 = continuous, 1 = single-shot
    //   [7:5]   DR       : data rate
    //   [4]     COMP_MODE
    //   [3]     COMP_POL
    //   [2]     COMP_LAT
    //   [1:0]   COMP_QUE : 11 = disable comparator (default)

    /// PGA=001 (±4.096 V), MODE=0 (continuous), DR=111 (860 SPS),
    /// COMP_QUE=11 (comparator off).
    pub(super) const CONFIG_BASE: u16 = 0b0_000_001_0_111_0_0_0_11;

    /// MUX values for single-ended reads (AINx vs GND).
    const MUX_SHIFT: u8 = 12;
    const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

    /// Maximum valid ADS1115 channel index (0-3 for single-ended).
    const MAX_CHANNEL: usize = 3;

    /// One conversion period at 860 SPS.
    const CONVERSION_PERIOD: Duration = Duration::from_micros(1163);

    /// Full-scale range at PGA ±4.096 V over the positive 15-bit span.
    const VOLTS_PER_COUNT: f64 = 4.096 / 32768.0;

    pub(super) fn config_for_channel(channel: usize) -> u16 {
        CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
    }

    /// ADS1115 driver backed by `rppal::i2c`, locked to one input channel.
    pub(crate) struct Ads1115 {
        i2c: I2c,
        last_read: Instant,
    }

    impl Ads1115 {
        /// Open I2C bus 1, address the ADS1115 at `addr` and start continuous
        /// conversions on `channel`.
        pub(crate) fn open(addr: u16, channel: usize) -> anyhow::Result<Self> {
            anyhow::ensure!(
                channel <= MAX_CHANNEL,
                "ADS1115 channel {channel} out of range (0–{MAX_CHANNEL})"
            );

            let mut i2c = I2c::new()?;
            i2c.set_slave_address(addr)?;
            i2c.block_write(REG_CONFIG, &config_for_channel(channel).to_be_bytes())?;

            // First conversion result is ready one period after the write.
            thread::sleep(CONVERSION_PERIOD);

            tracing::info!(
                addr = format_args!("0x{addr:02x}"),
                channel,
                "ads1115 initialised (continuous, 860 SPS)"
            );

            Ok(Self {
                i2c,
                last_read: Instant::now(),
            })
        }
    }

    impl AnalogInput for Ads1115 {
        fn read_raw(&mut self) -> anyhow::Result<i32> {
            // Pace reads to the conversion rate so each sample is fresh.
            let since = self.last_read.elapsed();
            if since < CONVERSION_PERIOD {
                thread::sleep(CONVERSION_PERIOD - since);
            }

            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONVERSION, &mut buf)?;
            self.last_read = Instant::now();

            // Single-ended reads are non-negative; clamp against bus noise.
            Ok((i16::from_be_bytes(buf) as i32).clamp(0, 32767))
        }

        fn volts_per_count(&self) -> f64 {
            VOLTS_PER_COUNT
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
