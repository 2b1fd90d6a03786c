//! Driver tuning knobs.
//!
//! Everything has a working default; a TOML or JSON document may override
//! any subset of fields.
//!
//! ```toml
//! dma_buffer_size = 65536
//! decoder_timeout = 100
//!
//! [flush]
//! max_polls = 1000000
//! yield_interval = 1000
//! interval_us = 0
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tcu_arch::regs::DEFAULT_DECODER_TIMEOUT;

/// Completion polling policy for the flush probe.
///
/// The probe is checked up to `max_polls` times. Every `yield_interval`
/// polls the thread yields; a non-zero `interval_us` sleeps between polls
/// instead of spinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Attempts before giving up with `Timeout`
    pub max_polls: u64,
    /// Polls between `yield_now` calls (0 never yields)
    pub yield_interval: u64,
    /// Sleep between polls in microseconds (0 spins)
    pub interval_us: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_polls: 100_000_000,
            yield_interval: 1_000,
            interval_us: 0,
        }
    }
}

impl PollConfig {
    /// Sleep between polls, if any.
    pub const fn interval(&self) -> Option<Duration> {
        if self.interval_us == 0 {
            None
        } else {
            Some(Duration::from_micros(self.interval_us))
        }
    }
}

/// Driver construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Words per DMA staging buffer
    pub dma_buffer_size: usize,
    /// Value programmed into the decoder TIMEOUT register
    pub decoder_timeout: u64,
    /// Value programmed into SAMPLE_INTERVAL when sampling is attached
    pub sample_interval: u64,
    /// Flush probe polling
    pub flush: PollConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dma_buffer_size: 1 << 20,
            decoder_timeout: DEFAULT_DECODER_TIMEOUT,
            sample_interval: 1_000,
            flush: PollConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Set the staging buffer size in words.
    #[must_use]
    pub const fn with_dma_buffer_size(mut self, words: usize) -> Self {
        self.dma_buffer_size = words;
        self
    }

    /// Set the decoder timeout register value.
    #[must_use]
    pub const fn with_decoder_timeout(mut self, timeout: u64) -> Self {
        self.decoder_timeout = timeout;
        self
    }

    /// Set the sampling interval register value.
    #[must_use]
    pub const fn with_sample_interval(mut self, interval: u64) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Set the flush polling policy.
    #[must_use]
    pub const fn with_flush(mut self, flush: PollConfig) -> Self {
        self.flush = flush;
        self
    }
}
