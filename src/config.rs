//! Configuration types for the supervision and translation pipelines.
//!
//! All behaviour is controlled through two config structs built via their
//! builders. Keeping every knob in one struct makes it trivial to share
//! configs across tasks, log them, and diff two runs to understand why their
//! outputs differ.

use crate::error::BookmillError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the chunked translation pipeline.
///
/// Built via [`TranslateConfig::builder()`] or [`TranslateConfig::default()`].
///
/// # Example
/// ```rust
/// use bookmill::TranslateConfig;
///
/// let config = TranslateConfig::builder()
///     .max_unit_chars(40_000)
///     .max_retries(1)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Maximum unit size in characters. Default: 80 000.
    ///
    /// 80 K chars ≈ 25 K tokens — large enough that a typical book becomes a
    /// handful of units (terminology stays consistent, per-unit overhead is
    /// amortised), small enough to sit comfortably inside the 128 K-token
    /// context of current models with room for the instruction and output.
    pub max_unit_chars: usize,

    /// Maximum retries after a validation failure on one unit. Default: 2.
    ///
    /// After `max_retries + 1` failed attempts the last output is accepted
    /// anyway (degrade-and-continue): one stubborn unit must never strand an
    /// hours-long job at 95 %.
    pub max_retries: u32,

    /// Characters to keep when a unit is rejected as too large. Default: 60 000.
    ///
    /// Applied once per unit; a second context-length rejection is terminal.
    pub truncate_chars: usize,

    /// Sampling temperature for translation calls. Default: 0.3.
    pub temperature: f32,

    /// Characters of document sampled for domain detection. Default: 3000.
    pub domain_sample_chars: usize,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            max_unit_chars: 80_000,
            max_retries: 2,
            truncate_chars: 60_000,
            temperature: 0.3,
            domain_sample_chars: 3000,
        }
    }
}

impl TranslateConfig {
    pub fn builder() -> TranslateConfigBuilder {
        TranslateConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`TranslateConfig`].
#[derive(Debug)]
pub struct TranslateConfigBuilder {
    config: TranslateConfig,
}

impl TranslateConfigBuilder {
    pub fn max_unit_chars(mut self, n: usize) -> Self {
        self.config.max_unit_chars = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn truncate_chars(mut self, n: usize) -> Self {
        self.config.truncate_chars = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn domain_sample_chars(mut self, n: usize) -> Self {
        self.config.domain_sample_chars = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TranslateConfig, BookmillError> {
        let c = &self.config;
        if c.max_unit_chars == 0 {
            return Err(BookmillError::InvalidConfig(
                "max_unit_chars must be ≥ 1".into(),
            ));
        }
        if c.truncate_chars == 0 {
            return Err(BookmillError::InvalidConfig(
                "truncate_chars must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Configuration for the extraction subprocess supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often the poll loop re-reads the progress record. Default: 1 s.
    ///
    /// The record is a small JSON file on local disk; reading it every
    /// second is negligible, and a shorter interval only buys sub-second
    /// progress latency nobody observes through a UI anyway.
    pub poll_interval: Duration,

    /// Grace period between terminate and forceful kill. Default: 3 s.
    pub kill_grace: Duration,

    /// Worker binary to spawn. Default: `bookmill-worker` next to the
    /// current executable.
    pub worker_program: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            kill_grace: Duration::from_secs(3),
            worker_program: None,
        }
    }
}

impl SupervisorConfig {
    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`SupervisorConfig`].
#[derive(Debug)]
pub struct SupervisorConfigBuilder {
    config: SupervisorConfig,
}

impl SupervisorConfigBuilder {
    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.config.poll_interval = d;
        self
    }

    pub fn kill_grace(mut self, d: Duration) -> Self {
        self.config.kill_grace = d;
        self
    }

    pub fn worker_program(mut self, p: impl Into<PathBuf>) -> Self {
        self.config.worker_program = Some(p.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SupervisorConfig, BookmillError> {
        if self.config.poll_interval.is_zero() {
            return Err(BookmillError::InvalidConfig(
                "poll_interval must be non-zero".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_defaults() {
        let c = TranslateConfig::default();
        assert_eq!(c.max_unit_chars, 80_000);
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.truncate_chars, 60_000);
    }

    #[test]
    fn builder_rejects_zero_unit_size() {
        let err = TranslateConfig::builder().max_unit_chars(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn temperature_is_clamped() {
        let c = TranslateConfig::builder().temperature(9.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn supervisor_rejects_zero_poll_interval() {
        let err = SupervisorConfig::builder()
            .poll_interval(Duration::ZERO)
            .build();
        assert!(err.is_err());
    }
}
