//! Jittered delay sampling.
//!
//! Page cycles use a base delay with an asymmetric uniform spread, clamped
//! to the configured window. Subresource fetches draw uniformly from a much
//! smaller window.

use std::time::Duration;

use rand::Rng;

use crate::config::TimingConfig;

/// Samples page-level and resource-level delays.
#[derive(Debug, Clone, Copy)]
pub struct JitterPolicy {
    config: TimingConfig,
}

impl JitterPolicy {
    pub fn new(config: TimingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    pub fn page_delay(&self) -> Duration {
        self.page_delay_with(&mut rand::thread_rng())
    }

    pub fn resource_delay(&self) -> Duration {
        self.resource_delay_with(&mut rand::thread_rng())
    }

    pub fn page_delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let cfg = &self.config;
        let base = cfg.base_page_delay.as_millis() as i64;
        let below = cfg.spread_below.as_millis() as i64;
        let above = cfg.spread_above.as_millis() as i64;
        let variation = if below == 0 && above == 0 {
            0
        } else {
            rng.gen_range(-below..=above)
        };
        let min = cfg.min_page_delay.as_millis() as i64;
        let max = cfg.max_page_delay.as_millis() as i64;
        // Bounds are validated, but an inverted pair must not panic in clamp.
        let delay = (base + variation).max(min).min(max.max(min));
        Duration::from_millis(delay.max(0) as u64)
    }

    pub fn resource_delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.config.min_resource_delay.as_millis() as u64;
        let max = self.config.max_resource_delay.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rng.gen_range(min..=max))
    }
}

impl Default for JitterPolicy {
    fn default() -> Self {
        Self::new(TimingConfig::default())
    }
}
