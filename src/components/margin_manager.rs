// ============================================================================
// Margin Protection Manager
// ============================================================================
//
// Watches margin usage on a 10 s cadence and de-risks by closing part of
// the position when usage crosses the threshold. A confirmed close starts
// a cooldown so one breach does not cascade into repeated closes while the
// venue catches up; repeated failures are bounded and then escalated to
// the operator. Margin data must come from the venue: when it is
// unavailable the manager skips the tick rather than estimating.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::adapter::{MarginStatus, PositionInfo};
use crate::errors::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginConfig {
    /// Usage ratio above which de-risking starts
    pub usage_threshold: f64,

    /// Fraction of the position closed per action
    pub close_fraction: f64,

    /// Limit-price offset from mark, percent (through the book, so the
    /// close crosses)
    pub price_offset_percent: f64,

    /// Failed submissions tolerated before requiring manual intervention
    pub max_attempts: u32,

    /// Pause after a confirmed close, milliseconds
    pub cooldown_ms: u64,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            usage_threshold: 0.5,
            close_fraction: 0.5,
            price_offset_percent: 0.1,
            max_attempts: 3,
            cooldown_ms: 60_000,
        }
    }
}

impl MarginConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..1.0).contains(&self.usage_threshold) || self.usage_threshold <= 0.0 {
            return Err(Error::Config(format!(
                "usage_threshold must be in (0, 1), got {}",
                self.usage_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.close_fraction) || self.close_fraction <= 0.0 {
            return Err(Error::Config("close_fraction must be in (0, 1]".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be positive".into()));
        }
        Ok(())
    }
}

/// Partial-close intent, executed by the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginAction {
    pub fraction: f64,
    pub limit_price: f64,
}

fn round_tick(price: f64) -> f64 {
    (price * 10.0).round() / 10.0
}

pub struct MarginManager {
    config: MarginConfig,
    attempts: u32,
    last_close_ms: Option<u64>,
}

impl MarginManager {
    pub fn new(config: MarginConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            attempts: 0,
            last_close_ms: None,
        })
    }

    /// One protection tick. Returns a close intent when margin usage is
    /// over the threshold and action is allowed.
    pub fn decide(
        &mut self,
        margin: Option<&MarginStatus>,
        position: Option<&PositionInfo>,
        now_ms: u64,
    ) -> Option<MarginAction> {
        if let Some(last) = self.last_close_ms {
            if now_ms.saturating_sub(last) < self.config.cooldown_ms {
                debug!("Margin protection cooling down, skipping tick");
                return None;
            }
        }

        let Some(pos) = position else {
            self.attempts = 0;
            return None;
        };

        // No estimates: unavailable margin data skips the tick
        let Some(margin) = margin else {
            debug!("Margin data unavailable, skipping tick");
            return None;
        };

        let usage = margin.usage_ratio();
        if usage <= self.config.usage_threshold {
            return None;
        }

        if self.attempts >= self.config.max_attempts {
            error!(
                "Margin usage {:.0}% over threshold but {} close attempts failed, manual intervention required",
                usage * 100.0,
                self.attempts
            );
            return None;
        }

        let offset = self.config.price_offset_percent / 100.0;
        let limit_price = if pos.is_long() {
            round_tick(pos.mark_price * (1.0 - offset))
        } else {
            round_tick(pos.mark_price * (1.0 + offset))
        };

        warn!(
            "Margin usage {:.0}% over {:.0}%: closing {:.0}% of position at {:.1}",
            usage * 100.0,
            self.config.usage_threshold * 100.0,
            self.config.close_fraction * 100.0,
            limit_price
        );
        Some(MarginAction {
            fraction: self.config.close_fraction,
            limit_price,
        })
    }

    /// Report the outcome of an executed action
    pub fn record(&mut self, success: bool, now_ms: u64) {
        if success {
            info!("Margin de-risking close submitted, cooling down");
            self.attempts = 0;
            self.last_close_ms = Some(now_ms);
        } else {
            self.attempts += 1;
            warn!(
                "Margin de-risking close failed (attempt {}/{})",
                self.attempts, self.config.max_attempts
            );
        }
    }

    /// Operator override for the usage threshold
    pub fn set_threshold(&mut self, usage_threshold: f64) -> Result<(), Error> {
        let mut config = self.config.clone();
        config.usage_threshold = usage_threshold;
        config.validate()?;
        info!("Margin usage threshold set to {:.0}%", usage_threshold * 100.0);
        self.config = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> MarginManager {
        MarginManager::new(MarginConfig::default()).unwrap()
    }

    fn margin(used: f64, available: f64) -> MarginStatus {
        MarginStatus { used, available }
    }

    fn long_position() -> PositionInfo {
        PositionInfo { size: 0.01, entry_price: 100_000.0, mark_price: 100_000.0 }
    }

    #[test]
    fn test_breach_closes_and_cools_down() {
        let mut m = manager();

        // 55% usage: close half, $100 below mark
        let action = m
            .decide(Some(&margin(55.0, 45.0)), Some(&long_position()), 1_000)
            .expect("close expected");
        assert_eq!(action.fraction, 0.5);
        assert_eq!(action.limit_price, 99_900.0);
        m.record(true, 1_000);

        // 60% usage inside the cooldown: nothing
        assert!(m.decide(Some(&margin(60.0, 40.0)), Some(&long_position()), 30_000).is_none());
        // Cooldown over: act again
        assert!(m.decide(Some(&margin(60.0, 40.0)), Some(&long_position()), 61_000).is_some());
    }

    #[test]
    fn test_safe_usage_no_action() {
        let mut m = manager();
        assert!(m.decide(Some(&margin(40.0, 60.0)), Some(&long_position()), 1_000).is_none());
        // Exactly at the threshold is still safe
        assert!(m.decide(Some(&margin(50.0, 50.0)), Some(&long_position()), 1_000).is_none());
    }

    #[test]
    fn test_unavailable_margin_skips() {
        let mut m = manager();
        assert!(m.decide(None, Some(&long_position()), 1_000).is_none());
    }

    #[test]
    fn test_flat_resets_attempts() {
        let mut m = manager();
        m.record(false, 1_000);
        m.record(false, 2_000);
        assert_eq!(m.attempts, 2);

        m.decide(Some(&margin(60.0, 40.0)), None, 3_000);
        assert_eq!(m.attempts, 0);
    }

    #[test]
    fn test_attempt_bound() {
        let mut m = manager();
        for i in 0..3 {
            assert!(m
                .decide(Some(&margin(60.0, 40.0)), Some(&long_position()), 1_000 + i)
                .is_some());
            m.record(false, 1_000 + i);
        }
        // Bound reached: no further intents until attempts reset
        assert!(m.decide(Some(&margin(60.0, 40.0)), Some(&long_position()), 5_000).is_none());
    }

    #[test]
    fn test_short_close_prices_above_mark() {
        let mut m = manager();
        let short = PositionInfo { size: -0.01, entry_price: 100_000.0, mark_price: 100_000.0 };
        let action = m
            .decide(Some(&margin(60.0, 40.0)), Some(&short), 1_000)
            .expect("close expected");
        assert_eq!(action.limit_price, 100_100.0);
    }

    #[test]
    fn test_threshold_validation() {
        let mut m = manager();
        assert!(m.set_threshold(0.8).is_ok());
        assert!(m.set_threshold(0.0).is_err());
        assert!(m.set_threshold(1.5).is_err());
    }
}
