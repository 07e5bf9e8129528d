// ============================================================================
// Stop-Loss / Take-Profit Manager
// ============================================================================
//
// Keeps a pair of protective reduce-only orders in sync with the current
// position. Runs on a 5 s cadence and is idempotent: targets are only
// re-submitted when nothing is tracked yet, the position flipped sides, or
// entry/targets drifted past the price buffer. Sub-buffer moves leave the
// resting orders alone to avoid churning the book.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::adapter::PositionInfo;
use crate::errors::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossConfig {
    /// Take-profit distance from entry, percent
    pub take_profit_percent: f64,

    /// Stop-loss distance from entry, percent
    pub stop_loss_percent: f64,

    /// Re-submission threshold in quote units
    pub price_buffer: f64,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            take_profit_percent: 1.0,
            stop_loss_percent: 1.0,
            price_buffer: 0.5,
        }
    }
}

impl StopLossConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.take_profit_percent <= 0.0 || self.stop_loss_percent <= 0.0 {
            return Err(Error::Config("protection percents must be positive".into()));
        }
        if self.price_buffer < 0.0 {
            return Err(Error::Config("price_buffer must be non-negative".into()));
        }
        Ok(())
    }
}

/// The protective order pair the engine should have resting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveTargets {
    pub is_long: bool,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
}

fn round_tick(price: f64) -> f64 {
    (price * 10.0).round() / 10.0
}

pub struct StopLossManager {
    config: StopLossConfig,
    tracked: Option<ProtectiveTargets>,
}

impl StopLossManager {
    pub fn new(config: StopLossConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config, tracked: None })
    }

    /// Targets for the current position, or None when nothing needs doing.
    /// The engine submits the pair and calls `confirm` on success.
    pub fn decide(&mut self, position: Option<&PositionInfo>) -> Option<ProtectiveTargets> {
        let Some(pos) = position else {
            if self.tracked.take().is_some() {
                debug!("Position flat, protective tracking cleared");
            }
            return None;
        };

        let targets = self.targets_for(pos);
        if self.needs_submission(&targets) {
            Some(targets)
        } else {
            None
        }
    }

    /// Record a successfully submitted pair
    pub fn confirm(&mut self, targets: ProtectiveTargets) {
        info!(
            "Protective orders set: tp {:.1} / sl {:.1} (entry {:.1})",
            targets.take_profit, targets.stop_loss, targets.entry_price
        );
        self.tracked = Some(targets);
    }

    /// Operator override; forces re-submission on the next tick
    pub fn set_percents(&mut self, take_profit_percent: f64, stop_loss_percent: f64) -> Result<(), Error> {
        let mut config = self.config.clone();
        config.take_profit_percent = take_profit_percent;
        config.stop_loss_percent = stop_loss_percent;
        config.validate()?;
        info!("Protection percents set to tp {take_profit_percent}% / sl {stop_loss_percent}%");
        self.config = config;
        self.tracked = None;
        Ok(())
    }

    fn targets_for(&self, pos: &PositionInfo) -> ProtectiveTargets {
        let tp_frac = self.config.take_profit_percent / 100.0;
        let sl_frac = self.config.stop_loss_percent / 100.0;
        let (take_profit, stop_loss) = if pos.is_long() {
            (
                round_tick(pos.entry_price * (1.0 + tp_frac)),
                round_tick(pos.entry_price * (1.0 - sl_frac)),
            )
        } else {
            (
                round_tick(pos.entry_price * (1.0 - tp_frac)),
                round_tick(pos.entry_price * (1.0 + sl_frac)),
            )
        };
        ProtectiveTargets {
            is_long: pos.is_long(),
            entry_price: pos.entry_price,
            take_profit,
            stop_loss,
        }
    }

    fn needs_submission(&self, targets: &ProtectiveTargets) -> bool {
        let Some(tracked) = &self.tracked else {
            return true;
        };
        let buffer = self.config.price_buffer;
        tracked.is_long != targets.is_long
            || (tracked.entry_price - targets.entry_price).abs() > buffer
            || (tracked.take_profit - targets.take_profit).abs() > buffer
            || (tracked.stop_loss - targets.stop_loss).abs() > buffer
    }
}
