// ============================================================================
// Sniper Manager - Signal Arbitration and Position Lifecycle
// ============================================================================
//
// Consumes signals from the book monitor and runs at most one sniper
// position at a time. `handle_signal` gates a candidate against the risk
// cooldown and current exposure and returns an entry intent; the engine
// places the order and calls `confirm_entry` on success. `manage` then
// produces exit intents (stop, take-profit, timeout) until the position is
// closed. The stop level ratchets upward behind a trailing gain, so a
// winner that retraces is closed at a profit floor rather than the
// original stop.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::book_monitor::Signal;
use super::risk_cooldown::CooldownSource;
use crate::errors::Error;

/// Confidence floor for acting on a signal
const MIN_ACTIONABLE_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SniperConfig {
    /// Entry offset below the mid, quote units
    pub entry_offset: f64,
}

impl Default for SniperConfig {
    fn default() -> Self {
        Self { entry_offset: 5.0 }
    }
}

impl SniperConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.entry_offset < 0.0 {
            return Err(Error::Config("entry_offset must be non-negative".into()));
        }
        Ok(())
    }
}

/// Accepted-signal entry intent, executed by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EntryIntent {
    pub entry_price: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Timeout,
}

/// Close-position intent with the pnl observed at decision time
#[derive(Debug, Clone, PartialEq)]
pub struct ExitIntent {
    pub reason: ExitReason,
    pub pnl: f64,
}

/// The single live sniper position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SniperPosition {
    pub entry_price: f64,
    /// Pnl floor; starts at -stop_loss and only ratchets upward
    pub stop_level: f64,
    /// Ascending pnl take-profit ladder
    pub take_profit: Vec<f64>,
    pub trailing_stop: Option<f64>,
    pub max_hold_ms: Option<u64>,
    pub open_time_ms: u64,
}

pub struct SniperManager {
    config: SniperConfig,
    position: Option<SniperPosition>,
    last_signal_ms: u64,
}

impl SniperManager {
    pub fn new(config: SniperConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            position: None,
            last_signal_ms: 0,
        })
    }

    pub fn position(&self) -> Option<&SniperPosition> {
        self.position.as_ref()
    }

    /// Gate a pending signal. Returns the entry intent when the signal is
    /// accepted; the engine owns placement and must call `confirm_entry`
    /// once the order went through.
    pub fn handle_signal(
        &mut self,
        signal: &Signal,
        cooldown_source: Option<CooldownSource>,
        mid_price: f64,
    ) -> Option<EntryIntent> {
        match cooldown_source {
            Some(CooldownSource::Whale) => {
                warn!("Signal discarded: whale cooldown active");
                self.last_signal_ms = signal.timestamp_ms;
                return None;
            }
            Some(CooldownSource::Indicator) => {
                info!("Indicator cooldown active, sniper entry still allowed");
            }
            None => {}
        }

        if self.position.is_some() {
            debug!("Signal discarded: sniper position already open");
            self.last_signal_ms = signal.timestamp_ms;
            return None;
        }

        // Already consumed (or rejected) this exact signal
        if signal.timestamp_ms == self.last_signal_ms {
            return None;
        }

        if signal.confidence < MIN_ACTIONABLE_CONFIDENCE {
            debug!("Signal discarded: confidence {:.2} below floor", signal.confidence);
            self.last_signal_ms = signal.timestamp_ms;
            return None;
        }

        self.last_signal_ms = signal.timestamp_ms;
        let entry_price = (mid_price - self.config.entry_offset).floor();
        info!(
            "Signal accepted ({:?}, confidence {:.2}): entry at {:.1} ({})",
            signal.kind, signal.confidence, entry_price, signal.reason
        );
        Some(EntryIntent {
            entry_price,
            reason: signal.reason.clone(),
        })
    }

    /// Record the confirmed fill-side of an accepted entry
    pub fn confirm_entry(&mut self, signal: &Signal, entry_price: f64, now_ms: u64) {
        self.position = Some(SniperPosition {
            entry_price,
            stop_level: -signal.stop_loss,
            take_profit: signal.take_profit.clone(),
            trailing_stop: signal.trailing_stop,
            max_hold_ms: signal.max_hold_ms,
            open_time_ms: now_ms,
        });
        info!("Sniper position opened at {entry_price:.1}");
    }

    /// Manage the open position against the current price. Returns an exit
    /// intent when the position should be closed; the engine executes it
    /// and calls `clear_position`.
    pub fn manage(&mut self, mid_price: f64, now_ms: u64) -> Option<ExitIntent> {
        let pos = self.position.as_mut()?;
        let pnl = mid_price - pos.entry_price;

        if pnl <= pos.stop_level {
            warn!("Sniper stop hit: pnl {pnl:+.1} <= floor {:+.1}", pos.stop_level);
            return Some(ExitIntent { reason: ExitReason::StopLoss, pnl });
        }

        if let Some(&first_tp) = pos.take_profit.first() {
            if pnl >= first_tp {
                info!("Sniper take-profit hit: pnl {pnl:+.1} >= {first_tp:+.1}");
                return Some(ExitIntent { reason: ExitReason::TakeProfit, pnl });
            }
        }

        // Trailing ratchet: once pnl clears the trailing distance, the
        // floor follows it up and never comes back down
        if let Some(trailing) = pos.trailing_stop {
            if pnl > trailing {
                let candidate = pnl - trailing;
                if candidate > pos.stop_level {
                    debug!("Trailing stop raised to {candidate:+.1}");
                    pos.stop_level = candidate;
                }
            }
        }

        if let Some(max_hold) = pos.max_hold_ms {
            if now_ms.saturating_sub(pos.open_time_ms) >= max_hold {
                info!("Sniper max hold reached: closing with pnl {pnl:+.1}");
                return Some(ExitIntent { reason: ExitReason::Timeout, pnl });
            }
        }

        None
    }

    pub fn clear_position(&mut self) {
        self.position = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::book_monitor::SignalKind;

    fn signal(timestamp_ms: u64) -> Signal {
        Signal {
            kind: SignalKind::LongAfterDown,
            confidence: 0.8,
            entry_price: 100_000.0,
            stop_loss: 40.0,
            take_profit: vec![50.0, 80.0],
            trailing_stop: Some(30.0),
            max_hold_ms: Some(300_000),
            reason: "test".into(),
            timestamp_ms,
        }
    }

    fn manager() -> SniperManager {
        SniperManager::new(SniperConfig::default()).unwrap()
    }

    #[test]
    fn test_whale_cooldown_blocks_entry() {
        let mut m = manager();
        let intent = m.handle_signal(&signal(1_000), Some(CooldownSource::Whale), 100_000.0);
        assert!(intent.is_none());
    }

    #[test]
    fn test_indicator_cooldown_allows_entry() {
        let mut m = manager();
        let intent = m
            .handle_signal(&signal(1_000), Some(CooldownSource::Indicator), 100_000.0)
            .expect("entry expected");
        // floor(mid - 5)
        assert_eq!(intent.entry_price, 99_995.0);
    }

    #[test]
    fn test_existing_position_blocks_entry() {
        let mut m = manager();
        let s = signal(1_000);
        let intent = m.handle_signal(&s, None, 100_000.0).unwrap();
        m.confirm_entry(&s, intent.entry_price, 1_000);

        assert!(m.handle_signal(&signal(2_000), None, 100_000.0).is_none());
    }

    #[test]
    fn test_same_signal_not_consumed_twice() {
        let mut m = manager();
        let s = signal(1_000);
        assert!(m.handle_signal(&s, None, 100_000.0).is_some());
        // Entry was not confirmed, but the same signal must not re-fire
        assert!(m.handle_signal(&s, None, 100_000.0).is_none());
    }

    #[test]
    fn test_stop_loss_exit() {
        let mut m = manager();
        let s = signal(1_000);
        m.confirm_entry(&s, 100_000.0, 1_000);

        assert!(m.manage(99_961.0, 2_000).is_none());
        let exit = m.manage(99_960.0, 3_000).expect("stop expected");
        assert_eq!(exit.reason, ExitReason::StopLoss);
        assert_eq!(exit.pnl, -40.0);
    }

    #[test]
    fn test_take_profit_exit() {
        let mut m = manager();
        let s = signal(1_000);
        m.confirm_entry(&s, 100_000.0, 1_000);

        let exit = m.manage(100_050.0, 2_000).expect("take-profit expected");
        assert_eq!(exit.reason, ExitReason::TakeProfit);
        assert_eq!(exit.pnl, 50.0);
    }

    #[test]
    fn test_trailing_ratchet_floors_profit() {
        let mut m = manager();
        let s = signal(1_000);
        m.confirm_entry(&s, 100_000.0, 1_000);

        // +45 is past the trailing distance but under the first TP:
        // floor ratchets to +15
        assert!(m.manage(100_045.0, 2_000).is_none());
        assert_eq!(m.position().unwrap().stop_level, 15.0);

        // Retrace to +15 closes at the floor, not the original -40 stop
        let exit = m.manage(100_015.0, 3_000).expect("ratcheted stop expected");
        assert_eq!(exit.reason, ExitReason::StopLoss);
        assert_eq!(exit.pnl, 15.0);
    }

    #[test]
    fn test_timeout_exit() {
        let mut m = manager();
        let s = signal(1_000);
        m.confirm_entry(&s, 100_000.0, 1_000);

        assert!(m.manage(100_010.0, 300_999).is_none());
        let exit = m.manage(100_010.0, 301_000).expect("timeout expected");
        assert_eq!(exit.reason, ExitReason::Timeout);
    }
}
