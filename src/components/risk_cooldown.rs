// ============================================================================
// Risk Cooldown State Machine
// ============================================================================
//
// Two states: ACTIVE (normal trading) and COOLING (orders flushed, position
// closed, main cycle cancel-only at a slower cadence). A cooldown enters via
// an indicator breach evaluated here, or via the whale-risk rule in the
// engine's monitor loop. Cooldowns expire by wall clock; `is_cooling` is
// true strictly before the end time and clears itself at/after it.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::adapter::IndicatorReadings;
use crate::errors::Error;

/// What triggered the cooldown. Sniper entries are blocked under a Whale
/// cooldown but allowed under an Indicator one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CooldownSource {
    Indicator,
    Whale,
}

/// Snapshot of the cooldown state, exported on the status surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownState {
    pub active: bool,
    pub end_time_ms: u64,
    pub reason: String,
    pub source: Option<CooldownSource>,
}

impl Default for CooldownState {
    fn default() -> Self {
        Self {
            active: false,
            end_time_ms: 0,
            reason: String::new(),
            source: None,
        }
    }
}

/// Indicator thresholds and cooldown duration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Oscillator neutral band, breaches outside it feed rules 2-4
    pub rsi_low: f64,
    pub rsi_high: f64,

    /// Volatility level that combines with an oscillator breach
    pub atr_trend: f64,

    /// Volatility level that triggers alone
    pub atr_strong: f64,

    /// Trend strength that combines with an oscillator breach
    pub adx_trend: f64,

    /// Trend strength that triggers with an oscillator breach directly
    pub adx_strong: f64,

    /// Cooldown duration in milliseconds
    pub cooldown_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            rsi_low: 30.0,
            rsi_high: 70.0,
            atr_trend: 100.0,
            atr_strong: 150.0,
            adx_trend: 25.0,
            adx_strong: 30.0,
            cooldown_ms: 15 * 60 * 1000,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.rsi_low >= self.rsi_high {
            return Err(Error::Config(format!(
                "rsi band must be ordered, got [{}, {}]",
                self.rsi_low, self.rsi_high
            )));
        }
        if self.cooldown_ms == 0 {
            return Err(Error::Config("cooldown_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Risk cooldown state machine. Missing indicator readings skip the rules
/// that need them; the machine fails open, never blocking on absent data.
pub struct RiskCooldown {
    config: RiskConfig,
    state: CooldownState,
}

impl RiskCooldown {
    pub fn new(config: RiskConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            state: CooldownState::default(),
        })
    }

    /// Evaluate the indicator breach rules. Returns the breach reason when
    /// one fires; the caller decides whether to trigger.
    pub fn evaluate(&self, readings: &IndicatorReadings) -> Option<String> {
        let cfg = &self.config;
        let rsi_breach = readings
            .rsi
            .map(|r| r < cfg.rsi_low || r > cfg.rsi_high)
            .unwrap_or(false);

        if let Some(atr) = readings.atr {
            if atr > cfg.atr_strong {
                return Some(format!("high volatility (atr {atr:.1} > {})", cfg.atr_strong));
            }
        }
        if rsi_breach {
            if let Some(adx) = readings.adx {
                if adx > cfg.adx_strong {
                    return Some(format!(
                        "strong trend with oscillator breach (adx {adx:.1} > {})",
                        cfg.adx_strong
                    ));
                }
            }
            if let Some(atr) = readings.atr {
                if atr > cfg.atr_trend {
                    return Some(format!(
                        "volatile with oscillator breach (atr {atr:.1} > {})",
                        cfg.atr_trend
                    ));
                }
            }
            if let Some(adx) = readings.adx {
                if adx > cfg.adx_trend {
                    return Some(format!(
                        "trending with oscillator breach (adx {adx:.1} > {})",
                        cfg.adx_trend
                    ));
                }
            }
        }
        None
    }

    /// Enter COOLING until now + cooldown duration
    pub fn trigger(&mut self, source: CooldownSource, reason: impl Into<String>, now_ms: u64) {
        let reason = reason.into();
        let end = now_ms + self.config.cooldown_ms;
        warn!(
            "Entering cooldown ({:?}) until {}: {}",
            source, end, reason
        );
        self.state = CooldownState {
            active: true,
            end_time_ms: end,
            reason,
            source: Some(source),
        };
    }

    /// True strictly before the end time. At/after it the cooldown clears
    /// itself and trading resumes.
    pub fn is_cooling(&mut self, now_ms: u64) -> bool {
        if self.state.active && now_ms >= self.state.end_time_ms {
            info!("Cooldown expired, resuming normal operation");
            self.state = CooldownState::default();
        }
        self.state.active
    }

    /// Source of the current cooldown, if any
    pub fn source(&self) -> Option<CooldownSource> {
        if self.state.active {
            self.state.source
        } else {
            None
        }
    }

    /// Manual operator reset
    pub fn reset(&mut self) {
        if self.state.active {
            info!("Cooldown manually reset");
        }
        self.state = CooldownState::default();
    }

    pub fn state(&self) -> &CooldownState {
        &self.state
    }
}
