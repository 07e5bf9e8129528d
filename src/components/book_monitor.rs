// ============================================================================
// Order-Book Anomaly Monitor
// ============================================================================
//
// Ticks once per second on a large-order ("whale") snapshot plus the current
// mid-price. Maintains a 60 s price history and the last-observed whale map,
// and from those derives:
//
// - whale arrivals/removals (diffed by side + price)
// - liquidity vacuum near the mid
// - removal velocity over a trailing window
// - book notional imbalance and short-term price velocity
// - a composite risk score mapped to an alert level
// - price spikes over three lookback windows, which feed the sniper
//   signal queue (down-spike entries and V-shape reversals)
//
// The monitor is pure with respect to I/O: it observes snapshots and
// enqueues `Signal`s; the engine decides what to do with them.

use std::collections::{HashMap, VecDeque};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::adapter::{Side, WhaleSnapshot};
use crate::errors::Error;

// ============================================================================
// Types
// ============================================================================

/// Composite alert level, recomputed from the risk score every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertLevel {
    Green,
    Yellow,
    Orange,
    Red,
}

impl AlertLevel {
    fn from_score(score: u32) -> Self {
        match score {
            s if s >= 6 => AlertLevel::Red,
            s if s >= 4 => AlertLevel::Orange,
            s if s >= 2 => AlertLevel::Yellow,
            _ => AlertLevel::Green,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpikeDirection {
    Up,
    Down,
}

/// Which lookback window detected the spike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpikeWindow {
    Short,
    Mid,
    Long,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub direction: SpikeDirection,
    pub from_price: f64,
    pub to_price: f64,
    /// Signed price change over the window
    pub change: f64,
    pub window: SpikeWindow,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    LongAfterDown,
    VShapeLong,
}

/// A directional entry candidate produced by spike analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    /// In [0, 1]; only signals at/above the queue floor are enqueued
    pub confidence: f64,
    /// Mid-price at detection time; the arbiter re-prices the actual entry
    pub entry_price: f64,
    /// Stop distance in quote-currency units
    pub stop_loss: f64,
    /// Take-profit ladder, ascending pnl levels
    pub take_profit: Vec<f64>,
    pub trailing_stop: Option<f64>,
    pub max_hold_ms: Option<u64>,
    pub reason: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct PriceSample {
    time_ms: u64,
    price: f64,
}

/// Metrics and counters exported on the status surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub alert_level: Option<AlertLevel>,
    pub risk_score: u32,
    pub vacuum: bool,
    pub removal_velocity: f64,
    pub imbalance: f64,
    pub price_velocity: f64,
    pub whales_new: u64,
    pub whales_removed: u64,
    pub spikes_up: u64,
    pub spikes_down: u64,
    pub signals_generated: u64,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Notional floor for a resting order to count as a whale
    pub whale_threshold_usd: f64,

    /// Absolute spike threshold in quote units (fallback mode)
    pub spike_abs: f64,

    /// Spike threshold as a percent of price (preferred when > 0)
    pub spike_percent: f64,

    /// Lookback windows in seconds: (min, max, threshold multiplier)
    pub window_short: (u64, u64, f64),
    pub window_mid: (u64, u64, f64),
    pub window_long: (u64, u64, f64),

    /// Minimum spacing between recorded spikes
    pub spike_dedup_ms: u64,

    /// Recorded spike history bound
    pub spike_history_cap: usize,

    /// Price band around the mid scanned for the vacuum check
    pub vacuum_range: f64,

    /// Fewer nearby whales than this is a vacuum
    pub vacuum_min_orders: usize,

    /// Trailing window for removal velocity, seconds
    pub removal_window_s: u64,

    /// Removals per second considered abnormal
    pub removal_velocity_threshold: f64,

    /// Imbalance warn / critical magnitudes
    pub imbalance_warn: f64,
    pub imbalance_critical: f64,

    /// Price velocity magnitude considered abnormal, quote units per second
    pub price_velocity_bound: f64,

    /// Notional sizes flagged as signature orders, with tolerance
    pub signature_sizes_usd: Vec<f64>,
    pub signature_tolerance_usd: f64,

    /// Price history retention, seconds
    pub price_history_s: u64,

    /// Down-spike signal: minimum magnitude to consider
    pub entry_min_change: f64,

    /// Down-spike signal parameters
    pub entry_stop_loss: f64,
    pub entry_take_profit: Vec<f64>,
    pub entry_trailing_stop: f64,
    pub entry_max_hold_ms: u64,

    /// V-shape: maximum down-to-up spacing and minimum down magnitude
    pub vshape_max_interval_ms: u64,
    pub vshape_min_down: f64,
    pub vshape_stop_loss: f64,
    pub vshape_take_profit: Vec<f64>,

    /// Signal queue bound and freshness horizon
    pub signal_queue_cap: usize,
    pub signal_freshness_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            whale_threshold_usd: 50_000.0,
            spike_abs: 40.0,
            spike_percent: 0.04,
            window_short: (2, 6, 1.0),
            window_mid: (5, 15, 1.2),
            window_long: (15, 30, 1.5),
            spike_dedup_ms: 5_000,
            spike_history_cap: 100,
            vacuum_range: 150.0,
            vacuum_min_orders: 3,
            removal_window_s: 10,
            removal_velocity_threshold: 3.0,
            imbalance_warn: 0.4,
            imbalance_critical: 0.6,
            price_velocity_bound: 20.0,
            signature_sizes_usd: vec![53_600.0, 93_000.0],
            signature_tolerance_usd: 500.0,
            price_history_s: 60,
            entry_min_change: 50.0,
            entry_stop_loss: 40.0,
            entry_take_profit: vec![50.0, 80.0],
            entry_trailing_stop: 30.0,
            entry_max_hold_ms: 5 * 60 * 1000,
            vshape_max_interval_ms: 45_000,
            vshape_min_down: 80.0,
            vshape_stop_loss: 30.0,
            vshape_take_profit: vec![60.0, 100.0],
            signal_queue_cap: 10,
            signal_freshness_ms: 30_000,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.whale_threshold_usd <= 0.0 {
            return Err(Error::Config("whale_threshold_usd must be positive".into()));
        }
        if self.signal_queue_cap == 0 {
            return Err(Error::Config("signal_queue_cap must be positive".into()));
        }
        for w in [self.window_short, self.window_mid, self.window_long] {
            if w.0 >= w.1 {
                return Err(Error::Config(format!("spike window must be ordered, got [{}, {}]", w.0, w.1)));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Monitor
// ============================================================================

type WhaleKey = (Side, i64);

fn whale_key(side: Side, price: f64) -> WhaleKey {
    // Cents are enough resolution to identify a book level
    (side, (price * 100.0).round() as i64)
}

pub struct BookMonitor {
    config: MonitorConfig,

    price_history: VecDeque<PriceSample>,
    last_whales: HashMap<WhaleKey, f64>,
    removal_times: VecDeque<u64>,
    spikes: VecDeque<SpikeEvent>,
    signals: VecDeque<Signal>,

    vacuum_since_ms: Option<u64>,
    alert_level: Option<AlertLevel>,
    status: MonitorStatus,
}

impl BookMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            price_history: VecDeque::new(),
            last_whales: HashMap::new(),
            removal_times: VecDeque::new(),
            spikes: VecDeque::new(),
            signals: VecDeque::new(),
            vacuum_since_ms: None,
            alert_level: None,
            status: MonitorStatus::default(),
        })
    }

    /// One monitor tick. Returns the alert level computed for this tick.
    pub fn tick(&mut self, whales: &WhaleSnapshot, mid_price: f64, now_ms: u64) -> AlertLevel {
        self.record_price(mid_price, now_ms);
        self.diff_whales(whales, now_ms);

        let vacuum = self.check_vacuum(whales, mid_price, now_ms);
        let removal_velocity = self.removal_velocity(now_ms);
        let imbalance = Self::imbalance(whales);
        let price_velocity = self.price_velocity();

        if removal_velocity > self.config.removal_velocity_threshold {
            warn!("Abnormal whale removal velocity: {removal_velocity:.1}/s");
        }

        let mut score = 0u32;
        if vacuum {
            score += 3;
        }
        if removal_velocity > self.config.removal_velocity_threshold {
            score += 2;
        }
        if imbalance.abs() > self.config.imbalance_critical {
            score += 2;
        } else if imbalance.abs() > self.config.imbalance_warn {
            score += 1;
        }
        if price_velocity.abs() > self.config.price_velocity_bound {
            score += 2;
        }

        let level = AlertLevel::from_score(score);
        if self.alert_level != Some(level) {
            match level {
                AlertLevel::Red => error!(
                    "ALERT RED: score {score} (vacuum={vacuum}, removal={removal_velocity:.1}/s, \
                     imbalance={imbalance:.2}, velocity={price_velocity:.1}/s)"
                ),
                AlertLevel::Orange => warn!("Alert level ORANGE (score {score})"),
                _ => info!("Alert level {:?} (score {score})", level),
            }
            self.alert_level = Some(level);
        }

        if let Some(spike) = self.detect_spike(now_ms) {
            self.record_spike(spike, vacuum, now_ms);
        }

        self.status.alert_level = Some(level);
        self.status.risk_score = score;
        self.status.vacuum = vacuum;
        self.status.removal_velocity = removal_velocity;
        self.status.imbalance = imbalance;
        self.status.price_velocity = price_velocity;

        level
    }

    pub fn status(&self) -> MonitorStatus {
        self.status.clone()
    }

    pub fn alert_level(&self) -> AlertLevel {
        self.alert_level.unwrap_or(AlertLevel::Green)
    }

    /// Whether a liquidity vacuum was active on the last tick
    pub fn vacuum_active(&self) -> bool {
        self.vacuum_since_ms.is_some()
    }

    /// Price velocity from the last tick, quote units per second
    pub fn last_price_velocity(&self) -> f64 {
        self.status.price_velocity
    }

    // ------------------------------------------------------------------------
    // Price history and spikes
    // ------------------------------------------------------------------------

    fn record_price(&mut self, price: f64, now_ms: u64) {
        self.price_history.push_back(PriceSample { time_ms: now_ms, price });
        let horizon = now_ms.saturating_sub(self.config.price_history_s * 1000);
        while let Some(front) = self.price_history.front() {
            if front.time_ms < horizon {
                self.price_history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Scan the three lookback windows, shortest first; the first window
    /// whose oldest in-window sample moved past the scaled threshold wins.
    fn detect_spike(&self, now_ms: u64) -> Option<SpikeEvent> {
        let current = self.price_history.back()?;
        let windows = [
            (self.config.window_short, SpikeWindow::Short),
            (self.config.window_mid, SpikeWindow::Mid),
            (self.config.window_long, SpikeWindow::Long),
        ];

        for ((min_s, max_s, multiplier), window) in windows {
            let lo = now_ms.saturating_sub(max_s * 1000);
            let hi = now_ms.saturating_sub(min_s * 1000);
            let reference = self
                .price_history
                .iter()
                .find(|s| s.time_ms >= lo && s.time_ms <= hi);
            let Some(reference) = reference else { continue };

            let threshold = if self.config.spike_percent > 0.0 {
                current.price * self.config.spike_percent / 100.0 * multiplier
            } else {
                self.config.spike_abs * multiplier
            };

            let change = current.price - reference.price;
            if change.abs() >= threshold {
                let direction = if change > 0.0 {
                    SpikeDirection::Up
                } else {
                    SpikeDirection::Down
                };
                return Some(SpikeEvent {
                    direction,
                    from_price: reference.price,
                    to_price: current.price,
                    change,
                    window,
                    time_ms: now_ms,
                });
            }
        }
        None
    }

    fn record_spike(&mut self, spike: SpikeEvent, vacuum: bool, now_ms: u64) {
        if let Some(last) = self.spikes.back() {
            if now_ms.saturating_sub(last.time_ms) < self.config.spike_dedup_ms {
                return;
            }
        }

        info!(
            "Spike {:?} ({:?} window): {:.1} -> {:.1} ({:+.1})",
            spike.direction, spike.window, spike.from_price, spike.to_price, spike.change
        );
        match spike.direction {
            SpikeDirection::Up => self.status.spikes_up += 1,
            SpikeDirection::Down => self.status.spikes_down += 1,
        }
        self.spikes.push_back(spike);
        while self.spikes.len() > self.config.spike_history_cap {
            self.spikes.pop_front();
        }

        self.analyze_spike(spike, vacuum, now_ms);
    }

    /// Turn a qualifying spike into an entry signal
    fn analyze_spike(&mut self, spike: SpikeEvent, vacuum: bool, now_ms: u64) {
        if spike.direction == SpikeDirection::Down && spike.change.abs() >= self.config.entry_min_change {
            let mut confidence: f64 = 0.6;
            if vacuum {
                confidence += 0.2;
            }
            if spike.change.abs() >= 80.0 {
                confidence += 0.1;
            }
            if spike.window == SpikeWindow::Short {
                confidence += 0.1;
            }
            confidence = confidence.min(0.95);

            if confidence >= 0.7 {
                self.enqueue(Signal {
                    kind: SignalKind::LongAfterDown,
                    confidence,
                    entry_price: spike.to_price,
                    stop_loss: self.config.entry_stop_loss,
                    take_profit: self.config.entry_take_profit.clone(),
                    trailing_stop: Some(self.config.entry_trailing_stop),
                    max_hold_ms: Some(self.config.entry_max_hold_ms),
                    reason: format!("down spike {:+.1} rebound entry", spike.change),
                    timestamp_ms: now_ms,
                });
            } else {
                debug!("Down spike below confidence floor ({confidence:.2}), not enqueued");
            }
        }

        self.check_vshape(now_ms);
    }

    /// Down spike followed by an up spike within the interval bound
    fn check_vshape(&mut self, now_ms: u64) {
        let n = self.spikes.len();
        if n < 2 {
            return;
        }
        let up = self.spikes[n - 1];
        let down = self.spikes[n - 2];

        if down.direction == SpikeDirection::Down
            && up.direction == SpikeDirection::Up
            && up.time_ms.saturating_sub(down.time_ms) <= self.config.vshape_max_interval_ms
            && down.change.abs() >= self.config.vshape_min_down
        {
            self.enqueue(Signal {
                kind: SignalKind::VShapeLong,
                confidence: 0.9,
                entry_price: up.to_price,
                stop_loss: self.config.vshape_stop_loss,
                take_profit: self.config.vshape_take_profit.clone(),
                trailing_stop: None,
                max_hold_ms: Some(self.config.entry_max_hold_ms),
                reason: format!(
                    "v-shape reversal (down {:+.1}, up {:+.1})",
                    down.change, up.change
                ),
                timestamp_ms: now_ms,
            });
        }
    }

    // ------------------------------------------------------------------------
    // Whale tracking
    // ------------------------------------------------------------------------

    fn diff_whales(&mut self, whales: &WhaleSnapshot, now_ms: u64) {
        let mut current: HashMap<WhaleKey, f64> = HashMap::new();
        for order in whales.iter() {
            current.insert(whale_key(order.side, order.price), order.size_usd);
        }

        for order in whales.iter() {
            let key = whale_key(order.side, order.price);
            if !self.last_whales.contains_key(&key) {
                self.status.whales_new += 1;
                debug!(
                    "Whale arrived: {:?} {:.1} (${:.0})",
                    order.side, order.price, order.size_usd
                );
                for &sig in &self.config.signature_sizes_usd {
                    if (order.size_usd - sig).abs() <= self.config.signature_tolerance_usd {
                        info!(
                            "Signature-size order: {:?} {:.1} (${:.0} ~ ${:.0})",
                            order.side, order.price, order.size_usd, sig
                        );
                    }
                }
            }
        }

        for key in self.last_whales.keys() {
            if !current.contains_key(key) {
                self.status.whales_removed += 1;
                self.removal_times.push_back(now_ms);
            }
        }

        let horizon = now_ms.saturating_sub(self.config.removal_window_s * 1000);
        while let Some(&t) = self.removal_times.front() {
            if t < horizon {
                self.removal_times.pop_front();
            } else {
                break;
            }
        }

        self.last_whales = current;
    }

    fn check_vacuum(&mut self, whales: &WhaleSnapshot, mid_price: f64, now_ms: u64) -> bool {
        let nearby = whales
            .iter()
            .filter(|o| (o.price - mid_price).abs() <= self.config.vacuum_range)
            .count();
        let vacuum = nearby < self.config.vacuum_min_orders;

        match (vacuum, self.vacuum_since_ms) {
            (true, None) => {
                warn!(
                    "Liquidity vacuum: {nearby} whales within {:.0} of mid",
                    self.config.vacuum_range
                );
                self.vacuum_since_ms = Some(now_ms);
            }
            (false, Some(since)) => {
                info!(
                    "Liquidity vacuum ended after {:.1}s",
                    now_ms.saturating_sub(since) as f64 / 1000.0
                );
                self.vacuum_since_ms = None;
            }
            _ => {}
        }
        vacuum
    }

    /// Removals per second over the trailing window
    fn removal_velocity(&self, _now_ms: u64) -> f64 {
        self.removal_times.len() as f64 / self.config.removal_window_s as f64
    }

    /// (bid notional - ask notional) / (bid + ask + 1), in (-1, 1)
    fn imbalance(whales: &WhaleSnapshot) -> f64 {
        let bid: f64 = whales.bids.iter().map(|o| o.size_usd).sum();
        let ask: f64 = whales.asks.iter().map(|o| o.size_usd).sum();
        (bid - ask) / (bid + ask + 1.0)
    }

    /// Slope of the last up-to-10 price samples, quote units per second
    fn price_velocity(&self) -> f64 {
        let n = self.price_history.len();
        if n < 2 {
            return 0.0;
        }
        let start = n.saturating_sub(10);
        let oldest = self.price_history[start];
        let newest = self.price_history[n - 1];
        let elapsed_s = newest.time_ms.saturating_sub(oldest.time_ms) as f64 / 1000.0;
        if elapsed_s <= 0.0 {
            return 0.0;
        }
        (newest.price - oldest.price) / elapsed_s
    }

    // ------------------------------------------------------------------------
    // Signal queue
    // ------------------------------------------------------------------------

    fn enqueue(&mut self, signal: Signal) {
        info!(
            "Signal {:?} confidence {:.2}: {}",
            signal.kind, signal.confidence, signal.reason
        );
        self.status.signals_generated += 1;
        self.signals.push_back(signal);
        while self.signals.len() > self.config.signal_queue_cap {
            self.signals.pop_front();
        }
    }

    /// Freshest signal still inside the freshness horizon
    pub fn pending_signal(&self, now_ms: u64) -> Option<&Signal> {
        self.signals
            .iter()
            .rev()
            .find(|s| now_ms.saturating_sub(s.timestamp_ms) <= self.config.signal_freshness_ms)
    }

    pub fn clear_signals(&mut self) {
        self.signals.clear();
    }

    pub fn recent_spikes(&self) -> impl Iterator<Item = &SpikeEvent> {
        self.spikes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::WhaleOrder;

    fn monitor() -> BookMonitor {
        BookMonitor::new(MonitorConfig::default()).unwrap()
    }

    fn whale(side: Side, price: f64, size_usd: f64) -> WhaleOrder {
        WhaleOrder { side, price, size_usd }
    }

    fn balanced_book(mid: f64) -> WhaleSnapshot {
        WhaleSnapshot {
            asks: vec![
                whale(Side::Sell, mid + 50.0, 60_000.0),
                whale(Side::Sell, mid + 100.0, 70_000.0),
            ],
            bids: vec![
                whale(Side::Buy, mid - 50.0, 60_000.0),
                whale(Side::Buy, mid - 100.0, 70_000.0),
            ],
        }
    }

    #[test]
    fn test_down_spike_generates_signal() {
        let mut m = monitor();
        let book = balanced_book(100_000.0);

        // Stable, then a $90 drop inside the short window
        m.tick(&book, 100_000.0, 0);
        m.tick(&book, 100_000.0, 1_000);
        m.tick(&book, 100_000.0, 2_000);
        m.tick(&book, 99_910.0, 4_000);

        let signal = m.pending_signal(4_000).expect("signal expected");
        assert_eq!(signal.kind, SignalKind::LongAfterDown);
        // 0.6 base + 0.1 magnitude >= 80 + 0.1 short window
        assert!((signal.confidence - 0.8).abs() < 1e-9);
        assert_eq!(signal.stop_loss, 40.0);
        assert_eq!(signal.take_profit, vec![50.0, 80.0]);
    }

    #[test]
    fn test_small_down_move_no_signal() {
        let mut m = monitor();
        let book = balanced_book(100_000.0);

        m.tick(&book, 100_000.0, 0);
        m.tick(&book, 100_000.0, 2_000);
        // $30 drop is below every window threshold (0.04% of 100k = $40)
        m.tick(&book, 99_970.0, 4_000);

        assert!(m.pending_signal(4_000).is_none());
    }

    #[test]
    fn test_spike_dedup_window() {
        let mut m = monitor();
        let book = balanced_book(100_000.0);

        m.tick(&book, 100_000.0, 0);
        m.tick(&book, 99_900.0, 3_000); // recorded
        m.tick(&book, 99_800.0, 6_000); // within 5 s of the last, dropped

        assert_eq!(m.status().spikes_down, 1);
    }

    #[test]
    fn test_signal_freshness() {
        let mut m = monitor();
        let book = balanced_book(100_000.0);

        m.tick(&book, 100_000.0, 0);
        m.tick(&book, 99_910.0, 3_000);
        assert!(m.pending_signal(3_000).is_some());
        assert!(m.pending_signal(33_000).is_some());
        // Past the 30 s freshness horizon
        assert!(m.pending_signal(33_001).is_none());
    }

    #[test]
    fn test_vshape_scenario() {
        let mut m = monitor();
        let book = balanced_book(100_000.0);

        m.tick(&book, 100_000.0, 0);
        m.tick(&book, 100_000.0, 1_000);
        // Down spike of $90
        m.tick(&book, 99_910.0, 3_000);
        // Hold past dedup, then rebound spike inside 45 s
        m.tick(&book, 99_910.0, 5_000);
        m.tick(&book, 99_910.0, 7_000);
        m.tick(&book, 99_995.0, 9_000);

        let signal = m.pending_signal(9_000).expect("v-shape signal expected");
        assert_eq!(signal.kind, SignalKind::VShapeLong);
        assert!((signal.confidence - 0.9).abs() < 1e-9);
        assert_eq!(signal.stop_loss, 30.0);
        assert_eq!(signal.take_profit, vec![60.0, 100.0]);
    }

    #[test]
    fn test_vacuum_scoring() {
        let mut m = monitor();
        // Whales exist but all far from mid
        let far_book = WhaleSnapshot {
            asks: vec![whale(Side::Sell, 100_500.0, 60_000.0)],
            bids: vec![whale(Side::Buy, 99_500.0, 60_000.0)],
        };

        let level = m.tick(&far_book, 100_000.0, 1_000);
        assert!(m.vacuum_active());
        // Vacuum alone: score 3 -> Yellow
        assert_eq!(level, AlertLevel::Yellow);

        let level = m.tick(&balanced_book(100_000.0), 100_000.0, 2_000);
        assert!(!m.vacuum_active());
        assert_eq!(level, AlertLevel::Green);
    }

    #[test]
    fn test_imbalance() {
        let heavy_bids = WhaleSnapshot {
            asks: vec![whale(Side::Sell, 100_100.0, 50_000.0)],
            bids: vec![
                whale(Side::Buy, 99_900.0, 200_000.0),
                whale(Side::Buy, 99_950.0, 200_000.0),
            ],
        };
        let imb = BookMonitor::imbalance(&heavy_bids);
        assert!(imb > 0.6);

        let empty = WhaleSnapshot::default();
        assert_eq!(BookMonitor::imbalance(&empty), 0.0);
    }

    #[test]
    fn test_removal_velocity_counts_disappearances() {
        let mut m = monitor();
        let mut book = WhaleSnapshot {
            asks: (0..5)
                .map(|i| whale(Side::Sell, 100_100.0 + i as f64, 60_000.0))
                .collect(),
            bids: vec![whale(Side::Buy, 99_950.0, 60_000.0), whale(Side::Buy, 99_900.0, 60_000.0)],
        };

        m.tick(&book, 100_000.0, 0);
        book.asks.clear();
        m.tick(&book, 100_000.0, 1_000);

        assert_eq!(m.status().whales_removed, 5);
        assert!(m.status().removal_velocity >= 0.5);
    }

    #[test]
    fn test_signal_queue_cap() {
        let mut m = monitor();
        for i in 0..15u64 {
            m.enqueue(Signal {
                kind: SignalKind::LongAfterDown,
                confidence: 0.8,
                entry_price: 100_000.0,
                stop_loss: 40.0,
                take_profit: vec![50.0],
                trailing_stop: None,
                max_hold_ms: None,
                reason: String::new(),
                timestamp_ms: i,
            });
        }
        assert_eq!(m.signals.len(), 10);
        // Freshest survives
        assert_eq!(m.pending_signal(14).unwrap().timestamp_ms, 14);
    }
}
