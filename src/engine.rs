// ============================================================================
// Trading Engine - Loop Scheduling, Wiring, and Execution
// ============================================================================
//
// Owns the adapter and every component, and runs four cooperative loops:
//
// - main cycle (5 s, 10 s while cooling): risk evaluation + grid upkeep
// - monitor loop (1 s): book anomaly tick, sniper arbitration, position
//   management
// - stop-loss loop (5 s): protective order re-pricing
// - margin loop (10 s): margin-usage de-risking
//
// Components decide, the engine executes. Every loop body is independently
// fallible: an adapter error abandons the tick with a log line and the next
// tick starts clean. Construction is the only place configuration errors
// surface; after `new` returns, nothing validates at runtime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::adapter::{ExchangeAdapter, Quote, Side};
use crate::components::{
    AlertLevel, BookMonitor, CooldownSource, CooldownState, GridConfig, GridEngine, GridSnapshot,
    MarginConfig, MarginManager, MonitorConfig, MonitorStatus, ProtectiveTargets, RiskConfig,
    RiskCooldown, SniperConfig, SniperManager, SniperPosition, StopLossConfig, StopLossManager,
    MAX_RECONCILE_ROUNDS,
};
use crate::errors::{Error, Result};

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

fn round_tick(price: f64) -> f64 {
    (price * 10.0).round() / 10.0
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Main cycle cadence, milliseconds
    pub main_interval_ms: u64,

    /// Main cycle cadence while a cooldown is active
    pub cooling_interval_ms: u64,

    /// Book monitor cadence
    pub monitor_interval_ms: u64,

    /// Protective order cadence
    pub stop_loss_interval_ms: u64,

    /// Margin protection cadence
    pub margin_interval_ms: u64,

    /// Whether sniper entries are armed at startup
    pub sniper_enabled: bool,

    /// Limit offset from the mid when flushing a position, percent
    pub flush_offset_percent: f64,

    pub grid: GridConfig,
    pub risk: RiskConfig,
    pub monitor: MonitorConfig,
    pub sniper: SniperConfig,
    pub stop_loss: StopLossConfig,
    pub margin: MarginConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            main_interval_ms: 5_000,
            cooling_interval_ms: 10_000,
            monitor_interval_ms: 1_000,
            stop_loss_interval_ms: 5_000,
            margin_interval_ms: 10_000,
            sniper_enabled: false,
            flush_offset_percent: 0.1,
            grid: GridConfig::default(),
            risk: RiskConfig::default(),
            monitor: MonitorConfig::default(),
            sniper: SniperConfig::default(),
            stop_loss: StopLossConfig::default(),
            margin: MarginConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, interval) in [
            ("main_interval_ms", self.main_interval_ms),
            ("cooling_interval_ms", self.cooling_interval_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
            ("stop_loss_interval_ms", self.stop_loss_interval_ms),
            ("margin_interval_ms", self.margin_interval_ms),
        ] {
            if interval == 0 {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }
        if self.flush_offset_percent < 0.0 {
            return Err(Error::Config("flush_offset_percent must be non-negative".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Counters and status
// ============================================================================

/// Session statistics, updated lock-free from every loop
#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    orders_placed: AtomicU64,
    orders_failed: AtomicU64,
    orders_cancelled: AtomicU64,
    signals_handled: AtomicU64,
    sniper_entries: AtomicU64,
    sniper_exits: AtomicU64,
    red_alerts: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub cycles: u64,
    pub orders_placed: u64,
    pub orders_failed: u64,
    pub orders_cancelled: u64,
    pub signals_handled: u64,
    pub sniper_entries: u64,
    pub sniper_exits: u64,
    pub red_alerts: u64,
}

impl Counters {
    fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            orders_placed: self.orders_placed.load(Ordering::Relaxed),
            orders_failed: self.orders_failed.load(Ordering::Relaxed),
            orders_cancelled: self.orders_cancelled.load(Ordering::Relaxed),
            signals_handled: self.signals_handled.load(Ordering::Relaxed),
            sniper_entries: self.sniper_entries.load(Ordering::Relaxed),
            sniper_exits: self.sniper_exits.load(Ordering::Relaxed),
            red_alerts: self.red_alerts.load(Ordering::Relaxed),
        }
    }
}

/// Operator-facing status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub sniper_enabled: bool,
    pub cooldown: CooldownState,
    pub monitor: MonitorStatus,
    pub sniper_position: Option<SniperPosition>,
    pub counters: CountersSnapshot,
}

// ============================================================================
// Engine
// ============================================================================

pub struct TradingEngine {
    config: EngineConfig,
    adapter: Arc<dyn ExchangeAdapter>,

    grid: GridEngine,
    cooldown: RwLock<RiskCooldown>,
    monitor: RwLock<BookMonitor>,
    sniper: RwLock<SniperManager>,
    stop_loss: RwLock<StopLossManager>,
    margin: RwLock<MarginManager>,

    /// Single-flight guard for signal arbitration
    arbiter_lock: tokio::sync::Mutex<()>,

    running: AtomicBool,
    sniper_enabled: AtomicBool,
    counters: Counters,
}

impl TradingEngine {
    pub fn new(config: EngineConfig, adapter: Arc<dyn ExchangeAdapter>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            grid: GridEngine::new(config.grid.clone())?,
            cooldown: RwLock::new(RiskCooldown::new(config.risk.clone())?),
            monitor: RwLock::new(BookMonitor::new(config.monitor.clone())?),
            sniper: RwLock::new(SniperManager::new(config.sniper.clone())?),
            stop_loss: RwLock::new(StopLossManager::new(config.stop_loss.clone())?),
            margin: RwLock::new(MarginManager::new(config.margin.clone())?),
            arbiter_lock: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            sniper_enabled: AtomicBool::new(config.sniper_enabled),
            counters: Counters::default(),
            config,
            adapter,
        })
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Spawn the four loops. Idempotent; returns immediately.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Engine already running");
            return;
        }
        info!("Engine starting");

        let engine = self.clone();
        tokio::spawn(async move {
            while engine.running.load(Ordering::SeqCst) {
                let now = now_ms();
                let cooling = engine.cooldown.write().is_cooling(now);
                if let Err(e) = engine.main_tick(now).await {
                    error!("Main cycle error: {e}");
                }
                let interval = if cooling {
                    engine.config.cooling_interval_ms
                } else {
                    engine.config.main_interval_ms
                };
                tokio::time::sleep(Duration::from_millis(interval)).await;
            }
            info!("Main cycle stopped");
        });

        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(engine.config.monitor_interval_ms));
            while engine.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if let Err(e) = engine.monitor_tick(now_ms()).await {
                    error!("Monitor loop error: {e}");
                }
            }
            info!("Monitor loop stopped");
        });

        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(engine.config.stop_loss_interval_ms));
            while engine.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if let Err(e) = engine.stop_loss_tick().await {
                    error!("Stop-loss loop error: {e}");
                }
            }
            info!("Stop-loss loop stopped");
        });

        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(engine.config.margin_interval_ms));
            while engine.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if let Err(e) = engine.margin_tick(now_ms()).await {
                    error!("Margin loop error: {e}");
                }
            }
            info!("Margin loop stopped");
        });
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Engine stopping");
        }
    }

    // ------------------------------------------------------------------------
    // Operator surface
    // ------------------------------------------------------------------------

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.running.load(Ordering::SeqCst),
            sniper_enabled: self.sniper_enabled.load(Ordering::SeqCst),
            cooldown: self.cooldown.read().state().clone(),
            monitor: self.monitor.read().status(),
            sniper_position: self.sniper.read().position().cloned(),
            counters: self.counters.snapshot(),
        }
    }

    pub fn reset_cooldown(&self) {
        self.cooldown.write().reset();
    }

    pub fn set_sniper_mode(&self, enabled: bool) {
        info!("Sniper mode {}", if enabled { "armed" } else { "disarmed" });
        self.sniper_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_protection_percents(&self, take_profit: f64, stop_loss: f64) -> Result<()> {
        self.stop_loss.write().set_percents(take_profit, stop_loss)
    }

    pub fn set_margin_threshold(&self, threshold: f64) -> Result<()> {
        self.margin.write().set_threshold(threshold)
    }

    // ------------------------------------------------------------------------
    // Main cycle
    // ------------------------------------------------------------------------

    async fn main_tick(&self, now: u64) -> Result<()> {
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);

        let cooling = self.cooldown.write().is_cooling(now);
        if cooling {
            debug!("Cooling, cancel-only cycle");
            self.adapter.cancel_all().await?;
            return Ok(());
        }

        let readings = self.adapter.indicators().await?;
        let breach = self.cooldown.read().evaluate(&readings);
        if let Some(reason) = breach {
            self.cooldown.write().trigger(CooldownSource::Indicator, reason, now);
            self.flush_exposure().await?;
            return Ok(());
        }

        match self.monitor.read().alert_level() {
            AlertLevel::Red => {
                warn!("Red alert, grid placement paused");
                return Ok(());
            }
            AlertLevel::Orange => {
                warn!("Orange alert, proceeding with caution");
            }
            _ => {}
        }

        self.reconcile_grid(readings.rsi).await
    }

    /// Cancel everything and close any open position at a crossing limit
    async fn flush_exposure(&self) -> Result<()> {
        self.adapter.cancel_all().await?;
        if let Some(pos) = self.adapter.position().await? {
            let offset = self.config.flush_offset_percent / 100.0;
            let limit = if pos.is_long() {
                round_tick(pos.mark_price * (1.0 - offset))
            } else {
                round_tick(pos.mark_price * (1.0 + offset))
            };
            if !self.adapter.close_position(1.0, limit).await? {
                warn!("Flush close rejected, retrying next cycle");
            }
        }
        Ok(())
    }

    /// Converge the resting order set on the ideal grid. Each round works
    /// from a fresh snapshot; cancel rounds run first, placement happens
    /// once the observed set is clean.
    async fn reconcile_grid(&self, momentum: Option<f64>) -> Result<()> {
        for round in 0..MAX_RECONCILE_ROUNDS {
            let Some(quote) = self.adapter.quote().await? else {
                debug!("No quote, skipping grid cycle");
                return Ok(());
            };
            let open_orders = self.adapter.open_orders().await?;
            let position = self.adapter.position().await?.map(|p| p.size).unwrap_or(0.0);
            let order_size = self.adapter.order_size().await?;

            let plan = self.grid.plan(&GridSnapshot {
                quote,
                open_orders,
                position,
                order_size,
                momentum,
            });

            if plan.is_settled() {
                debug!("Grid settled after {round} rounds");
                return Ok(());
            }

            if !plan.cancels.is_empty() {
                for cancel in &plan.cancels {
                    match self.adapter.cancel_order(cancel.price).await {
                        Ok(true) => {
                            self.counters.orders_cancelled.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(false) => debug!("Cancel at {:.1} not found", cancel.price),
                        Err(e) => warn!("Cancel at {:.1} failed: {e}", cancel.price),
                    }
                }
                continue;
            }

            for (side, prices) in [(Side::Sell, &plan.new_sell_prices), (Side::Buy, &plan.new_buy_prices)] {
                for &price in prices {
                    match self.adapter.place_limit_order(side, price).await {
                        Ok(true) => {
                            self.counters.orders_placed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(false) => {
                            self.counters.orders_failed.fetch_add(1, Ordering::Relaxed);
                            warn!("{side:?} order at {price:.1} rejected");
                        }
                        Err(e) => {
                            self.counters.orders_failed.fetch_add(1, Ordering::Relaxed);
                            warn!("{side:?} order at {price:.1} failed: {e}");
                        }
                    }
                }
            }
            return Ok(());
        }
        warn!("Grid did not settle within {MAX_RECONCILE_ROUNDS} rounds");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Monitor loop
    // ------------------------------------------------------------------------

    async fn monitor_tick(&self, now: u64) -> Result<()> {
        let Some(quote) = self.adapter.quote().await? else {
            return Ok(());
        };
        let whales = self.adapter.large_orders().await?;
        let mid = quote.mid_price();

        let level = self.monitor.write().tick(&whales, mid, now);
        if level == AlertLevel::Red {
            self.counters.red_alerts.fetch_add(1, Ordering::Relaxed);
            self.check_whale_risk(now).await?;
        }

        if self.sniper_enabled.load(Ordering::SeqCst) {
            self.arbitrate_signal(quote, now).await?;
        }

        self.manage_sniper_position(mid, now).await
    }

    /// Red alert with an active vacuum and runaway price velocity: flush
    /// and enter a whale cooldown
    async fn check_whale_risk(&self, now: u64) -> Result<()> {
        let (vacuum, velocity) = {
            let monitor = self.monitor.read();
            (monitor.vacuum_active(), monitor.last_price_velocity())
        };
        if !(vacuum && velocity.abs() > self.config.monitor.price_velocity_bound) {
            return Ok(());
        }
        if self.cooldown.write().is_cooling(now) {
            return Ok(());
        }
        self.cooldown.write().trigger(
            CooldownSource::Whale,
            format!("red alert with vacuum and price velocity {velocity:+.1}/s"),
            now,
        );
        self.flush_exposure().await
    }

    /// Single-flight signal arbitration. A busy guard means another tick is
    /// mid-entry; this tick simply skips.
    async fn arbitrate_signal(&self, quote: Quote, now: u64) -> Result<()> {
        let Ok(_guard) = self.arbiter_lock.try_lock() else {
            debug!("Arbiter busy, skipping signal check");
            return Ok(());
        };

        let Some(signal) = self.monitor.read().pending_signal(now).cloned() else {
            return Ok(());
        };

        let source = {
            let mut cooldown = self.cooldown.write();
            cooldown.is_cooling(now);
            cooldown.source()
        };

        let intent = self
            .sniper
            .write()
            .handle_signal(&signal, source, quote.mid_price());
        let Some(intent) = intent else {
            return Ok(());
        };
        self.counters.signals_handled.fetch_add(1, Ordering::Relaxed);

        match self.adapter.place_limit_order(Side::Buy, intent.entry_price).await {
            Ok(true) => {
                self.sniper.write().confirm_entry(&signal, intent.entry_price, now);
                self.monitor.write().clear_signals();
                self.counters.sniper_entries.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                self.counters.orders_failed.fetch_add(1, Ordering::Relaxed);
                warn!("Sniper entry at {:.1} rejected", intent.entry_price);
            }
            Err(e) => {
                self.counters.orders_failed.fetch_add(1, Ordering::Relaxed);
                warn!("Sniper entry at {:.1} failed: {e}", intent.entry_price);
            }
        }
        Ok(())
    }

    async fn manage_sniper_position(&self, mid: f64, now: u64) -> Result<()> {
        let Some(exit) = self.sniper.write().manage(mid, now) else {
            return Ok(());
        };

        let offset = self.config.flush_offset_percent / 100.0;
        let limit = round_tick(mid * (1.0 - offset));
        match self.adapter.close_position(1.0, limit).await {
            Ok(true) => {
                info!("Sniper exit ({:?}) executed, pnl {:+.1}", exit.reason, exit.pnl);
                self.sniper.write().clear_position();
                self.counters.sniper_exits.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => warn!("Sniper exit close rejected, retrying next tick"),
            Err(e) => warn!("Sniper exit close failed: {e}"),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Protection loops
    // ------------------------------------------------------------------------

    async fn stop_loss_tick(&self) -> Result<()> {
        let position = self.adapter.position().await?;
        let Some(targets) = self.stop_loss.write().decide(position.as_ref()) else {
            return Ok(());
        };
        if self.submit_protective(targets).await? {
            self.stop_loss.write().confirm(targets);
        }
        Ok(())
    }

    /// Place the protective pair under reduce-only. The maker-only and
    /// reduce-only toggles are restored even when placement fails.
    async fn submit_protective(&self, targets: ProtectiveTargets) -> Result<bool> {
        self.adapter.set_maker_only(false).await?;
        self.adapter.set_reduce_only(true).await?;

        let side = if targets.is_long { Side::Sell } else { Side::Buy };
        let mut ok = true;
        for price in [targets.take_profit, targets.stop_loss] {
            match self.adapter.place_limit_order(side, price).await {
                Ok(true) => {
                    self.counters.orders_placed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {
                    self.counters.orders_failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Protective order at {price:.1} rejected");
                    ok = false;
                }
                Err(e) => {
                    self.counters.orders_failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Protective order at {price:.1} failed: {e}");
                    ok = false;
                }
            }
        }

        if let Err(e) = self.adapter.set_reduce_only(false).await {
            warn!("Failed to restore reduce-only: {e}");
            ok = false;
        }
        if let Err(e) = self.adapter.set_maker_only(true).await {
            warn!("Failed to restore maker-only: {e}");
            ok = false;
        }
        Ok(ok)
    }

    async fn margin_tick(&self, now: u64) -> Result<()> {
        let position = self.adapter.position().await?;
        let margin = self.adapter.margin_status().await?;

        let action = self.margin.write().decide(margin.as_ref(), position.as_ref(), now);
        let Some(action) = action else {
            return Ok(());
        };

        let success = match self.adapter.close_position(action.fraction, action.limit_price).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!("Margin close failed: {e}");
                false
            }
        };
        self.margin.write().record(success, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{
        IndicatorReadings, MarginStatus, OpenOrders, PositionInfo, WhaleOrder, WhaleSnapshot,
    };
    use parking_lot::Mutex;

    /// Scriptable venue double recording every action call
    #[derive(Default)]
    struct MockAdapter {
        quote: Mutex<Option<Quote>>,
        open_orders: Mutex<OpenOrders>,
        position: Mutex<Option<PositionInfo>>,
        margin: Mutex<Option<MarginStatus>>,
        indicators: Mutex<IndicatorReadings>,
        whales: Mutex<WhaleSnapshot>,
        reject_orders: Mutex<bool>,

        placed: Mutex<Vec<(Side, f64)>>,
        cancelled: Mutex<Vec<f64>>,
        cancel_all_calls: Mutex<u32>,
        closes: Mutex<Vec<(f64, f64)>>,
        toggles: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ExchangeAdapter for MockAdapter {
        async fn quote(&self) -> Result<Option<Quote>> {
            Ok(*self.quote.lock())
        }
        async fn open_orders(&self) -> Result<OpenOrders> {
            Ok(self.open_orders.lock().clone())
        }
        async fn position(&self) -> Result<Option<PositionInfo>> {
            Ok(*self.position.lock())
        }
        async fn margin_status(&self) -> Result<Option<MarginStatus>> {
            Ok(*self.margin.lock())
        }
        async fn indicators(&self) -> Result<IndicatorReadings> {
            Ok(*self.indicators.lock())
        }
        async fn large_orders(&self) -> Result<WhaleSnapshot> {
            Ok(self.whales.lock().clone())
        }
        async fn order_size(&self) -> Result<f64> {
            Ok(0.01)
        }
        async fn place_limit_order(&self, side: Side, price: f64) -> Result<bool> {
            if *self.reject_orders.lock() {
                return Ok(false);
            }
            self.placed.lock().push((side, price));
            Ok(true)
        }
        async fn cancel_order(&self, price: f64) -> Result<bool> {
            self.cancelled.lock().push(price);
            Ok(true)
        }
        async fn cancel_all(&self) -> Result<()> {
            *self.cancel_all_calls.lock() += 1;
            Ok(())
        }
        async fn close_position(&self, fraction: f64, limit_price: f64) -> Result<bool> {
            self.closes.lock().push((fraction, limit_price));
            Ok(true)
        }
        async fn set_maker_only(&self, enabled: bool) -> Result<()> {
            self.toggles.lock().push(format!("maker:{enabled}"));
            Ok(())
        }
        async fn set_reduce_only(&self, enabled: bool) -> Result<()> {
            self.toggles.lock().push(format!("reduce:{enabled}"));
            Ok(())
        }
    }

    fn engine_with(adapter: Arc<MockAdapter>) -> TradingEngine {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut config = EngineConfig::default();
        config.sniper_enabled = true;
        TradingEngine::new(config, adapter).unwrap()
    }

    fn set_quote(adapter: &MockAdapter, ask: f64, bid: f64) {
        *adapter.quote.lock() = Some(Quote::new(ask, bid));
    }

    #[tokio::test]
    async fn test_main_tick_places_grid() {
        let adapter = Arc::new(MockAdapter::default());
        set_quote(&adapter, 100_010.0, 99_990.0);
        let engine = engine_with(adapter.clone());

        engine.main_tick(1_000).await.unwrap();

        let placed = adapter.placed.lock();
        assert_eq!(placed.len(), 10);
        assert!(placed.contains(&(Side::Sell, 100_020.0)));
        assert!(placed.contains(&(Side::Buy, 99_980.0)));
        assert_eq!(engine.counters.snapshot().orders_placed, 10);
    }

    #[tokio::test]
    async fn test_cooling_cycle_only_cancels() {
        let adapter = Arc::new(MockAdapter::default());
        set_quote(&adapter, 100_010.0, 99_990.0);
        let engine = engine_with(adapter.clone());

        engine.cooldown.write().trigger(CooldownSource::Indicator, "test", 1_000);
        engine.main_tick(2_000).await.unwrap();

        assert_eq!(*adapter.cancel_all_calls.lock(), 1);
        assert!(adapter.placed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_indicator_breach_flushes_and_cools() {
        let adapter = Arc::new(MockAdapter::default());
        set_quote(&adapter, 100_010.0, 99_990.0);
        *adapter.indicators.lock() = IndicatorReadings {
            rsi: None,
            atr: Some(200.0),
            adx: None,
        };
        *adapter.position.lock() = Some(PositionInfo {
            size: 0.01,
            entry_price: 100_000.0,
            mark_price: 100_000.0,
        });
        let engine = engine_with(adapter.clone());

        engine.main_tick(1_000).await.unwrap();

        assert_eq!(*adapter.cancel_all_calls.lock(), 1);
        // Full close $100 below mark
        assert_eq!(adapter.closes.lock().as_slice(), &[(1.0, 99_900.0)]);
        assert!(engine.cooldown.write().is_cooling(2_000));
        assert!(adapter.placed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_cancels_before_placing() {
        let adapter = Arc::new(MockAdapter::default());
        set_quote(&adapter, 100_010.0, 99_990.0);
        adapter.open_orders.lock().sell_prices = vec![101_500.0];
        let engine = engine_with(adapter.clone());

        engine.main_tick(1_000).await.unwrap();

        // The mock keeps reporting the stray, so every round re-cancels it
        // and placement stays deferred until the book is clean
        assert!(adapter.cancelled.lock().contains(&101_500.0));
        assert_eq!(adapter.cancelled.lock().len(), MAX_RECONCILE_ROUNDS);
        assert!(adapter.placed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sniper_entry_flow() {
        let adapter = Arc::new(MockAdapter::default());
        set_quote(&adapter, 100_005.0, 99_995.0);
        let engine = engine_with(adapter.clone());

        // Prime price history, then a down spike enqueues a signal
        engine.monitor_tick(0).await.unwrap();
        engine.monitor_tick(1_000).await.unwrap();
        set_quote(&adapter, 99_915.0, 99_905.0);
        engine.monitor_tick(4_000).await.unwrap();

        let status = engine.status();
        assert!(status.sniper_position.is_some());
        assert_eq!(status.counters.sniper_entries, 1);
        // floor(99910 - 5)
        assert!(adapter.placed.lock().contains(&(Side::Buy, 99_905.0)));
        // Queue cleared on entry
        assert!(engine.monitor.read().pending_signal(4_000).is_none());
    }

    #[tokio::test]
    async fn test_sniper_disarmed_ignores_signals() {
        let adapter = Arc::new(MockAdapter::default());
        set_quote(&adapter, 100_005.0, 99_995.0);
        let engine = engine_with(adapter.clone());
        engine.set_sniper_mode(false);

        engine.monitor_tick(0).await.unwrap();
        set_quote(&adapter, 99_915.0, 99_905.0);
        engine.monitor_tick(3_000).await.unwrap();

        assert!(engine.status().sniper_position.is_none());
        assert!(adapter.placed.lock().is_empty());
        // The signal stays queued
        assert!(engine.monitor.read().pending_signal(3_000).is_some());
    }

    #[tokio::test]
    async fn test_protective_toggles_restored_on_rejection() {
        let adapter = Arc::new(MockAdapter::default());
        set_quote(&adapter, 100_010.0, 99_990.0);
        *adapter.position.lock() = Some(PositionInfo {
            size: 0.01,
            entry_price: 100_000.0,
            mark_price: 100_000.0,
        });
        *adapter.reject_orders.lock() = true;
        let engine = engine_with(adapter.clone());

        engine.stop_loss_tick().await.unwrap();

        let toggles = adapter.toggles.lock();
        assert_eq!(
            toggles.as_slice(),
            &["maker:false", "reduce:true", "reduce:false", "maker:true"]
        );
        // Rejected pair is retried next tick
        drop(toggles);
        *adapter.reject_orders.lock() = false;
        engine.stop_loss_tick().await.unwrap();
        assert_eq!(adapter.placed.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_margin_flow() {
        let adapter = Arc::new(MockAdapter::default());
        *adapter.position.lock() = Some(PositionInfo {
            size: 0.01,
            entry_price: 100_000.0,
            mark_price: 100_000.0,
        });
        *adapter.margin.lock() = Some(MarginStatus { used: 55.0, available: 45.0 });
        let engine = engine_with(adapter.clone());

        engine.margin_tick(1_000).await.unwrap();
        assert_eq!(adapter.closes.lock().as_slice(), &[(0.5, 99_900.0)]);

        // Inside the 60 s cooldown nothing more happens
        engine.margin_tick(30_000).await.unwrap();
        assert_eq!(adapter.closes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_whale_cooldown_via_monitor() {
        let adapter = Arc::new(MockAdapter::default());
        // Whales far from the mid (vacuum) and all on the bid side
        // (critical imbalance); the crash adds price velocity
        adapter.whales.lock().bids.push(WhaleOrder {
            side: Side::Buy,
            price: 99_000.0,
            size_usd: 200_000.0,
        });
        let engine = engine_with(adapter.clone());
        let mut price = 100_000.0;
        for i in 0..6u64 {
            set_quote(&adapter, price + 5.0, price - 5.0);
            engine.monitor_tick(i * 1_000).await.unwrap();
            price -= 60.0;
        }

        let status = engine.status();
        assert!(status.cooldown.active);
        assert_eq!(engine.cooldown.read().state().source, Some(CooldownSource::Whale));
    }

    #[tokio::test]
    async fn test_status_serializes() {
        let adapter = Arc::new(MockAdapter::default());
        set_quote(&adapter, 100_010.0, 99_990.0);
        let engine = engine_with(adapter.clone());
        engine.monitor_tick(1_000).await.unwrap();

        let json = serde_json::to_string(&engine.status()).unwrap();
        assert!(json.contains("\"counters\""));
        assert!(json.contains("\"cooldown\""));
    }

    #[test]
    fn test_config_validation_fatal() {
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(MockAdapter::default());
        let mut config = EngineConfig::default();
        config.grid.sell_ratio = 0.8;
        assert!(TradingEngine::new(config, adapter.clone()).is_err());

        let mut config = EngineConfig::default();
        config.monitor_interval_ms = 0;
        assert!(TradingEngine::new(config, adapter).is_err());
    }
}
