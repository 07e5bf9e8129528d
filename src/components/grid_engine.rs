// ============================================================================
// Grid Pricing Engine - Pure Grid Computation
// ============================================================================
//
// Computes the ideal ladder of resting buy/sell limit prices around the
// mid-price and the set of observed orders that no longer belong to it.
// This is a pure calculation layer: it takes a market snapshot and returns
// a plan, the engine owns execution and reconciliation.
//
// Reconciliation against a live book is iterative: a single snapshot may
// not observe the full resting-order set, so the caller re-snapshots and
// re-invokes this engine each round (up to `MAX_RECONCILE_ROUNDS`).

use serde::{Deserialize, Serialize};

use crate::adapter::{OpenOrders, Quote, Side};
use crate::errors::Error;

/// Maximum reconciliation rounds per trading cycle
pub const MAX_RECONCILE_ROUNDS: usize = 5;

/// Price equality tolerance. Ideal prices are interval-aligned, so exact
/// matching up to float noise is sufficient.
const PRICE_EPS: f64 = 1e-6;

/// Configuration for the grid pricing engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Total orders in the ladder (both sides combined)
    pub total_orders: usize,

    /// Window width as a fraction of mid-price (e.g. 0.005 = 0.5%)
    pub window_percent: f64,

    /// Base share of sell orders (must sum to 1 with buy_ratio)
    pub sell_ratio: f64,

    /// Base share of buy orders
    pub buy_ratio: f64,

    /// Grid spacing in quote-currency units
    pub base_interval: f64,

    /// Minimum distance from the touch before the first grid level
    pub safe_gap: f64,

    /// Extra slack beyond the window before a level is considered stray
    pub max_drift_buffer: f64,

    /// Absolute floor below which buy levels are never placed
    pub min_valid_price: f64,

    /// Position size (in per-order units) at which the grid goes fully
    /// one-sided toward reducing exposure
    pub max_multiplier: f64,

    /// Maximum cancellations returned per reconciliation round
    pub cancel_cap: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            total_orders: 10,
            window_percent: 0.005,
            sell_ratio: 0.5,
            buy_ratio: 0.5,
            base_interval: 10.0,
            safe_gap: 5.0,
            max_drift_buffer: 600.0,
            min_valid_price: 10_000.0,
            max_multiplier: 15.0,
            cancel_cap: 10,
        }
    }
}

impl GridConfig {
    /// Startup validation. Invariant violations here are fatal, the engine
    /// never re-validates at runtime.
    pub fn validate(&self) -> Result<(), Error> {
        if (self.sell_ratio + self.buy_ratio - 1.0).abs() > 1e-9 {
            return Err(Error::Config(format!(
                "sell_ratio + buy_ratio must equal 1, got {}",
                self.sell_ratio + self.buy_ratio
            )));
        }
        if self.total_orders == 0 {
            return Err(Error::Config("total_orders must be positive".into()));
        }
        if self.base_interval <= 0.0 {
            return Err(Error::Config("base_interval must be positive".into()));
        }
        if self.window_percent <= 0.0 {
            return Err(Error::Config("window_percent must be positive".into()));
        }
        if self.max_multiplier <= 0.0 {
            return Err(Error::Config("max_multiplier must be positive".into()));
        }
        Ok(())
    }

    /// Cancels closer to the mid than this are skipped: an order this near
    /// the touch is about to be useful (or about to fill) and pulling it
    /// churns the book for nothing.
    fn near_mid_skip_distance(&self) -> f64 {
        self.base_interval * (self.max_multiplier / 4.0)
    }
}

/// Per-cycle market snapshot consumed by the grid engine
#[derive(Debug, Clone)]
pub struct GridSnapshot {
    pub quote: Quote,
    pub open_orders: OpenOrders,
    /// Signed position in base units
    pub position: f64,
    /// Per-order size in base units
    pub order_size: f64,
    /// Optional momentum oscillator reading (RSI-like, 0-100) used by the
    /// trend filter; None disables the filter for this cycle
    pub momentum: Option<f64>,
}

/// An order the plan wants removed
#[derive(Debug, Clone, PartialEq)]
pub struct CancelOrder {
    pub side: Side,
    pub price: f64,
}

/// The grid engine's output for one reconciliation round
#[derive(Debug, Clone, Default)]
pub struct GridPlan {
    /// Ideal sell prices not yet resting
    pub new_sell_prices: Vec<f64>,
    /// Ideal buy prices not yet resting
    pub new_buy_prices: Vec<f64>,
    /// Observed orders to remove, farthest from mid first, capped per round
    pub cancels: Vec<CancelOrder>,
}

impl GridPlan {
    pub fn is_settled(&self) -> bool {
        self.new_sell_prices.is_empty() && self.new_buy_prices.is_empty() && self.cancels.is_empty()
    }
}

/// Pure grid price computation
pub struct GridEngine {
    config: GridConfig,
}

impl GridEngine {
    pub fn new(config: GridConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Compute the target order-set delta for one reconciliation round.
    pub fn plan(&self, snapshot: &GridSnapshot) -> GridPlan {
        let cfg = &self.config;
        let quote = snapshot.quote;
        let mid = quote.mid_price();
        let half_window = mid * cfg.window_percent / 2.0;
        let interval = cfg.base_interval;

        let (sell_ratio, _buy_ratio) = self.effective_ratios(snapshot.position, snapshot.order_size, snapshot.momentum);
        let sell_count = (cfg.total_orders as f64 * sell_ratio).round() as usize;
        let buy_count = cfg.total_orders - sell_count;

        // Ideal sell ladder: first aligned level above ask + safe_gap,
        // stepping up until the drift bound
        let sell_start = ((quote.ask + cfg.safe_gap) / interval).ceil() * interval;
        let mut ideal_sells = Vec::with_capacity(sell_count);
        for i in 0..sell_count {
            let p = sell_start + i as f64 * interval;
            if p > mid + half_window + cfg.max_drift_buffer {
                break;
            }
            ideal_sells.push(p);
        }

        // Ideal buy ladder: first aligned level below bid - safe_gap,
        // stepping down until the drift bound or the absolute floor
        let buy_start = ((quote.bid - cfg.safe_gap) / interval).floor() * interval;
        let mut ideal_buys = Vec::with_capacity(buy_count);
        for i in 0..buy_count {
            let p = buy_start - i as f64 * interval;
            if p < mid - half_window - cfg.max_drift_buffer {
                break;
            }
            if p < cfg.min_valid_price {
                break;
            }
            ideal_buys.push(p);
        }

        let new_sell_prices: Vec<f64> = ideal_sells
            .iter()
            .copied()
            .filter(|&p| !contains_price(&snapshot.open_orders.sell_prices, p))
            .collect();
        let new_buy_prices: Vec<f64> = ideal_buys
            .iter()
            .copied()
            .filter(|&p| !contains_price(&snapshot.open_orders.buy_prices, p))
            .collect();

        // Everything observed that is not an ideal level is stray, except
        // orders hugging the mid (skip distance) which are left alone
        let in_ideal = |p: f64, side: Side| match side {
            Side::Sell => contains_price(&ideal_sells, p),
            Side::Buy => contains_price(&ideal_buys, p),
        };
        let skip_distance = cfg.near_mid_skip_distance();

        let mut stray: Vec<CancelOrder> = snapshot
            .open_orders
            .sell_prices
            .iter()
            .map(|&p| CancelOrder { side: Side::Sell, price: p })
            .chain(
                snapshot
                    .open_orders
                    .buy_prices
                    .iter()
                    .map(|&p| CancelOrder { side: Side::Buy, price: p }),
            )
            .filter(|o| !in_ideal(o.price, o.side))
            .filter(|o| (o.price - mid).abs() > skip_distance)
            .collect();

        // Farthest from mid first, bounded per round
        stray.sort_by(|a, b| {
            let da = (a.price - mid).abs();
            let db = (b.price - mid).abs();
            db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
        });
        stray.truncate(cfg.cancel_cap);

        GridPlan {
            new_sell_prices,
            new_buy_prices,
            cancels: stray,
        }
    }

    /// Buy/sell order shares after inventory skew and the momentum trend
    /// filter. Always sums to 1.
    pub fn effective_ratios(&self, position: f64, order_size: f64, momentum: Option<f64>) -> (f64, f64) {
        let cfg = &self.config;
        let safe_order_size = order_size.max(1e-6);
        let multiplier = position.abs() / safe_order_size;

        let mut sell_ratio = cfg.sell_ratio;
        let mut buy_ratio = cfg.buy_ratio;
        let at_limit = multiplier >= cfg.max_multiplier;

        if at_limit {
            // Fully one-sided: only quote the side that reduces exposure
            if position > 0.0 {
                buy_ratio = 0.0;
                sell_ratio = 1.0;
            } else if position < 0.0 {
                sell_ratio = 0.0;
                buy_ratio = 1.0;
            }
        } else if multiplier > 0.0 {
            // Shift linearly toward the reducing side
            let reduction = multiplier / cfg.max_multiplier;
            if position > 0.0 {
                buy_ratio = (cfg.buy_ratio - reduction * cfg.buy_ratio).max(0.0);
                sell_ratio = 1.0 - buy_ratio;
            } else {
                sell_ratio = (cfg.sell_ratio - reduction * cfg.sell_ratio).max(0.0);
                buy_ratio = 1.0 - sell_ratio;
            }
        }

        if !at_limit {
            buy_ratio = buy_ratio.clamp(0.1, 0.9);
            sell_ratio = sell_ratio.clamp(0.1, 0.9);

            // Trend filter: lean against opening into momentum. Above the
            // neutral band we shrink the short side, below it the long side,
            // at most 50% either way.
            if let Some(r) = momentum {
                if r > 55.0 {
                    let factor = ((r - 55.0) / 30.0).min(0.5);
                    sell_ratio = (sell_ratio * (1.0 - factor)).max(0.1);
                    buy_ratio = 1.0 - sell_ratio;
                } else if r < 45.0 {
                    let factor = ((45.0 - r) / 30.0).min(0.5);
                    buy_ratio = (buy_ratio * (1.0 - factor)).max(0.1);
                    sell_ratio = 1.0 - buy_ratio;
                }
            }
        }

        (sell_ratio, buy_ratio)
    }
}

fn contains_price(prices: &[f64], target: f64) -> bool {
    prices.iter().any(|&p| (p - target).abs() < PRICE_EPS)
}
