// ============================================================================
// Exchange Adapter - Boundary Between the Decision Engine and the Venue
// ============================================================================
//
// The engine never talks to an exchange directly. Everything it observes
// (quotes, resting orders, position, margin, indicators, the large-order
// book) and everything it does (place/cancel/close, order-mode toggles)
// goes through this trait. Implementations own connectivity, retries and
// any venue-specific quirks; the engine treats every call as a bounded
// blocking operation that may fail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that closes a position of the given sign
    pub fn closing(position: f64) -> Side {
        if position > 0.0 {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

/// Best bid/ask snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ask: f64,
    pub bid: f64,
}

impl Quote {
    /// Build a quote, swapping the legs if the feed reports them reversed
    pub fn new(ask: f64, bid: f64) -> Self {
        if ask >= bid {
            Self { ask, bid }
        } else {
            Self { ask: bid, bid: ask }
        }
    }

    pub fn mid_price(&self) -> f64 {
        (self.ask + self.bid) / 2.0
    }
}

/// Resting limit orders, as the venue reports them.
///
/// One order per price level; sells ascending, buys descending.
#[derive(Debug, Clone, Default)]
pub struct OpenOrders {
    pub sell_prices: Vec<f64>,
    pub buy_prices: Vec<f64>,
}

impl OpenOrders {
    pub fn total(&self) -> usize {
        self.sell_prices.len() + self.buy_prices.len()
    }
}

/// Current position as reported by the venue
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionInfo {
    /// Signed size (positive = long, negative = short)
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
}

impl PositionInfo {
    pub fn is_long(&self) -> bool {
        self.size > 0.0
    }

    pub fn abs_size(&self) -> f64 {
        self.size.abs()
    }
}

/// Margin usage snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarginStatus {
    pub used: f64,
    pub available: f64,
}

impl MarginStatus {
    /// Fraction of total margin in use, in [0, 1]
    pub fn usage_ratio(&self) -> f64 {
        let total = self.used + self.available;
        if total > 0.0 {
            self.used / total
        } else {
            0.0
        }
    }
}

/// Technical indicator readings. Each is optional: a missing reading
/// skips the dependent risk rule for that cycle, it never blocks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IndicatorReadings {
    /// Mean-reversion oscillator (RSI-like, 0-100)
    pub rsi: Option<f64>,
    /// Volatility indicator (ATR-like, quote-currency units)
    pub atr: Option<f64>,
    /// Trend-strength indicator (ADX-like, 0-100)
    pub adx: Option<f64>,
}

/// A single large resting order (at/above the monitor's notional threshold)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhaleOrder {
    pub side: Side,
    pub price: f64,
    /// Notional size in quote currency
    pub size_usd: f64,
}

/// Large-order book snapshot consumed by the anomaly monitor
#[derive(Debug, Clone, Default)]
pub struct WhaleSnapshot {
    pub asks: Vec<WhaleOrder>,
    pub bids: Vec<WhaleOrder>,
}

impl WhaleSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &WhaleOrder> {
        self.asks.iter().chain(self.bids.iter())
    }
}

/// The venue boundary. All reads return `Ok(None)`/empty when the data is
/// temporarily unavailable; `Err` is reserved for calls that genuinely
/// failed. Action calls return `Ok(false)` for a venue-side rejection.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Best bid/ask, or None while the feed is unavailable
    async fn quote(&self) -> Result<Option<Quote>>;

    /// Currently resting orders (sells ascending, buys descending)
    async fn open_orders(&self) -> Result<OpenOrders>;

    /// Current position, or None when flat
    async fn position(&self) -> Result<Option<PositionInfo>>;

    /// Margin usage, or None when the account data cannot be read.
    /// Implementations must not estimate: unavailable means unavailable.
    async fn margin_status(&self) -> Result<Option<MarginStatus>>;

    /// Technical indicator readings (each individually optional)
    async fn indicators(&self) -> Result<IndicatorReadings>;

    /// Resting orders at/above the large-order notional threshold
    async fn large_orders(&self) -> Result<WhaleSnapshot>;

    /// Configured per-order size for grid orders
    async fn order_size(&self) -> Result<f64>;

    /// Place a limit order; Ok(false) = rejected by the venue
    async fn place_limit_order(&self, side: Side, price: f64) -> Result<bool>;

    /// Cancel the resting order at this price; no-op if absent
    async fn cancel_order(&self, price: f64) -> Result<bool>;

    /// Best-effort cancel of every resting order
    async fn cancel_all(&self) -> Result<()>;

    /// Close `fraction` of the current position with a limit at `limit_price`
    async fn close_position(&self, fraction: f64, limit_price: f64) -> Result<bool>;

    /// Toggle the maker-only (post-only) order constraint
    async fn set_maker_only(&self, enabled: bool) -> Result<()>;

    /// Toggle the reduce-only order constraint
    async fn set_reduce_only(&self, enabled: bool) -> Result<()>;
}
