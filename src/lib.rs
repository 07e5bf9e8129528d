#![deny(unreachable_pub)]
pub mod adapter;
pub mod components;
pub mod engine;
mod errors;

// ============================================================================
// Core Exports
// ============================================================================
pub use adapter::{
    ExchangeAdapter, IndicatorReadings, MarginStatus, OpenOrders, PositionInfo, Quote, Side,
    WhaleOrder, WhaleSnapshot,
};
pub use engine::{CountersSnapshot, EngineConfig, EngineStatus, TradingEngine};
pub use errors::{Error, Result};

// ============================================================================
// Component Exports
// ============================================================================
pub use components::{
    AlertLevel, BookMonitor, CancelOrder, CooldownSource, CooldownState, EntryIntent, ExitIntent,
    ExitReason, GridConfig, GridEngine, GridPlan, GridSnapshot, MarginAction, MarginConfig,
    MarginManager, MonitorConfig, MonitorStatus, ProtectiveTargets, RiskConfig, RiskCooldown,
    Signal, SignalKind, SniperConfig, SniperManager, SniperPosition, SpikeDirection, SpikeEvent,
    SpikeWindow, StopLossConfig, StopLossManager,
};
