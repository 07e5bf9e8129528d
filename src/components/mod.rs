// ============================================================================
// Engine Components - Pure Decision Building Blocks
// ============================================================================
//
// Each component owns one aspect of the strategy (grid pricing, risk
// cooldowns, book anomaly detection, sniper entries, exposure protection).
// Components are pure decision logic: they consume market snapshots plus an
// explicit `now_ms` timestamp and return typed intents. The `TradingEngine`
// wires them together and executes every intent through the adapter.
//
// # Components
//
// - `GridEngine`: ideal grid ladder + reconciliation delta
// - `RiskCooldown`: indicator-breach cooldown state machine
// - `BookMonitor`: spike/vacuum/imbalance detection + signal generation
// - `SniperManager`: signal arbitration + sniper position lifecycle
// - `StopLossManager`: protective TP/SL order re-pricing
// - `MarginManager`: margin-usage-triggered de-risking

pub mod book_monitor;
pub mod grid_engine;
pub mod margin_manager;
pub mod risk_cooldown;
pub mod sniper_manager;
pub mod stop_loss_manager;

pub use book_monitor::{
    AlertLevel, BookMonitor, MonitorConfig, MonitorStatus, Signal, SignalKind, SpikeDirection,
    SpikeEvent, SpikeWindow,
};
pub use grid_engine::{CancelOrder, GridConfig, GridEngine, GridPlan, GridSnapshot, MAX_RECONCILE_ROUNDS};
pub use margin_manager::{MarginAction, MarginConfig, MarginManager};
pub use risk_cooldown::{CooldownSource, CooldownState, RiskConfig, RiskCooldown};
pub use sniper_manager::{EntryIntent, ExitIntent, ExitReason, SniperConfig, SniperManager, SniperPosition};
pub use stop_loss_manager::{ProtectiveTargets, StopLossConfig, StopLossManager};
