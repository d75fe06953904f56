// =============================================================================
// HFT Strategy Engine — round-based market scanner, price buffers, strategy
// evaluators, position manager, and maker/taker execution protocol.
// =============================================================================
//
// Wires feeds -> buffers -> strategies -> executor, per spec §4.5. Every
// submodule is independently testable: `PriceBuffer` and `MarketScanner` hold
// no strategy logic, the four evaluators in `strategies` are pure functions,
// and `PositionManager` owns only position state and the exit-rule chain.
// `engine` is the only piece that touches the Signal Bus, the execution
// adapter, and async timers.

pub mod engine;
pub mod market_scanner;
pub mod position_manager;
pub mod price_buffer;
pub mod strategies;

pub use engine::{HftEngine, HftEngineConfig};
pub use market_scanner::{CryptoMarket, MarketScanner, RoundInfo, ScannerConfig};
pub use position_manager::{ClosedPosition, OpenPosition, PositionManager, PositionManagerConfig};
pub use price_buffer::PriceBuffer;
