pub mod adapter;
pub mod binance_adapter;
pub mod manager;

pub use adapter::FeedAdapter;
pub use binance_adapter::BinanceSpotAdapter;
pub use manager::FeedManager;
