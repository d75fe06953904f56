// =============================================================================
// Feed Adapter contract
// =============================================================================
//
// Individual venue wire formats (Polymarket CLOB, Kalshi, Manifold, ...) are
// opaque collaborators implementing this trait; this crate only depends on
// the contract. Shape mirrors the pack's `MarketFeed` port trait: async
// start/stop, search/get, optional orderbook and subscription support, plus
// a push side for price/orderbook events the Feed Manager forwards onto the
// Signal Bus.

use async_trait::async_trait;

use crate::event_emitter::{EventEmitter, ListenerId};
use crate::types::{Market, OrderbookSnapshot, PriceUpdate, VenueId};

/// Everything the Feed Manager requires of a venue adapter.
///
/// `get_orderbook`, `subscribe_to_market`, and `unsubscribe_from_market`
/// have inert defaults: an adapter that cannot stream order books or take
/// subscriptions simply inherits the no-op behavior, matching the "optional"
/// language in the adapter contract.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    fn venue(&self) -> VenueId;

    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;

    async fn search_markets(&self, query: &str) -> anyhow::Result<Vec<Market>>;
    async fn get_market(&self, id: &str) -> anyhow::Result<Option<Market>>;

    async fn get_orderbook(&self, _id: &str) -> anyhow::Result<Option<OrderbookSnapshot>> {
        Ok(None)
    }

    async fn subscribe_to_market(&self, _id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn unsubscribe_from_market(&self, _id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_price(&self, listener: Box<dyn Fn(&PriceUpdate) + Send + Sync>) -> ListenerId;
    fn off_price(&self, id: ListenerId);
    fn on_orderbook(&self, listener: Box<dyn Fn(&OrderbookSnapshot) + Send + Sync>)
        -> ListenerId;
    fn off_orderbook(&self, id: ListenerId);
}

/// Shared event-table plumbing a concrete adapter embeds to satisfy the
/// `on_price`/`on_orderbook` half of the trait without re-deriving the
/// listener bookkeeping in every implementation.
#[derive(Default)]
pub struct AdapterEvents {
    price: EventEmitter<PriceUpdate>,
    orderbook: EventEmitter<OrderbookSnapshot>,
}

impl AdapterEvents {
    pub fn new() -> Self {
        Self {
            price: EventEmitter::new("adapter_price"),
            orderbook: EventEmitter::new("adapter_orderbook"),
        }
    }

    pub fn on_price(&self, listener: Box<dyn Fn(&PriceUpdate) + Send + Sync>) -> ListenerId {
        self.price.on(listener)
    }

    pub fn off_price(&self, id: ListenerId) {
        self.price.off(id);
    }

    pub fn on_orderbook(
        &self,
        listener: Box<dyn Fn(&OrderbookSnapshot) + Send + Sync>,
    ) -> ListenerId {
        self.orderbook.on(listener)
    }

    pub fn off_orderbook(&self, id: ListenerId) {
        self.orderbook.off(id);
    }

    pub fn emit_price(&self, update: &PriceUpdate) -> bool {
        self.price.emit(update)
    }

    pub fn emit_orderbook(&self, snapshot: &OrderbookSnapshot) -> bool {
        self.orderbook.emit(snapshot)
    }
}
