// =============================================================================
// Feed Manager — lifecycle owner of venue adapters
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::event_emitter::{EventEmitter, ListenerId};
use crate::feed::adapter::FeedAdapter;
use crate::types::{Market, OrderbookSnapshot, PriceUpdate, VenueId};

pub struct FeedManager {
    /// Built once at construction; never mutated afterwards.
    adapters: HashMap<VenueId, Arc<dyn FeedAdapter>>,
    prices: EventEmitter<PriceUpdate>,
    orderbooks: EventEmitter<OrderbookSnapshot>,
}

impl FeedManager {
    /// Construct the manager and wire every adapter's own price/orderbook
    /// stream into the manager's aggregate listener tables. The adapters
    /// map is append-only from this point on.
    pub fn new(adapters: HashMap<VenueId, Arc<dyn FeedAdapter>>) -> Arc<Self> {
        let manager = Arc::new(Self {
            adapters,
            prices: EventEmitter::new("feed_manager_price"),
            orderbooks: EventEmitter::new("feed_manager_orderbook"),
        });

        for adapter in manager.adapters.values() {
            let mgr = Arc::clone(&manager);
            adapter.on_price(Box::new(move |update| {
                mgr.prices.emit(update);
            }));

            let mgr = Arc::clone(&manager);
            adapter.on_orderbook(Box::new(move |snapshot| {
                mgr.orderbooks.emit(snapshot);
            }));
        }

        manager
    }

    pub fn venues(&self) -> Vec<VenueId> {
        self.adapters.keys().cloned().collect()
    }

    fn adapter(&self, venue: &str) -> Option<&Arc<dyn FeedAdapter>> {
        self.adapters.get(venue)
    }

    /// Start every registered adapter concurrently; resolve when all
    /// complete. Individual adapter failures are logged, not propagated —
    /// the manager stays usable with whichever adapters came up.
    pub async fn start(&self) {
        let starts = self.adapters.iter().map(|(venue, adapter)| {
            let venue = venue.clone();
            let adapter = Arc::clone(adapter);
            async move {
                if let Err(err) = adapter.start().await {
                    warn!(venue = %venue, error = %err, "adapter failed to start");
                } else {
                    info!(venue = %venue, "adapter started");
                }
            }
        });
        join_all(starts).await;
    }

    pub async fn stop(&self) {
        let stops = self.adapters.iter().map(|(venue, adapter)| {
            let venue = venue.clone();
            let adapter = Arc::clone(adapter);
            async move {
                if let Err(err) = adapter.stop().await {
                    warn!(venue = %venue, error = %err, "adapter failed to stop cleanly");
                }
            }
        });
        join_all(stops).await;
    }

    /// If `venue` is given, dispatch to that adapter; otherwise try each
    /// adapter in turn and return the first non-null result.
    pub async fn get_market(&self, id: &str, venue: Option<&str>) -> anyhow::Result<Option<Market>> {
        if let Some(venue) = venue {
            return match self.adapter(venue) {
                Some(adapter) => adapter.get_market(id).await,
                None => Ok(None),
            };
        }

        for adapter in self.adapters.values() {
            if let Some(market) = adapter.get_market(id).await? {
                return Ok(Some(market));
            }
        }
        Ok(None)
    }

    /// With `venue`, forward; without, fan out in parallel, collect, and
    /// sort by 24h volume descending.
    pub async fn search_markets(
        &self,
        query: &str,
        venue: Option<&str>,
    ) -> anyhow::Result<Vec<Market>> {
        if let Some(venue) = venue {
            return match self.adapter(venue) {
                Some(adapter) => adapter.search_markets(query).await,
                None => Ok(Vec::new()),
            };
        }

        let searches = self.adapters.values().map(|adapter| {
            let adapter = Arc::clone(adapter);
            let query = query.to_string();
            async move { adapter.search_markets(&query).await }
        });

        let results = join_all(searches).await;
        let mut markets = Vec::new();
        for result in results {
            match result {
                Ok(found) => markets.extend(found),
                Err(err) => warn!(error = %err, "adapter search failed"),
            }
        }
        markets.sort_by(|a, b| b.volume_24h.partial_cmp(&a.volume_24h).unwrap_or(std::cmp::Ordering::Equal));
        Ok(markets)
    }

    /// Delegate to `get_market` and return `outcomes[0].price`.
    pub async fn get_price(&self, venue: &str, id: &str) -> anyhow::Result<Option<f64>> {
        Ok(self
            .get_market(id, Some(venue))
            .await?
            .and_then(|m| m.first_price()))
    }

    /// Forward to the adapter when it implements order books; otherwise
    /// synthesize a degenerate single-level book from the market's first
    /// outcome.
    pub async fn get_orderbook(
        &self,
        venue: &str,
        id: &str,
    ) -> anyhow::Result<Option<OrderbookSnapshot>> {
        let Some(adapter) = self.adapter(venue) else {
            return Ok(None);
        };

        if let Some(book) = adapter.get_orderbook(id).await? {
            return Ok(Some(book));
        }

        let Some(market) = adapter.get_market(id).await? else {
            return Ok(None);
        };
        let Some(outcome) = market.outcomes.first() else {
            return Ok(None);
        };

        let size = outcome.volume_24h.unwrap_or(market.volume_24h).max(1.0);
        let now = chrono::Utc::now().timestamp_millis();
        Ok(Some(OrderbookSnapshot::synthesize(
            venue,
            id,
            outcome.id.clone(),
            outcome.price,
            size,
            now,
        )))
    }

    /// Tell the adapter to start streaming this market (if it supports
    /// subscriptions) and attach a filter listener that only invokes
    /// `callback` for ticks matching `(venue, id)`. The returned closure
    /// detaches the listener and tells the adapter to unsubscribe.
    pub fn subscribe_price(
        self: &Arc<Self>,
        venue: &str,
        id: &str,
        callback: Box<dyn Fn(&PriceUpdate) + Send + Sync>,
    ) -> Box<dyn FnOnce() + Send> {
        let venue = venue.to_string();
        let market_id = id.to_string();

        if let Some(adapter) = self.adapter(&venue) {
            let adapter = Arc::clone(adapter);
            let sub_venue = venue.clone();
            let sub_id = market_id.clone();
            tokio::spawn(async move {
                if let Err(err) = adapter.subscribe_to_market(&sub_id).await {
                    warn!(venue = %sub_venue, market_id = %sub_id, error = %err, "subscribe failed");
                }
            });
        }

        let filter_venue = venue.clone();
        let filter_id = market_id.clone();
        let listener_id = self.prices.on(Box::new(move |update: &PriceUpdate| {
            if update.venue == filter_venue && update.market_id == filter_id {
                callback(update);
            }
        }));

        let manager = Arc::clone(self);
        Box::new(move || {
            manager.prices.off(listener_id);
            if let Some(adapter) = manager.adapter(&venue) {
                let adapter = Arc::clone(adapter);
                let id = market_id.clone();
                tokio::spawn(async move {
                    let _ = adapter.unsubscribe_from_market(&id).await;
                });
            }
        })
    }

    // -------------------------------------------------------------------
    // Aggregate listener table (what `SignalBus::connect_feeds` attaches to)
    // -------------------------------------------------------------------

    pub fn on_price(&self, listener: Box<dyn Fn(&PriceUpdate) + Send + Sync>) -> ListenerId {
        self.prices.on(listener)
    }

    pub fn off_price(&self, id: ListenerId) {
        self.prices.off(id);
    }

    pub fn on_orderbook(
        &self,
        listener: Box<dyn Fn(&OrderbookSnapshot) + Send + Sync>,
    ) -> ListenerId {
        self.orderbooks.on(listener)
    }

    pub fn off_orderbook(&self, id: ListenerId) {
        self.orderbooks.off(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::adapter::AdapterEvents;
    use crate::types::Outcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubAdapter {
        venue: VenueId,
        events: AdapterEvents,
        markets: Mutex<HashMap<String, Market>>,
    }

    impl StubAdapter {
        fn new(venue: &str, market: Market) -> Self {
            let mut markets = HashMap::new();
            markets.insert(market.id.clone(), market);
            Self {
                venue: venue.to_string(),
                events: AdapterEvents::new(),
                markets: Mutex::new(markets),
            }
        }
    }

    #[async_trait]
    impl FeedAdapter for StubAdapter {
        fn venue(&self) -> VenueId {
            self.venue.clone()
        }

        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn search_markets(&self, _query: &str) -> anyhow::Result<Vec<Market>> {
            Ok(self.markets.lock().unwrap().values().cloned().collect())
        }

        async fn get_market(&self, id: &str) -> anyhow::Result<Option<Market>> {
            Ok(self.markets.lock().unwrap().get(id).cloned())
        }

        fn on_price(&self, listener: Box<dyn Fn(&PriceUpdate) + Send + Sync>) -> ListenerId {
            self.events.on_price(listener)
        }

        fn off_price(&self, id: ListenerId) {
            self.events.off_price(id);
        }

        fn on_orderbook(
            &self,
            listener: Box<dyn Fn(&OrderbookSnapshot) + Send + Sync>,
        ) -> ListenerId {
            self.events.on_orderbook(listener)
        }

        fn off_orderbook(&self, id: ListenerId) {
            self.events.off_orderbook(id);
        }
    }

    fn sample_market(venue: &str, id: &str, price: f64, volume: f64) -> Market {
        Market {
            venue: venue.into(),
            id: id.into(),
            slug: id.into(),
            question: "will it?".into(),
            outcomes: vec![Outcome {
                id: format!("{id}-yes"),
                name: "Yes".into(),
                price,
                volume_24h: None,
            }],
            volume_24h: volume,
            liquidity: 0.0,
            close_time: None,
            end_time: None,
            resolved: false,
            resolution_value: None,
            tags: None,
            url: String::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn get_orderbook_synthesizes_when_adapter_has_none() {
        let adapter = Arc::new(StubAdapter::new("poly", sample_market("poly", "m1", 0.42, 500.0)));
        let mut adapters: HashMap<VenueId, Arc<dyn FeedAdapter>> = HashMap::new();
        adapters.insert("poly".into(), adapter);
        let manager = FeedManager::new(adapters);

        let book = manager.get_orderbook("poly", "m1").await.unwrap().unwrap();
        assert_eq!(book.best_bid, 0.42);
        assert_eq!(book.best_ask, 0.42);
    }

    #[tokio::test]
    async fn search_markets_sorts_by_volume_descending() {
        let a = Arc::new(StubAdapter::new("poly", sample_market("poly", "low", 0.5, 10.0)));
        let b = Arc::new(StubAdapter::new("kalshi", sample_market("kalshi", "high", 0.5, 900.0)));
        let mut adapters: HashMap<VenueId, Arc<dyn FeedAdapter>> = HashMap::new();
        adapters.insert("poly".into(), a);
        adapters.insert("kalshi".into(), b);
        let manager = FeedManager::new(adapters);

        let results = manager.search_markets("x", None).await.unwrap();
        assert_eq!(results[0].id, "high");
    }

    #[tokio::test]
    async fn subscribe_price_filters_by_venue_and_market() {
        let adapter = Arc::new(StubAdapter::new("poly", sample_market("poly", "m1", 0.5, 1.0)));
        let mut adapters: HashMap<VenueId, Arc<dyn FeedAdapter>> = HashMap::new();
        adapters.insert("poly".into(), Arc::clone(&adapter) as Arc<dyn FeedAdapter>);
        let manager = FeedManager::new(adapters);

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let unsub = manager.subscribe_price(
            "poly",
            "m1",
            Box::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        manager.prices.emit(&PriceUpdate {
            venue: "poly".into(),
            market_id: "m1".into(),
            outcome_id: "m1-yes".into(),
            price: 0.51,
            previous_price: Some(0.5),
            timestamp: 0,
        });
        manager.prices.emit(&PriceUpdate {
            venue: "kalshi".into(),
            market_id: "other".into(),
            outcome_id: "x".into(),
            price: 0.2,
            previous_price: None,
            timestamp: 0,
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        unsub();
    }
}
