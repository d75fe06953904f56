// =============================================================================
// Signal Bus — typed fan-out hub with per-listener error isolation
// =============================================================================
//
// A stock pub/sub crate (tokio::sync::broadcast, etc.) isolates slow or
// lagging receivers differently than this contract requires: here, every
// currently-registered listener for an event MUST be invoked on every
// `emit`, and a listener that panics must not prevent delivery to the
// remaining listeners. That rules out broadcast channels (which drop
// messages for lagging receivers) in favour of the explicit
// `EventEmitter` registration table, per DESIGN NOTES.
//
// State: listener tables only, mutated exclusively by `on_*`/`off_*`. No
// venue state is owned here.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;

use crate::event_emitter::{EventEmitter, ListenerId};
use crate::feed::manager::FeedManager;
use crate::types::{OrderbookSnapshot, PriceUpdate, TradeSignal};

pub struct SignalBus {
    ticks: EventEmitter<PriceUpdate>,
    orderbooks: EventEmitter<OrderbookSnapshot>,
    signals: EventEmitter<TradeSignal>,
    /// Teardown closures for the current feed binding; running one detaches
    /// this bus from a single `FeedManager` event stream.
    feed_unsubscribers: RwLock<Vec<Box<dyn FnOnce() + Send>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            ticks: EventEmitter::new("tick"),
            orderbooks: EventEmitter::new("orderbook"),
            signals: EventEmitter::new("signal"),
            feed_unsubscribers: RwLock::new(Vec::new()),
        }
    }

    // -------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------

    pub fn on_tick(&self, listener: Box<dyn Fn(&PriceUpdate) + Send + Sync>) -> ListenerId {
        self.ticks.on(listener)
    }

    pub fn on_orderbook(
        &self,
        listener: Box<dyn Fn(&OrderbookSnapshot) + Send + Sync>,
    ) -> ListenerId {
        self.orderbooks.on(listener)
    }

    pub fn on_signal(&self, listener: Box<dyn Fn(&TradeSignal) + Send + Sync>) -> ListenerId {
        self.signals.on(listener)
    }

    pub fn off_tick(&self, id: ListenerId) {
        self.ticks.off(id);
    }

    pub fn off_orderbook(&self, id: ListenerId) {
        self.orderbooks.off(id);
    }

    pub fn off_signal(&self, id: ListenerId) {
        self.signals.off(id);
    }

    // -------------------------------------------------------------------
    // Emit
    // -------------------------------------------------------------------

    /// Emit a tick to every attached listener, isolating each one's
    /// failure. Returns `true` iff at least one listener was attached.
    pub fn emit_tick(&self, event: &PriceUpdate) -> bool {
        self.ticks.emit(event)
    }

    pub fn emit_orderbook(&self, event: &OrderbookSnapshot) -> bool {
        self.orderbooks.emit(event)
    }

    pub fn emit_signal(&self, event: &TradeSignal) -> bool {
        self.signals.emit(event)
    }

    // -------------------------------------------------------------------
    // Feed wiring
    // -------------------------------------------------------------------

    /// Subscribe once to the manager's price and orderbook streams and
    /// republish them as `tick`/`orderbook` bus events. Re-wiring tears
    /// down any prior feed binding first.
    pub fn connect_feeds(self: &Arc<Self>, feed_manager: &Arc<FeedManager>) {
        self.disconnect_feeds();

        let bus_for_ticks = Arc::clone(self);
        let tick_id = feed_manager.on_price(Box::new(move |update| {
            bus_for_ticks.emit_tick(update);
        }));

        let bus_for_books = Arc::clone(self);
        let book_id = feed_manager.on_orderbook(Box::new(move |snapshot| {
            bus_for_books.emit_orderbook(snapshot);
        }));

        let manager_a = Arc::clone(feed_manager);
        let manager_b = Arc::clone(feed_manager);
        let mut unsubs = self.feed_unsubscribers.write();
        unsubs.push(Box::new(move || manager_a.off_price(tick_id)));
        unsubs.push(Box::new(move || manager_b.off_orderbook(book_id)));
    }

    /// Drop all producer listeners; the bus keeps accepting direct `emit_*`
    /// calls from in-process strategies.
    pub fn disconnect_feeds(&self) {
        let mut unsubs = self.feed_unsubscribers.write();
        for unsub in unsubs.drain(..) {
            unsub();
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_tick() -> PriceUpdate {
        PriceUpdate {
            venue: "polymarket".into(),
            market_id: "m1".into(),
            outcome_id: "t1".into(),
            price: 0.5,
            previous_price: None,
            timestamp: 0,
        }
    }

    #[test]
    fn isolates_a_panicking_listener() {
        let bus = SignalBus::new();
        let a_ran = Arc::new(AtomicUsize::new(0));
        let c_ran = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&a_ran);
        bus.on_tick(Box::new(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        }));
        bus.on_tick(Box::new(|_| panic!("listener B exploded")));
        let c = Arc::clone(&c_ran);
        bus.on_tick(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        let had_listeners = bus.emit_tick(&sample_tick());

        assert!(had_listeners);
        assert_eq!(a_ran.load(Ordering::SeqCst), 1);
        assert_eq!(c_ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_with_no_listeners_returns_false() {
        let bus = SignalBus::new();
        assert!(!bus.emit_tick(&sample_tick()));
    }

    #[test]
    fn off_tick_detaches_only_the_named_listener() {
        let bus = SignalBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        let id1 = bus.on_tick(Box::new(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        let c2 = Arc::clone(&count);
        bus.on_tick(Box::new(move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        }));

        bus.off_tick(id1);
        bus.emit_tick(&sample_tick());

        assert_eq!(count.load(Ordering::SeqCst), 10);
    }
}
