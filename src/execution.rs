// =============================================================================
// Execution Interface — the platform-agnostic order contract the HFT engine
// submits orders through. The concrete venue implementation lives outside
// this crate; the engine only ever holds a `dyn ExecutionAdapter`.
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{MarketId, Side, TokenId, VenueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Gtc,
    Fok,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub venue: VenueId,
    pub market_id: MarketId,
    pub token_id: TokenId,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub neg_risk: bool,
    pub order_type: OrderType,
    pub post_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub filled_size: Option<f64>,
    pub avg_fill_price: Option<f64>,
    pub error: Option<String>,
}

impl OrderResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            filled_size: None,
            avg_fill_price: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("transport error talking to {venue}: {message}")]
    Transport { venue: VenueId, message: String },
    #[error("order rejected: {0}")]
    Rejected(String),
}

/// The contract the HFT engine requires of an execution backend. Per spec
/// §7 error handling, a failure is propagated back in `OrderResult` rather
/// than as an `Err` — the engine logs it and moves on, it never rethrows.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn buy_limit(&self, req: OrderRequest) -> OrderResult;
    async fn sell_limit(&self, req: OrderRequest) -> OrderResult;
    async fn cancel_order(&self, venue: &str, order_id: &str) -> OrderResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingAdapter {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExecutionAdapter for RecordingAdapter {
        async fn buy_limit(&self, _req: OrderRequest) -> OrderResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            OrderResult {
                success: true,
                order_id: Some("o1".into()),
                filled_size: Some(10.0),
                avg_fill_price: Some(0.5),
                error: None,
            }
        }

        async fn sell_limit(&self, _req: OrderRequest) -> OrderResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            OrderResult::failed("no liquidity")
        }

        async fn cancel_order(&self, _venue: &str, _order_id: &str) -> OrderResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            OrderResult { success: true, order_id: None, filled_size: None, avg_fill_price: None, error: None }
        }
    }

    #[tokio::test]
    async fn adapter_calls_are_tracked_and_failures_surface_in_the_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = RecordingAdapter { calls: Arc::clone(&calls) };

        let req = OrderRequest {
            venue: "polymarket".into(),
            market_id: "m1".into(),
            token_id: "t1".into(),
            side: Side::Buy,
            price: 0.5,
            size: 10.0,
            neg_risk: false,
            order_type: OrderType::Gtc,
            post_only: true,
        };

        let ok = adapter.buy_limit(req.clone()).await;
        assert!(ok.success);

        let mut sell_req = req;
        sell_req.side = Side::Sell;
        let failed = adapter.sell_limit(sell_req).await;
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("no liquidity"));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
