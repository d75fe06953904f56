// =============================================================================
// Venue socket manager — connect deduplication
// =============================================================================
//
// `connections` holds the current socket per user; `connecting` holds an
// in-flight connect future per user so concurrent `get_or_create` calls
// collapse onto the same socket instead of racing separate connections.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::venue_socket::socket::UserSocket;
use crate::venue_socket::types::Credentials;

type UserId = String;
type ConnectFuture = Shared<BoxFuture<'static, Arc<UserSocket>>>;

pub struct VenueSocketManager {
    connections: RwLock<HashMap<UserId, Arc<UserSocket>>>,
    connecting: AsyncMutex<HashMap<UserId, ConnectFuture>>,
}

impl VenueSocketManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            connecting: AsyncMutex::new(HashMap::new()),
        })
    }

    /// True iff `socket` is still the one held for `user_id` — the
    /// staleness check background tasks run before mutating shared state.
    pub fn is_current(&self, user_id: &str, socket: &Arc<UserSocket>) -> bool {
        match self.connections.read().get(user_id) {
            Some(current) => Arc::ptr_eq(current, socket),
            None => false,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<UserSocket>> {
        self.connections.read().get(user_id).cloned()
    }

    /// If a connected socket exists for the user, return it. Otherwise, if
    /// a connect attempt is already in flight, return that same future.
    /// Otherwise tear down any previous socket and start a new connection.
    pub async fn get_or_create(
        self: &Arc<Self>,
        user_id: &str,
        venue: &str,
        ws_url: &str,
        credentials: Credentials,
    ) -> Arc<UserSocket> {
        if let Some(existing) = self.get(user_id) {
            if existing.is_connected() {
                return existing;
            }
        }

        let mut connecting = self.connecting.lock().await;
        if let Some(in_flight) = connecting.get(user_id) {
            let fut = in_flight.clone();
            drop(connecting);
            return fut.await;
        }

        if let Some(previous) = self.connections.read().get(user_id).cloned() {
            previous.disconnect();
        }

        let manager = Arc::clone(self);
        let user_id_owned = user_id.to_string();
        let venue_owned = venue.to_string();
        let ws_url_owned = ws_url.to_string();

        let fut: BoxFuture<'static, Arc<UserSocket>> = Box::pin(async move {
            let socket = UserSocket::new(
                venue_owned,
                user_id_owned.clone(),
                ws_url_owned,
                credentials,
                Arc::downgrade(&manager),
            );
            manager
                .connections
                .write()
                .insert(user_id_owned.clone(), Arc::clone(&socket));

            info!(user_id = %user_id_owned, "starting venue socket connection");
            tokio::spawn(UserSocket::run(Arc::clone(&socket)));

            manager.connecting.lock().await.remove(&user_id_owned);
            socket
        });

        let shared = fut.shared();
        connecting.insert(user_id.to_string(), shared.clone());
        drop(connecting);

        shared.await
    }

    pub fn disconnect(&self, user_id: &str) {
        if let Some(socket) = self.connections.write().remove(user_id) {
            socket.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_get_or_create_returns_same_socket() {
        let manager = VenueSocketManager::new();
        let creds = Credentials {
            api_key: "k".into(),
            secret: "s".into(),
            passphrase: String::new(),
            extra: Default::default(),
        };

        let m1 = Arc::clone(&manager);
        let c1 = creds.clone();
        let h1 = tokio::spawn(async move {
            m1.get_or_create("u-1", "poly", "wss://example.invalid", c1).await
        });
        let m2 = Arc::clone(&manager);
        let c2 = creds.clone();
        let h2 = tokio::spawn(async move {
            m2.get_or_create("u-1", "poly", "wss://example.invalid", c2).await
        });

        let (s1, s2) = tokio::join!(h1, h2);
        assert!(Arc::ptr_eq(&s1.unwrap(), &s2.unwrap()));
    }
}
