//! The ordered set of backend clients, keyed by selector.
//!
//! The first client is the primary (empty selector): its objects are
//! exposed unprefixed. The registry also owns the resolution of prefixed
//! IDs and image references to the backend they belong to.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tonic::Status;

use crate::client::RuntimeClient;
use crate::config::ProxyConfig;
use crate::error;
use crate::ident;

const RECONNECT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Registered backend clients in registration order, primary first.
pub struct RuntimeRegistry {
    clients: Vec<Arc<RuntimeClient>>,
}

impl RuntimeRegistry {
    pub fn new(config: &ProxyConfig) -> Self {
        let clients = config
            .backends
            .iter()
            .map(|b| {
                Arc::new(RuntimeClient::new(
                    b.selector.clone(),
                    b.socket_path.clone(),
                    config.connect_timeout,
                ))
            })
            .collect();
        Self { clients }
    }

    /// The primary backend (empty selector).
    pub fn primary(&self) -> &Arc<RuntimeClient> {
        &self.clients[0]
    }

    /// Look up a backend by selector. The empty selector is the primary.
    pub fn by_selector(&self, selector: &str) -> Option<&Arc<RuntimeClient>> {
        self.clients.iter().find(|c| c.selector() == selector)
    }

    /// All registered clients in registration order.
    pub fn all(&self) -> &[Arc<RuntimeClient>] {
        &self.clients
    }

    /// Snapshot of the clients that are ready (or can be brought to ready
    /// right now), in registration order. Connection attempts for the
    /// backends run concurrently.
    pub async fn active(&self) -> Vec<Arc<RuntimeClient>> {
        let probes = self.clients.iter().map(|c| {
            let client = c.clone();
            async move { client.ensure_ready().await.ok().map(|_| client) }
        });
        join_all(probes).await.into_iter().flatten().collect()
    }

    /// Resolve a possibly-prefixed object ID to its backend and the inner
    /// ID the backend knows. An unregistered selector is a routing error.
    pub fn client_for_id<'a>(
        &self,
        id: &'a str,
    ) -> Result<(Arc<RuntimeClient>, &'a str), Status> {
        match ident::split_id(id) {
            None => Ok((self.primary().clone(), id)),
            // A leading "__" decodes to the empty selector, which never
            // names a non-primary backend.
            Some(("", _)) => Err(error::unknown_runtime("")),
            Some((selector, inner)) => match self.by_selector(selector) {
                Some(client) => Ok((client.clone(), inner)),
                None => Err(error::unknown_runtime(selector)),
            },
        }
    }

    /// Resolve an image reference to its backend and the inner reference.
    /// The part before the first `/` is only treated as a selector when it
    /// names a registered non-primary backend; anything else (including
    /// bare digests) belongs to the primary namespace.
    pub fn client_for_image<'a>(&self, image: &'a str) -> (Arc<RuntimeClient>, &'a str) {
        if let Some((selector, inner)) = ident::split_image(image) {
            if !selector.is_empty() {
                if let Some(client) = self.by_selector(selector) {
                    return (client.clone(), inner);
                }
            }
        }
        (self.primary().clone(), image)
    }

    /// Whether an image reference may be used with a sandbox committed to
    /// `selector`. Bare digests are namespace-free and match any backend.
    pub fn image_belongs_to(&self, image: &str, selector: &str) -> bool {
        ident::is_digest(image) || self.client_for_image(image).0.selector() == selector
    }

    /// Periodically retry disconnected clients so fan-out requests pick a
    /// recovered backend up again without waiting for a by-selector call.
    pub fn spawn_reconnect(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RECONNECT_POLL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                for client in registry.all() {
                    if !client.is_ready().await {
                        let _ = client.ensure_ready().await;
                    }
                }
            }
        })
    }

    /// Stop every client. Idempotent.
    pub async fn stop(&self) {
        for client in &self.clients {
            client.stop().await;
        }
    }
}
