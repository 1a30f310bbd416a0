use crate::store::chain::Chain;
use crate::transport::TransportError;
use bytes::Bytes;

#[derive(Debug, thiserror::Error)]
pub enum StoreProxyError {
    /// Deadline exceeded on an invoke or a barrier wait. The pending barrier
    /// entry, if any, is left in place for server reconciliation.
    #[error("store operation timed out")]
    Timeout,
    /// Transport lost during a call or wait. Fatal for the call only; callers
    /// retry after reconnection.
    #[error("cluster tier manager disconnected")]
    Disconnected,
    #[error("server store proxy failure: {0}")]
    Proxy(String),
}

impl From<TransportError> for StoreProxyError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout => StoreProxyError::Timeout,
            TransportError::Disconnected => StoreProxyError::Disconnected,
            TransportError::Protocol(description) => StoreProxyError::Proxy(description),
        }
    }
}

/// Upstream cache hook: purge the local tier when a peer mutates.
pub trait InvalidationListener: Send + Sync {
    fn on_invalidate_hash(&self, key: u64);
    fn on_invalidate_all(&self);
}

/// Client-side access to the services of one server store.
#[async_trait::async_trait]
pub trait ServerStoreProxy: Send + Sync {
    fn cache_id(&self) -> &str;

    async fn get(&self, key: u64) -> Result<Chain, StoreProxyError>;

    async fn append(&self, key: u64, payload: Bytes) -> Result<(), StoreProxyError>;

    /// Returns the chain as it stood before the append was applied.
    async fn get_and_append(&self, key: u64, payload: Bytes) -> Result<Chain, StoreProxyError>;

    /// Optimistic fire-and-forget CAS: the server silently ignores the request
    /// if `expect` no longer matches the chain prefix.
    async fn replace_at_head(
        &self,
        key: u64,
        expect: Chain,
        update: Chain,
    ) -> Result<(), StoreProxyError>;

    async fn clear(&self) -> Result<(), StoreProxyError>;

    fn close(&self);
}
