use crate::transport::messages::{ResponseKind, StoreRequest, StoreResponse};
use crate::transport::timeouts::Timeouts;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;

/// Handler for inbound responses of one kind. Invoked from the transport's
/// receive task, serialized per kind; may perform transport I/O of its own
/// (invalidation acks), hence the boxed future.
pub type ResponseListener = Arc<dyn Fn(StoreResponse) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked while a session is re-established, with the handshake message to
/// populate before the handshake continues.
pub type ReconnectListener = Box<dyn Fn(&mut ReconnectMessage) + Send + Sync>;

/// Invoked once the transport gives up on a lost session.
pub type DisconnectionListener = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("operation against the cluster tier timed out")]
    Timeout,
    #[error("cluster tier connection lost")]
    Disconnected,
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// One client endpoint of a cluster tier, servicing a single cache id. The
/// store proxies are written against this contract; the platform layer beneath
/// it owns framing, sessions and reconnection.
///
/// The transport applies its configured read timeout to `Get` invokes and the
/// mutative timeout to everything else; a missed deadline fails the invoke with
/// `TransportError::Timeout`.
#[async_trait::async_trait]
pub trait ClusterTierEntity: Send + Sync {
    /// Returns once the outbound frame is flushed. No response is expected.
    async fn invoke_wait_sent(
        &self,
        message: StoreRequest,
        replicate: bool,
    ) -> Result<(), TransportError>;

    /// Returns once the server has acknowledged receipt, before applying.
    async fn invoke_wait_received(
        &self,
        message: StoreRequest,
        replicate: bool,
    ) -> Result<(), TransportError>;

    /// Returns once the server has fully applied the message, replicated it if
    /// asked to, and produced its response. The only mode that returns data.
    async fn invoke_wait_retired(
        &self,
        message: StoreRequest,
        replicate: bool,
    ) -> Result<StoreResponse, TransportError>;

    /// Listeners of the same kind are kept and invoked in registration order.
    fn add_response_listener(&self, kind: ResponseKind, listener: ResponseListener);

    /// Single-shot registration; latest wins.
    fn set_reconnect_listener(&self, listener: ReconnectListener);

    /// Single-shot registration; latest wins.
    fn set_disconnection_listener(&self, listener: DisconnectionListener);

    fn is_connected(&self) -> bool;

    fn timeouts(&self) -> Timeouts;

    /// Detaches from the cluster tier. In-flight invokes fail with
    /// `Disconnected`.
    fn close(&self);
}

/// Handshake payload sent while a session is re-established: the barriers the
/// server must re-drive invalidation fan-outs for.
#[derive(Clone, Debug, Default)]
pub struct ReconnectMessage {
    invalidations_in_progress: HashSet<u64>,
    clear_in_progress: bool,
}

impl ReconnectMessage {
    pub fn new() -> Self {
        ReconnectMessage::default()
    }

    pub fn add_invalidations_in_progress(&mut self, keys: impl IntoIterator<Item = u64>) {
        self.invalidations_in_progress.extend(keys);
    }

    pub fn clear_in_progress(&mut self) {
        self.clear_in_progress = true;
    }

    pub fn invalidations_in_progress(&self) -> &HashSet<u64> {
        &self.invalidations_in_progress
    }

    pub fn is_clear_in_progress(&self) -> bool {
        self.clear_in_progress
    }
}
