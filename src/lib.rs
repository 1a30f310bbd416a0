mod reconnect;
mod store;
mod transport;

pub use reconnect::ReconnectHandle;
pub use reconnect::ReconnectionTask;
pub use reconnect::ReconnectionTaskHandle;
pub use store::Chain;
pub use store::CommonStoreProxy;
pub use store::InvalidationListener;
pub use store::ServerStoreProxy;
pub use store::StoreProxyError;
pub use store::StrongStoreProxy;
pub use transport::ClusterTierEntity;
pub use transport::DisconnectionListener;
pub use transport::ReconnectListener;
pub use transport::ReconnectMessage;
pub use transport::ResponseKind;
pub use transport::ResponseListener;
pub use transport::StoreRequest;
pub use transport::StoreResponse;
pub use transport::TimeoutOptions;
pub use transport::Timeouts;
pub use transport::TransportError;
