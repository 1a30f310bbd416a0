mod entity;
mod messages;
mod timeouts;

pub use entity::ClusterTierEntity;
pub use entity::DisconnectionListener;
pub use entity::ReconnectListener;
pub use entity::ReconnectMessage;
pub use entity::ResponseListener;
pub use entity::TransportError;
pub use messages::ResponseKind;
pub use messages::StoreRequest;
pub use messages::StoreResponse;
pub use timeouts::TimeoutOptions;
pub use timeouts::Timeouts;
