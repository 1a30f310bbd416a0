use crate::store::api::{InvalidationListener, ServerStoreProxy, StoreProxyError};
use crate::store::chain::Chain;
use crate::transport::{
    ClusterTierEntity, ResponseKind, ResponseListener, StoreRequest, StoreResponse,
};
use bytes::Bytes;
use std::sync::{Arc, Weak};

/// Stateless translator between store operations and transport messages. The
/// thin I/O layer: it never blocks on its own behalf.
///
/// On construction it takes over the peer-invalidation traffic for its cache:
/// server-initiated invalidations are advisory and only forwarded upstream,
/// while client-requested fan-outs are forwarded and then acked so the server
/// can release the originating mutation.
pub struct CommonStoreProxy {
    cache_id: String,
    entity: Arc<dyn ClusterTierEntity>,
    logger: slog::Logger,
}

impl CommonStoreProxy {
    pub fn new(
        cache_id: impl Into<String>,
        entity: Arc<dyn ClusterTierEntity>,
        invalidation: Arc<dyn InvalidationListener>,
        logger: slog::Logger,
    ) -> Self {
        let cache_id = cache_id.into();

        let server_invalidate_hash: ResponseListener = Arc::new({
            let invalidation = Arc::clone(&invalidation);
            let logger = logger.clone();
            let cache_id = cache_id.clone();
            move |response| {
                let invalidation = Arc::clone(&invalidation);
                let logger = logger.clone();
                let cache_id = cache_id.clone();
                Box::pin(async move {
                    if let StoreResponse::ServerInvalidateHash { key } = response {
                        slog::debug!(
                            logger,
                            "Server requesting invalidation of hash {} on cache {}",
                            key,
                            cache_id
                        );
                        invalidation.on_invalidate_hash(key);
                    }
                })
            }
        });
        entity.add_response_listener(ResponseKind::ServerInvalidateHash, server_invalidate_hash);

        // The ack listeners hold the entity weakly: the entity owns them, and a
        // strong back-reference would keep it alive forever.
        let client_invalidate_hash: ResponseListener = Arc::new({
            let entity = Arc::downgrade(&entity);
            let invalidation = Arc::clone(&invalidation);
            let logger = logger.clone();
            let cache_id = cache_id.clone();
            move |response| {
                let entity = Weak::clone(&entity);
                let invalidation = Arc::clone(&invalidation);
                let logger = logger.clone();
                let cache_id = cache_id.clone();
                Box::pin(async move {
                    if let StoreResponse::ClientInvalidateHash { key, invalidation_id } = response {
                        slog::debug!(
                            logger,
                            "Invalidating hash {} on cache {} (id {})",
                            key,
                            cache_id,
                            invalidation_id
                        );
                        invalidation.on_invalidate_hash(key);

                        if let Some(entity) = entity.upgrade() {
                            let ack = StoreRequest::ClientInvalidationAck { key, invalidation_id };
                            if let Err(error) = entity.invoke_wait_sent(ack, false).await {
                                slog::error!(
                                    logger,
                                    "Error acking invalidation of hash {} on cache {} (id {}): {}",
                                    key,
                                    cache_id,
                                    invalidation_id,
                                    error
                                );
                            }
                        }
                    }
                })
            }
        });
        entity.add_response_listener(ResponseKind::ClientInvalidateHash, client_invalidate_hash);

        let client_invalidate_all: ResponseListener = Arc::new({
            let entity = Arc::downgrade(&entity);
            let invalidation = Arc::clone(&invalidation);
            let logger = logger.clone();
            let cache_id = cache_id.clone();
            move |response| {
                let entity = Weak::clone(&entity);
                let invalidation = Arc::clone(&invalidation);
                let logger = logger.clone();
                let cache_id = cache_id.clone();
                Box::pin(async move {
                    if let StoreResponse::ClientInvalidateAll { invalidation_id } = response {
                        slog::debug!(
                            logger,
                            "Invalidating all of cache {} (id {})",
                            cache_id,
                            invalidation_id
                        );
                        invalidation.on_invalidate_all();

                        if let Some(entity) = entity.upgrade() {
                            let ack = StoreRequest::ClientInvalidationAllAck { invalidation_id };
                            if let Err(error) = entity.invoke_wait_sent(ack, false).await {
                                slog::error!(
                                    logger,
                                    "Error acking invalidation of all of cache {} (id {}): {}",
                                    cache_id,
                                    invalidation_id,
                                    error
                                );
                            }
                        }
                    }
                })
            }
        });
        entity.add_response_listener(ResponseKind::ClientInvalidateAll, client_invalidate_all);

        CommonStoreProxy {
            cache_id,
            entity,
            logger,
        }
    }

    pub(crate) fn add_response_listener(&self, kind: ResponseKind, listener: ResponseListener) {
        self.entity.add_response_listener(kind, listener);
    }
}

#[async_trait::async_trait]
impl ServerStoreProxy for CommonStoreProxy {
    fn cache_id(&self) -> &str {
        &self.cache_id
    }

    async fn get(&self, key: u64) -> Result<Chain, StoreProxyError> {
        let response = self
            .entity
            .invoke_wait_retired(StoreRequest::Get { key }, false)
            .await?;
        match response {
            StoreResponse::GetResponse { chain } => Ok(chain),
            other => Err(StoreProxyError::Proxy(format!(
                "response for get operation was invalid: {:?}",
                other.kind()
            ))),
        }
    }

    async fn append(&self, key: u64, payload: Bytes) -> Result<(), StoreProxyError> {
        self.entity
            .invoke_wait_received(StoreRequest::Append { key, payload }, true)
            .await?;
        Ok(())
    }

    async fn get_and_append(&self, key: u64, payload: Bytes) -> Result<Chain, StoreProxyError> {
        let response = self
            .entity
            .invoke_wait_retired(StoreRequest::GetAndAppend { key, payload }, true)
            .await?;
        match response {
            StoreResponse::GetResponse { chain } => Ok(chain),
            other => Err(StoreProxyError::Proxy(format!(
                "response for getAndAppend operation was invalid: {:?}",
                other.kind()
            ))),
        }
    }

    async fn replace_at_head(
        &self,
        key: u64,
        expect: Chain,
        update: Chain,
    ) -> Result<(), StoreProxyError> {
        slog::debug!(self.logger, "Replacing at head of hash {} on cache {}", key, self.cache_id);
        self.entity
            .invoke_wait_sent(StoreRequest::ReplaceAtHead { key, expect, update }, false)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreProxyError> {
        self.entity
            .invoke_wait_retired(StoreRequest::Clear, true)
            .await?;
        Ok(())
    }

    fn close(&self) {
        self.entity.close();
    }
}
