use crate::store::api::{InvalidationListener, ServerStoreProxy, StoreProxyError};
use crate::store::chain::Chain;
use crate::store::common::CommonStoreProxy;
use crate::store::latch::InvalidationLatch;
use crate::transport::{
    ClusterTierEntity, ResponseKind, ResponseListener, StoreResponse,
};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Wraps a [`CommonStoreProxy`] with the cluster-wide invalidation barrier: a
/// mutating call returns to its caller only once every connected peer client
/// has acknowledged its local invalidation.
///
/// At most one mutation per key is in flight at any instant; concurrent
/// mutations of the same key queue behind the installed barrier. `clear`
/// excludes other `clear`s through a single slot but is independent of per-key
/// mutations already in flight (the server orders them).
pub struct StrongStoreProxy {
    delegate: CommonStoreProxy,
    entity: Arc<dyn ClusterTierEntity>,
    barriers: Arc<BarrierState>,
    logger: slog::Logger,
}

/// Shared with the response, reconnect and disconnection listeners. Holds no
/// transport reference, so there is no ownership cycle through the entity.
struct BarrierState {
    hash_invalidations_in_progress: DashMap<u64, Arc<InvalidationLatch>>,
    invalidate_all_latch: Mutex<Option<Arc<InvalidationLatch>>>,
}

impl BarrierState {
    fn drain(&self) {
        for entry in self.hash_invalidations_in_progress.iter() {
            entry.value().fire();
        }
        self.hash_invalidations_in_progress.clear();

        if let Some(latch) = self.take_all_latch() {
            latch.fire();
        }
    }

    fn take_all_latch(&self) -> Option<Arc<InvalidationLatch>> {
        self.invalidate_all_latch
            .lock()
            .expect("invalidate-all slot mutex poison")
            .take()
    }
}

impl StrongStoreProxy {
    pub fn new(
        cache_id: impl Into<String>,
        entity: Arc<dyn ClusterTierEntity>,
        invalidation: Arc<dyn InvalidationListener>,
        logger: slog::Logger,
    ) -> Self {
        let cache_id = cache_id.into();
        let delegate = CommonStoreProxy::new(
            cache_id.clone(),
            Arc::clone(&entity),
            invalidation,
            logger.clone(),
        );

        let barriers = Arc::new(BarrierState {
            hash_invalidations_in_progress: DashMap::new(),
            invalidate_all_latch: Mutex::new(None),
        });

        let hash_invalidation_done: ResponseListener = Arc::new({
            let barriers = Arc::clone(&barriers);
            let logger = logger.clone();
            let cache_id = cache_id.clone();
            move |response| {
                let barriers = Arc::clone(&barriers);
                let logger = logger.clone();
                let cache_id = cache_id.clone();
                Box::pin(async move {
                    if let StoreResponse::HashInvalidationDone { key } = response {
                        slog::debug!(
                            logger,
                            "All clients invalidated hash {} on cache {}",
                            key,
                            cache_id
                        );
                        if let Some((_, latch)) =
                            barriers.hash_invalidations_in_progress.remove(&key)
                        {
                            latch.fire();
                        }
                    }
                })
            }
        });
        delegate.add_response_listener(ResponseKind::HashInvalidationDone, hash_invalidation_done);

        let all_invalidation_done: ResponseListener = Arc::new({
            let barriers = Arc::clone(&barriers);
            let logger = logger.clone();
            let cache_id = cache_id.clone();
            move |response| {
                let barriers = Arc::clone(&barriers);
                let logger = logger.clone();
                let cache_id = cache_id.clone();
                Box::pin(async move {
                    if let StoreResponse::AllInvalidationDone = response {
                        slog::debug!(logger, "All clients invalidated all of cache {}", cache_id);
                        if let Some(latch) = barriers.take_all_latch() {
                            latch.fire();
                        }
                    }
                })
            }
        });
        delegate.add_response_listener(ResponseKind::AllInvalidationDone, all_invalidation_done);

        entity.set_reconnect_listener({
            let barriers = Arc::clone(&barriers);
            Box::new(move |reconnect_message| {
                let pending_keys: Vec<u64> = barriers
                    .hash_invalidations_in_progress
                    .iter()
                    .map(|entry| *entry.key())
                    .collect();
                reconnect_message.add_invalidations_in_progress(pending_keys);

                let clear_pending = barriers
                    .invalidate_all_latch
                    .lock()
                    .expect("invalidate-all slot mutex poison")
                    .is_some();
                if clear_pending {
                    reconnect_message.clear_in_progress();
                }
            })
        });

        // Every orphaned signal is released so no caller waits forever; the
        // waiters observe the lost connection and fail with `Disconnected`.
        entity.set_disconnection_listener({
            let barriers = Arc::clone(&barriers);
            Box::new(move || barriers.drain())
        });

        StrongStoreProxy {
            delegate,
            entity,
            barriers,
            logger,
        }
    }

    async fn perform_waiting_for_hash_invalidation<T, F, Fut>(
        &self,
        key: u64,
        operation: F,
    ) -> Result<T, StoreProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreProxyError>>,
    {
        let end = Instant::now() + self.entity.timeouts().mutative_operation;

        let latch = Arc::new(InvalidationLatch::new());
        loop {
            if !self.entity.is_connected() {
                return Err(StoreProxyError::Disconnected);
            }
            // The entry guard must not be held across an await; clone the
            // predecessor out and drop it before waiting.
            let predecessor = match self.barriers.hash_invalidations_in_progress.entry(key) {
                Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
                Entry::Vacant(entry) => {
                    entry.insert(Arc::clone(&latch));
                    None
                }
            };
            match predecessor {
                None => break,
                Some(predecessor) => self.await_latch(&predecessor, end).await?,
            }
        }

        let result = match operation().await {
            Ok(result) => result,
            Err(error) => {
                self.barriers.hash_invalidations_in_progress.remove(&key);
                latch.fire();
                return Err(error);
            }
        };

        slog::debug!(self.logger, "Waiting for invalidations on key {}", key);
        self.await_latch(&latch, end).await?;
        slog::debug!(self.logger, "Key {} invalidated on all clients, unblocking call", key);
        Ok(result)
    }

    async fn perform_waiting_for_all_invalidation<T, F, Fut>(
        &self,
        operation: F,
    ) -> Result<T, StoreProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreProxyError>>,
    {
        let end = Instant::now() + self.entity.timeouts().mutative_operation;

        let latch = Arc::new(InvalidationLatch::new());
        loop {
            if !self.entity.is_connected() {
                return Err(StoreProxyError::Disconnected);
            }
            let predecessor = {
                let mut slot = self
                    .barriers
                    .invalidate_all_latch
                    .lock()
                    .expect("invalidate-all slot mutex poison");
                match &*slot {
                    Some(predecessor) => Some(Arc::clone(predecessor)),
                    None => {
                        *slot = Some(Arc::clone(&latch));
                        None
                    }
                }
            };
            match predecessor {
                None => break,
                Some(predecessor) => self.await_latch(&predecessor, end).await?,
            }
        }

        let result = match operation().await {
            Ok(result) => result,
            Err(error) => {
                *self
                    .barriers
                    .invalidate_all_latch
                    .lock()
                    .expect("invalidate-all slot mutex poison") = None;
                latch.fire();
                return Err(error);
            }
        };

        self.await_latch(&latch, end).await?;
        slog::debug!(self.logger, "All of cache {} invalidated on all clients, unblocking call", self.delegate.cache_id());
        Ok(result)
    }

    /// The barrier wait primitive: returns normally iff the latch fires while
    /// the transport is still connected. A timeout here never cleans up the
    /// pending entry; reconciliation is the server's job on the next handshake.
    async fn await_latch(
        &self,
        latch: &InvalidationLatch,
        end: Instant,
    ) -> Result<(), StoreProxyError> {
        let remaining = end.saturating_duration_since(Instant::now());
        if tokio::time::timeout(remaining, latch.wait()).await.is_err() {
            return Err(StoreProxyError::Timeout);
        }
        if !self.entity.is_connected() {
            return Err(StoreProxyError::Disconnected);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ServerStoreProxy for StrongStoreProxy {
    fn cache_id(&self) -> &str {
        self.delegate.cache_id()
    }

    async fn get(&self, key: u64) -> Result<Chain, StoreProxyError> {
        self.delegate.get(key).await
    }

    async fn append(&self, key: u64, payload: Bytes) -> Result<(), StoreProxyError> {
        self.perform_waiting_for_hash_invalidation(key, || self.delegate.append(key, payload))
            .await
    }

    async fn get_and_append(&self, key: u64, payload: Bytes) -> Result<Chain, StoreProxyError> {
        self.perform_waiting_for_hash_invalidation(key, || {
            self.delegate.get_and_append(key, payload)
        })
        .await
    }

    async fn replace_at_head(
        &self,
        key: u64,
        expect: Chain,
        update: Chain,
    ) -> Result<(), StoreProxyError> {
        self.delegate.replace_at_head(key, expect, update).await
    }

    async fn clear(&self) -> Result<(), StoreProxyError> {
        self.perform_waiting_for_all_invalidation(|| self.delegate.clear()).await
    }

    fn close(&self) {
        self.delegate.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_utils::{discard_logger, FakeEntity, RecordingInvalidationListener, WaitMode};
    use crate::transport::{StoreRequest, Timeouts, TransportError};
    use std::time::Duration;

    fn strong_proxy_over(entity: &Arc<FakeEntity>) -> Arc<StrongStoreProxy> {
        Arc::new(StrongStoreProxy::new(
            "pets",
            Arc::clone(entity) as Arc<dyn ClusterTierEntity>,
            Arc::new(RecordingInvalidationListener::default()),
            discard_logger(),
        ))
    }

    fn appends_sent(entity: &FakeEntity) -> usize {
        entity
            .invocations()
            .into_iter()
            .filter(|(_, request, _)| matches!(request, StoreRequest::Append { .. }))
            .count()
    }

    fn clears_sent(entity: &FakeEntity) -> usize {
        entity
            .invocations()
            .into_iter()
            .filter(|(_, request, _)| matches!(request, StoreRequest::Clear))
            .count()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            if Instant::now() > deadline {
                panic!("condition not reached in time");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn append_blocks_until_hash_invalidation_done() {
        let entity = FakeEntity::connected();
        let proxy = strong_proxy_over(&entity);

        let call = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.append(42, Bytes::from("x")).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!call.is_finished(), "caller must block until the barrier releases");
        assert_eq!(
            entity.invocations(),
            vec![(
                WaitMode::Received,
                StoreRequest::Append { key: 42, payload: Bytes::from("x") },
                true
            )]
        );

        entity.deliver(StoreResponse::HashInvalidationDone { key: 42 }).await;

        tokio::time::timeout(Duration::from_millis(50), call)
            .await
            .expect("caller must return promptly after the barrier releases")
            .unwrap()
            .unwrap();
        assert!(proxy.barriers.hash_invalidations_in_progress.is_empty());
    }

    #[tokio::test]
    async fn concurrent_same_key_mutations_are_serialized() {
        let entity = FakeEntity::connected();
        let proxy = strong_proxy_over(&entity);

        let first = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.append(7, Bytes::from("a")).await }
        });
        wait_until(|| appends_sent(&entity) == 1).await;

        let second = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.append(7, Bytes::from("b")).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(appends_sent(&entity), 1, "loser must queue behind the installed barrier");

        entity.deliver(StoreResponse::HashInvalidationDone { key: 7 }).await;
        first.await.unwrap().unwrap();

        wait_until(|| appends_sent(&entity) == 2).await;
        entity.deliver(StoreResponse::HashInvalidationDone { key: 7 }).await;
        second.await.unwrap().unwrap();

        assert!(proxy.barriers.hash_invalidations_in_progress.is_empty());
    }

    #[tokio::test]
    async fn timeout_leaves_pending_entry_for_reconciliation() {
        let entity = FakeEntity::with_timeouts(Timeouts {
            read_operation: Duration::from_millis(200),
            mutative_operation: Duration::from_millis(200),
        });
        let proxy = strong_proxy_over(&entity);

        let result = tokio::time::timeout(Duration::from_secs(2), proxy.append(9, Bytes::from("p")))
            .await
            .expect("timeout must fire on its own");

        assert!(matches!(result, Err(StoreProxyError::Timeout)));
        assert!(proxy.barriers.hash_invalidations_in_progress.contains_key(&9));
    }

    #[tokio::test]
    async fn disconnect_unblocks_waiters_and_reconnect_advertises_pending_keys() {
        let entity = FakeEntity::connected();
        let proxy = strong_proxy_over(&entity);

        let prior: Chain = [Bytes::from("a")].into_iter().collect();
        entity.push_retired_response(Ok(StoreResponse::GetResponse { chain: prior }));

        let call = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.get_and_append(3, Bytes::from("q")).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!call.is_finished());

        // Transient loss first: the handshake runs while the barrier is still
        // installed and advertises it for server-side re-drive.
        let handshake = entity.run_reconnect_handshake();
        assert_eq!(
            handshake.invalidations_in_progress().iter().copied().collect::<Vec<_>>(),
            vec![3]
        );
        assert!(!handshake.is_clear_in_progress());

        // Then the transport gives up; every waiter is released with an error.
        entity.drop_connection();
        let result = tokio::time::timeout(Duration::from_millis(100), call)
            .await
            .expect("disconnect must unblock the waiter")
            .unwrap();
        assert!(matches!(result, Err(StoreProxyError::Disconnected)));

        assert!(proxy.barriers.hash_invalidations_in_progress.is_empty());
        assert!(proxy.barriers.invalidate_all_latch.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_excludes_concurrent_clear() {
        let entity = FakeEntity::connected();
        let proxy = strong_proxy_over(&entity);

        let first = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.clear().await }
        });
        wait_until(|| clears_sent(&entity) == 1).await;

        let second = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.clear().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(clears_sent(&entity), 1, "second clear must wait for the first's barrier");

        entity.deliver(StoreResponse::AllInvalidationDone).await;
        first.await.unwrap().unwrap();

        wait_until(|| clears_sent(&entity) == 2).await;
        entity.deliver(StoreResponse::AllInvalidationDone).await;
        second.await.unwrap().unwrap();

        assert!(proxy.barriers.invalidate_all_latch.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_in_progress_is_advertised_on_reconnect() {
        let entity = FakeEntity::connected();
        let proxy = strong_proxy_over(&entity);

        let call = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.clear().await }
        });
        wait_until(|| clears_sent(&entity) == 1).await;

        assert!(entity.run_reconnect_handshake().is_clear_in_progress());

        entity.deliver(StoreResponse::AllInvalidationDone).await;
        call.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn redelivered_hash_invalidation_done_is_a_no_op() {
        let entity = FakeEntity::connected();
        let proxy = strong_proxy_over(&entity);

        let call = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.append(5, Bytes::from("x")).await }
        });
        wait_until(|| appends_sent(&entity) == 1).await;

        entity.deliver(StoreResponse::HashInvalidationDone { key: 5 }).await;
        call.await.unwrap().unwrap();

        entity.deliver(StoreResponse::HashInvalidationDone { key: 5 }).await;
        assert!(proxy.barriers.hash_invalidations_in_progress.is_empty());
    }

    #[tokio::test]
    async fn failed_operation_clears_the_barrier_before_the_error_surfaces() {
        let entity = FakeEntity::connected();
        let proxy = strong_proxy_over(&entity);

        entity.fail_receives();
        let result = proxy.append(13, Bytes::from("x")).await;
        assert!(matches!(result, Err(StoreProxyError::Proxy(_))));
        assert!(proxy.barriers.hash_invalidations_in_progress.is_empty());

        // The key is immediately mutable again. Failed invokes never reach the
        // transport's log, so this is the first recorded append.
        entity.allow_receives();
        let call = tokio::spawn({
            let proxy = Arc::clone(&proxy);
            async move { proxy.append(13, Bytes::from("y")).await }
        });
        wait_until(|| appends_sent(&entity) == 1).await;
        entity.deliver(StoreResponse::HashInvalidationDone { key: 13 }).await;
        call.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_operation_timeout_maps_exactly() {
        let entity = FakeEntity::connected();
        let proxy = strong_proxy_over(&entity);

        entity.push_retired_response(Err(TransportError::Timeout));
        let result = proxy.get_and_append(21, Bytes::from("x")).await;

        assert!(matches!(result, Err(StoreProxyError::Timeout)));
        assert!(proxy.barriers.hash_invalidations_in_progress.is_empty());
    }

    #[tokio::test]
    async fn mutation_fails_fast_when_already_disconnected() {
        let entity = FakeEntity::connected();
        entity.set_connected(false);
        let proxy = strong_proxy_over(&entity);

        let result = proxy.append(1, Bytes::from("x")).await;
        assert!(matches!(result, Err(StoreProxyError::Disconnected)));
        assert!(entity.invocations().is_empty());
    }
}
