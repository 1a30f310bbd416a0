use crate::transport::ClusterTierEntity;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Upstream hook invoked once the fleet-wide connection is gone, to reopen all
/// caches against a fresh session.
pub trait ReconnectHandle: Send + Sync {
    fn on_reconnect(&self);
}

/// Watches every entity a client holds against one cluster tier manager and
/// fires the reconnect hook exactly once when none of them is connected.
/// Reconnection is not per-cache: a single fresh session reattaches all caches
/// at once, so the trigger is "all gone", not "one gone".
///
/// Single-shot: after completing, a supervisor is never reused.
pub struct ReconnectionTask {
    reconnect_handle: Arc<dyn ReconnectHandle>,
    entities: Vec<Arc<dyn ClusterTierEntity>>,
    complete: Arc<AtomicBool>,
    logger: slog::Logger,
}

pub struct ReconnectionTaskHandle {
    complete: Arc<AtomicBool>,
}

impl ReconnectionTaskHandle {
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }
}

impl ReconnectionTask {
    pub fn spawn(
        reconnect_handle: Arc<dyn ReconnectHandle>,
        entities: Vec<Arc<dyn ClusterTierEntity>>,
        logger: slog::Logger,
    ) -> ReconnectionTaskHandle {
        let complete = Arc::new(AtomicBool::new(false));
        let task = ReconnectionTask {
            reconnect_handle,
            entities,
            complete: Arc::clone(&complete),
            logger,
        };
        tokio::task::spawn(task.run());

        ReconnectionTaskHandle { complete }
    }

    async fn run(self) {
        loop {
            if self.entities.iter().all(|entity| !entity.is_connected()) {
                slog::debug!(
                    self.logger,
                    "All {} cluster tier connections lost, triggering reconnect",
                    self.entities.len()
                );
                self.reconnect_handle.on_reconnect();
                self.complete.store(true, Ordering::Release);
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_utils::{discard_logger, FakeEntity};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingReconnectHandle {
        calls: AtomicUsize,
    }

    impl CountingReconnectHandle {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::Acquire)
        }
    }

    impl ReconnectHandle for CountingReconnectHandle {
        fn on_reconnect(&self) {
            self.calls.fetch_add(1, Ordering::AcqRel);
        }
    }

    #[tokio::test]
    async fn fires_only_when_every_entity_is_disconnected() {
        let entities: Vec<_> = (0..3).map(|_| FakeEntity::connected()).collect();
        let reconnect = Arc::new(CountingReconnectHandle::default());

        let handle = ReconnectionTask::spawn(
            Arc::clone(&reconnect) as Arc<dyn ReconnectHandle>,
            entities
                .iter()
                .map(|entity| Arc::clone(entity) as Arc<dyn ClusterTierEntity>)
                .collect(),
            discard_logger(),
        );

        entities[0].set_connected(false);
        entities[1].set_connected(false);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(reconnect.calls(), 0, "one live connection must hold the trigger");
        assert!(!handle.is_complete());

        entities[2].set_connected(false);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(reconnect.calls(), 1);
        assert!(handle.is_complete());

        // Single-shot: the task has exited and never fires again.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(reconnect.calls(), 1);
    }

    #[tokio::test]
    async fn fires_immediately_when_spawned_over_a_dead_fleet() {
        let entity = FakeEntity::connected();
        entity.set_connected(false);
        let reconnect = Arc::new(CountingReconnectHandle::default());

        let handle = ReconnectionTask::spawn(
            Arc::clone(&reconnect) as Arc<dyn ReconnectHandle>,
            vec![Arc::clone(&entity) as Arc<dyn ClusterTierEntity>],
            discard_logger(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reconnect.calls(), 1);
        assert!(handle.is_complete());
    }
}
