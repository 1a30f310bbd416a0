use crate::store::api::InvalidationListener;
use crate::transport::{
    ClusterTierEntity, DisconnectionListener, ReconnectListener, ReconnectMessage, ResponseKind,
    ResponseListener, StoreRequest, StoreResponse, Timeouts, TransportError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum WaitMode {
    Sent,
    Received,
    Retired,
}

/// Recording transport double. Invokes return immediately; inbound responses
/// are injected with `deliver`, and the reconnect/disconnection hooks are
/// triggered by hand. Failed invokes are not recorded.
pub(crate) struct FakeEntity {
    connected: AtomicBool,
    timeouts: Timeouts,
    invocations: Mutex<Vec<(WaitMode, StoreRequest, bool)>>,
    retired_responses: Mutex<VecDeque<Result<StoreResponse, TransportError>>>,
    sends_fail: AtomicBool,
    receives_fail: AtomicBool,
    listeners: Mutex<HashMap<ResponseKind, Vec<ResponseListener>>>,
    reconnect_listener: Mutex<Option<ReconnectListener>>,
    disconnection_listener: Mutex<Option<DisconnectionListener>>,
}

impl FakeEntity {
    pub(crate) fn connected() -> Arc<Self> {
        Self::with_timeouts(Timeouts::default())
    }

    pub(crate) fn with_timeouts(timeouts: Timeouts) -> Arc<Self> {
        Arc::new(FakeEntity {
            connected: AtomicBool::new(true),
            timeouts,
            invocations: Mutex::new(Vec::new()),
            retired_responses: Mutex::new(VecDeque::new()),
            sends_fail: AtomicBool::new(false),
            receives_fail: AtomicBool::new(false),
            listeners: Mutex::new(HashMap::new()),
            reconnect_listener: Mutex::new(None),
            disconnection_listener: Mutex::new(None),
        })
    }

    /// Queues the reply for the next retired-mode invoke. Without a queued
    /// reply, retired invokes answer with a bare `Success`.
    pub(crate) fn push_retired_response(&self, response: Result<StoreResponse, TransportError>) {
        self.retired_responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn invocations(&self) -> Vec<(WaitMode, StoreRequest, bool)> {
        self.invocations.lock().unwrap().clone()
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub(crate) fn fail_sends(&self) {
        self.sends_fail.store(true, Ordering::Release);
    }

    pub(crate) fn fail_receives(&self) {
        self.receives_fail.store(true, Ordering::Release);
    }

    pub(crate) fn allow_receives(&self) {
        self.receives_fail.store(false, Ordering::Release);
    }

    /// Dispatches an inbound response to every listener of its kind, in
    /// registration order, awaiting each.
    pub(crate) async fn deliver(&self, response: StoreResponse) {
        let listeners: Vec<ResponseListener> = self
            .listeners
            .lock()
            .unwrap()
            .get(&response.kind())
            .map(|registered| registered.to_vec())
            .unwrap_or_default();
        for listener in listeners {
            listener(response.clone()).await;
        }
    }

    /// Runs the registered reconnect listener against a fresh handshake
    /// message, as the platform does during session re-establishment.
    pub(crate) fn run_reconnect_handshake(&self) -> ReconnectMessage {
        let mut message = ReconnectMessage::new();
        if let Some(listener) = &*self.reconnect_listener.lock().unwrap() {
            listener(&mut message);
        }
        message
    }

    /// Marks the connection lost and fires the disconnection hook.
    pub(crate) fn drop_connection(&self) {
        self.set_connected(false);
        if let Some(listener) = &*self.disconnection_listener.lock().unwrap() {
            listener();
        }
    }
}

#[async_trait::async_trait]
impl ClusterTierEntity for FakeEntity {
    async fn invoke_wait_sent(
        &self,
        message: StoreRequest,
        replicate: bool,
    ) -> Result<(), TransportError> {
        if self.sends_fail.load(Ordering::Acquire) {
            return Err(TransportError::Protocol("injected send failure".to_string()));
        }
        self.invocations.lock().unwrap().push((WaitMode::Sent, message, replicate));
        Ok(())
    }

    async fn invoke_wait_received(
        &self,
        message: StoreRequest,
        replicate: bool,
    ) -> Result<(), TransportError> {
        if self.receives_fail.load(Ordering::Acquire) {
            return Err(TransportError::Protocol("injected receive failure".to_string()));
        }
        self.invocations.lock().unwrap().push((WaitMode::Received, message, replicate));
        Ok(())
    }

    async fn invoke_wait_retired(
        &self,
        message: StoreRequest,
        replicate: bool,
    ) -> Result<StoreResponse, TransportError> {
        let response = self
            .retired_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(StoreResponse::Success));
        if response.is_ok() {
            self.invocations.lock().unwrap().push((WaitMode::Retired, message, replicate));
        }
        response
    }

    fn add_response_listener(&self, kind: ResponseKind, listener: ResponseListener) {
        self.listeners.lock().unwrap().entry(kind).or_default().push(listener);
    }

    fn set_reconnect_listener(&self, listener: ReconnectListener) {
        *self.reconnect_listener.lock().unwrap() = Some(listener);
    }

    fn set_disconnection_listener(&self, listener: DisconnectionListener) {
        *self.disconnection_listener.lock().unwrap() = Some(listener);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    fn close(&self) {
        self.set_connected(false);
    }
}

#[derive(Default)]
pub(crate) struct RecordingInvalidationListener {
    invalidated_hashes: Mutex<Vec<u64>>,
    invalidate_all_count: AtomicUsize,
}

impl RecordingInvalidationListener {
    pub(crate) fn invalidated_hashes(&self) -> Vec<u64> {
        self.invalidated_hashes.lock().unwrap().clone()
    }

    pub(crate) fn invalidate_all_count(&self) -> usize {
        self.invalidate_all_count.load(Ordering::Acquire)
    }
}

impl InvalidationListener for RecordingInvalidationListener {
    fn on_invalidate_hash(&self, key: u64) {
        self.invalidated_hashes.lock().unwrap().push(key);
    }

    fn on_invalidate_all(&self) {
        self.invalidate_all_count.fetch_add(1, Ordering::AcqRel);
    }
}
