use crate::store::Chain;
use bytes::Bytes;

/// Messages a store proxy sends to its cluster tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreRequest {
    Get {
        key: u64,
    },
    Append {
        key: u64,
        payload: Bytes,
    },
    GetAndAppend {
        key: u64,
        payload: Bytes,
    },
    ReplaceAtHead {
        key: u64,
        expect: Chain,
        update: Chain,
    },
    Clear,
    ClientInvalidationAck {
        key: u64,
        invalidation_id: u32,
    },
    ClientInvalidationAllAck {
        invalidation_id: u32,
    },
}

/// Messages the cluster tier sends back: replies to retired-mode invokes, and
/// unsolicited invalidation traffic dispatched to registered response listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreResponse {
    /// Bare acknowledgement for retired invokes whose reply carries no data.
    Success,
    GetResponse {
        chain: Chain,
    },
    /// Every client acked the invalidation of `key`; the originating mutation
    /// may return to its caller.
    HashInvalidationDone {
        key: u64,
    },
    AllInvalidationDone,
    /// Advisory server-initiated invalidation. Not acked.
    ServerInvalidateHash {
        key: u64,
    },
    /// Server-driven fan-out of a peer's mutation. Must be acked.
    ClientInvalidateHash {
        key: u64,
        invalidation_id: u32,
    },
    ClientInvalidateAll {
        invalidation_id: u32,
    },
}

/// Fieldless tag of a `StoreResponse`, used to key listener registration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResponseKind {
    Success,
    GetResponse,
    HashInvalidationDone,
    AllInvalidationDone,
    ServerInvalidateHash,
    ClientInvalidateHash,
    ClientInvalidateAll,
}

impl StoreResponse {
    pub fn kind(&self) -> ResponseKind {
        match self {
            StoreResponse::Success => ResponseKind::Success,
            StoreResponse::GetResponse { .. } => ResponseKind::GetResponse,
            StoreResponse::HashInvalidationDone { .. } => ResponseKind::HashInvalidationDone,
            StoreResponse::AllInvalidationDone => ResponseKind::AllInvalidationDone,
            StoreResponse::ServerInvalidateHash { .. } => ResponseKind::ServerInvalidateHash,
            StoreResponse::ClientInvalidateHash { .. } => ResponseKind::ClientInvalidateHash,
            StoreResponse::ClientInvalidateAll { .. } => ResponseKind::ClientInvalidateAll,
        }
    }
}
