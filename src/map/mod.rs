//! The authenticated map: item operations, root commitment, and the
//! pull-based node synchronization engine.
use thiserror::Error;

pub mod map;
pub mod sync;

pub use map::{AuthMap, MapState};
pub use sync::FatResponse;

/// Error type for map and sync operations.
///
/// Sync-side errors are diagnostic, not retried internally: the caller is
/// expected to blacklist the sender or re-request from elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MapError {
    /// Node bytes did not parse as the expected kind.
    #[error("node bytes did not parse")]
    MalformedNode,
    /// Recomputed node hash does not match the expected hash.
    #[error("node hash does not match the expected hash")]
    HashMismatch,
    /// The pushed node has no resident parent to hook under.
    #[error("node cannot be hooked to the partially built tree")]
    UnhookableNode,
    /// The parent's branch slot for the pushed node is empty.
    #[error("parent branch for this node is empty")]
    EmptySlot,
    /// The pushed node contradicts the slot it claims to fill.
    #[error("node fails the consistency check for its slot")]
    ConsistencyFailure,
    /// The wanted node is not resident. Non-fatal to a sync in progress.
    #[error("wanted node is not resident")]
    NotFound,
    /// Mutation attempted on a frozen map.
    #[error("map is immutable")]
    Immutable,
    /// Internal consistency violation; the operation cannot proceed.
    #[error("internal invariant violated: {0}")]
    Invariant(&'static str),
}
