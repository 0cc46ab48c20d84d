//! Working without the backend.
//!
//! This module provides:
//! - `Connectivity`: the shared online/offline flag and last-online time
//! - `OfflineQueue`: a durable FIFO of mutating requests that failed or were
//!   attempted while offline, replayed once connectivity returns
//!
//! Replay is FIFO but not atomic across operations: when an early operation
//! fails and a later one succeeds, the server sees the later one first. The
//! failed operation is retried on the next drain.

pub mod connectivity;
pub mod queue;

pub use connectivity::Connectivity;
pub use queue::{
    AuthorizedSender, MutationOutcome, OfflineQueue, OperationSender, QueuedOperation, SyncReport,
};
