use std::future::Future;

use crate::contracts::error::StorageError;
use crate::numbering::SequenceKey;

/// Durable registry of monotonic counters, one per [`SequenceKey`].
///
/// # Invariants
/// - Counters start at 1 and advance by exactly 1 per `next` call
/// - `next` never returns the same value twice for a key, across threads and
///   (for shared backends) across processes
/// - Values are never reused or decremented; gaps are allowed
pub trait SequenceRegistry: Send + Sync {
    /// Creates the counter for `key` if it does not exist yet.
    /// Calling it again for an existing counter is a no-op.
    fn ensure(&self, key: &SequenceKey) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Atomically advances the counter and returns the new value.
    /// Fails with `SequenceNotFound` if `ensure` was never called for `key`.
    fn next(&self, key: &SequenceKey) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Returns the last value handed out, `Some(0)` for a fresh counter,
    /// or `None` if the counter does not exist.
    fn current(
        &self,
        key: &SequenceKey,
    ) -> impl Future<Output = Result<Option<u64>, StorageError>> + Send;
}
