//! The mutual-exclusion seam between the election engine and its backend.

use async_trait::async_trait;

use crate::error::Result;

/// A named distributed lock.
///
/// Any mutual-exclusion backend can stand behind this trait: a consensus
/// store, a database row lock, a file lock. The default implementation is
/// [`RedisLock`](crate::RedisLock).
///
/// Semantics the election engine relies on:
/// - A failed [`acquire`](DistLock::acquire) means "not master this tick",
///   whether the lock is held elsewhere or the backend was unreachable.
///   It is never fatal.
/// - Repeated `acquire` calls from the holder must succeed (idempotent
///   re-entry is the backend's responsibility, typically by refreshing
///   the expiry).
/// - [`release`](DistLock::release) is best-effort; the engine never
///   forces one on shutdown and expects expiry-based cleanup instead.
#[async_trait]
pub trait DistLock: Send + Sync {
    /// Attempts to take exclusive ownership of the named resource.
    async fn acquire(&self) -> Result<()>;

    /// Releases ownership. Returns whether the lock was actually ours
    /// to release.
    async fn release(&self) -> bool;
}
