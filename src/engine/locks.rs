//! Async lock domains for engine coordination.
//!
//! Three independent `tokio::sync::Mutex<()>` domains:
//!
//! | Domain | Held by |
//! |--------|---------|
//! | mutation | add, delete, clear, backup copy phase |
//! | snapshot | backup copy phase |
//! | direct access | search, save, load, reconstruct fallback |
//!
//! The asymmetry is deliberate: a search (direct access) can interleave
//! with a structural add/delete (mutation) because the index carries its
//! own interior synchronization. What the domains guarantee is a total
//! order of structural mutations, disk round-trips that never overlap a
//! search, and a backup copy phase that no mutation can interleave with.

use tokio::sync::{Mutex, MutexGuard};

/// Coordinates the engine's three lock domains.
#[derive(Debug, Default)]
pub struct LockCoordinator {
    mutation: Mutex<()>,
    snapshot: Mutex<()>,
    direct_access: Mutex<()>,
}

impl LockCoordinator {
    /// Creates a coordinator with all domains unlocked.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the mutation domain (add/delete/clear).
    pub async fn mutation(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().await
    }

    /// Acquires the snapshot domain (backup staging).
    pub async fn snapshot(&self) -> MutexGuard<'_, ()> {
        self.snapshot.lock().await
    }

    /// Acquires the direct-access domain (search, save, load).
    pub async fn direct_access(&self) -> MutexGuard<'_, ()> {
        self.direct_access.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_domains_are_independent() {
        let locks = LockCoordinator::new();

        // Holding one domain must not block the others.
        let _mutation = locks.mutation().await;
        let snapshot = tokio::time::timeout(Duration::from_millis(50), locks.snapshot()).await;
        assert!(snapshot.is_ok());
        let direct = tokio::time::timeout(Duration::from_millis(50), locks.direct_access()).await;
        assert!(direct.is_ok());
    }

    #[tokio::test]
    async fn test_same_domain_is_exclusive() {
        let locks = Arc::new(LockCoordinator::new());
        let guard = locks.mutation().await;

        let contender = Arc::clone(&locks);
        let attempt = tokio::time::timeout(Duration::from_millis(50), async move {
            let _guard = contender.mutation().await;
        })
        .await;
        assert!(attempt.is_err(), "second mutation acquisition should block");

        drop(guard);
        let attempt = tokio::time::timeout(Duration::from_millis(50), locks.mutation()).await;
        assert!(attempt.is_ok());
    }
}
