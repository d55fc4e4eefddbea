//! Global + per-host connection concurrency gates, built on
//! [`tokio::sync::Semaphore`] the way `worker_pool.rs` builds worker
//! concurrency control: one semaphore per scarce resource, permits acquired
//! in a fixed order to avoid deadlock, FIFO-fair by construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool closed")]
    PoolClosed,
    #[error("timed out waiting for a connection slot")]
    Timeout,
}

/// A held connection slot. Dropping it releases both the per-host and
/// global permits.
pub struct ConnectionGuard {
    _host_permit: OwnedSemaphorePermit,
    _global_permit: OwnedSemaphorePermit,
}

struct HostGate {
    semaphore: Arc<Semaphore>,
}

/// Two-counter connection pool: a per-host cap and a global cap, each
/// enforced by its own semaphore. `acquire` always takes the host permit
/// before the global permit so no two callers can wait on each other in
/// opposite orders.
pub struct ConnectionPool {
    global: Arc<Semaphore>,
    per_host: RwLock<HashMap<String, HostGate>>,
    max_per_host: usize,
    closed: std::sync::atomic::AtomicBool,
}

impl ConnectionPool {
    pub fn new(max_per_host: usize, max_global: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_global)),
            per_host: RwLock::new(HashMap::new()),
            max_per_host,
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        if let Some(gate) = self.per_host.read().get(host) {
            return gate.semaphore.clone();
        }
        self.per_host
            .write()
            .entry(host.to_string())
            .or_insert_with(|| HostGate {
                semaphore: Arc::new(Semaphore::new(self.max_per_host)),
            })
            .semaphore
            .clone()
    }

    /// Acquire a slot for `host`, waiting indefinitely (modulo pool closure).
    pub async fn acquire(&self, host: &str) -> Result<ConnectionGuard, PoolError> {
        let host_sem = self.host_semaphore(host);
        let host_permit = host_sem
            .acquire_owned()
            .await
            .map_err(|_| PoolError::PoolClosed)?;
        let global_permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::PoolClosed)?;
        Ok(ConnectionGuard {
            _host_permit: host_permit,
            _global_permit: global_permit,
        })
    }

    /// Acquire a slot for `host`, giving up after `timeout`.
    pub async fn acquire_timeout(
        &self,
        host: &str,
        timeout: Duration,
    ) -> Result<ConnectionGuard, PoolError> {
        tokio::time::timeout(timeout, self.acquire(host))
            .await
            .map_err(|_| PoolError::Timeout)?
    }

    /// Closes the pool, waking every current waiter with [`PoolError::PoolClosed`].
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.global.close();
        for gate in self.per_host.read().values() {
            gate.semaphore.close();
        }
        debug!("connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Permits currently available for `host` (not yet allocated a semaphore
    /// if the host has never been seen returns `max_per_host`).
    pub fn available_for_host(&self, host: &str) -> usize {
        self.per_host
            .read()
            .get(host)
            .map(|g| g.semaphore.available_permits())
            .unwrap_or(self.max_per_host)
    }

    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_respects_per_host_cap() {
        let pool = ConnectionPool::new(1, 4);
        let g1 = pool.acquire("h1").await.unwrap();
        assert_eq!(pool.available_for_host("h1"), 0);

        let pool2 = &pool;
        let wait = tokio::time::timeout(Duration::from_millis(50), pool2.acquire("h1")).await;
        assert!(wait.is_err(), "second acquire for h1 should block");

        drop(g1);
        let g2 = pool.acquire("h1").await.unwrap();
        drop(g2);
    }

    #[tokio::test]
    async fn test_global_cap_independent_of_host() {
        let pool = ConnectionPool::new(10, 1);
        let _g1 = pool.acquire("h1").await.unwrap();
        let wait = tokio::time::timeout(Duration::from_millis(50), pool.acquire("h2")).await;
        assert!(wait.is_err(), "global cap should block a different host");
    }

    #[tokio::test]
    async fn test_waiter_released_on_drop_scenario_six() {
        // End-to-end scenario 6: max_per_host=1, acquire h1, then a parallel
        // acquire of h1 blocks until the first releases; the waiter then
        // succeeds.
        let pool = Arc::new(ConnectionPool::new(1, 10));
        let g1 = pool.acquire("h1").await.unwrap();

        let pool_clone = pool.clone();
        let waiter = tokio::spawn(async move { pool_clone.acquire("h1").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(g1);

        let result = tokio::time::timeout(Duration::from_millis(50), waiter)
            .await
            .expect("waiter task should finish")
            .expect("task should not panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_close_wakes_waiters_with_pool_closed() {
        let pool = Arc::new(ConnectionPool::new(1, 10));
        let _g1 = pool.acquire("h1").await.unwrap();

        let pool_clone = pool.clone();
        let waiter = tokio::spawn(async move { pool_clone.acquire("h1").await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.close();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PoolError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let pool = ConnectionPool::new(1, 10);
        let _g1 = pool.acquire("h1").await.unwrap();
        let result = pool.acquire_timeout("h1", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(PoolError::Timeout)));
    }
}
