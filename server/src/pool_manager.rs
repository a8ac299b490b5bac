//! Admission control across pools.
//!
//! The manager keeps an ordered, capacity-bounded list of pools. New
//! connections go to the oldest pool that still has room (first fit); a new
//! pool is created only when every existing one is full. A pool leaves the
//! list as soon as its last connection is removed.

use crate::error::ManagerError;
use crate::pool::{ConnHandle, Pool, PoolFactory, PoolFeatures};
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Snapshot of one pool for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    /// Position in admission order
    pub index: usize,
    pub conn_count: u16,
    pub conn_limit: u16,
}

pub struct PoolManager {
    /// Creates a pool when every existing one is full
    factory: PoolFactory,
    /// Maximum number of pools alive at once
    pool_limit: usize,
    /// Live pools in creation order, the admission scan order
    pools: Mutex<Vec<Pool>>,
    /// Connections admitted since startup
    admitted: AtomicU64,
    /// Connections released since startup
    released: AtomicU64,
}

impl PoolManager {
    /// Creates a manager that holds at most `pool_limit` pools.
    pub fn new(factory: PoolFactory, pool_limit: u16) -> Result<Self, ManagerError> {
        if pool_limit == 0 {
            return Err(ManagerError::InvalidPoolLimit);
        }

        Ok(Self {
            factory,
            pool_limit: pool_limit as usize,
            pools: Mutex::new(Vec::with_capacity(pool_limit as usize)),
            admitted: AtomicU64::new(0),
            released: AtomicU64::new(0),
        })
    }

    pub fn pool_limit(&self) -> usize {
        self.pool_limit
    }

    /// Admits `conn` into the first pool with room, creating a pool if every
    /// existing one is full. A connection is a member of one pool at most.
    pub async fn add_conn(&self, conn: ConnHandle) -> Result<PoolFeatures, ManagerError> {
        let mut pools = self.pools.lock().await;

        if pools.iter().any(|p| p.has_conn(&conn)) {
            return Err(ManagerError::AlreadyAdded);
        }

        if let Some(pool) = pools.iter_mut().find(|p| !p.is_full()) {
            debug!("Found pool with room for connection {}", conn.key());
            let features = pool.add_conn(conn).map_err(ManagerError::Admission)?;
            self.admitted.fetch_add(1, Ordering::Relaxed);
            return Ok(features);
        }

        if pools.len() >= self.pool_limit {
            return Err(ManagerError::ServerFull);
        }

        info!("Every pool is full, creating new pool");
        let mut pool = (self.factory)().map_err(ManagerError::CreatePool)?;
        let features = pool.add_conn(conn).map_err(ManagerError::Admission)?;
        pools.push(pool);
        info!("New pool was created ({} of {})", pools.len(), self.pool_limit);

        self.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(features)
    }

    /// Removes `conn` from its pool and drops the pool if it became empty.
    pub async fn del_conn(&self, conn: &ConnHandle) -> Result<(), ManagerError> {
        let mut pools = self.pools.lock().await;

        let index = pools
            .iter()
            .position(|p| p.has_conn(conn))
            .ok_or(ManagerError::ConnNotFound)?;

        pools[index]
            .del_conn(conn)
            .map_err(ManagerError::Removal)?;
        self.released.fetch_add(1, Ordering::Relaxed);

        if pools[index].is_empty() {
            pools.remove(index);
            info!("Empty pool was removed ({} left)", pools.len());
        }

        Ok(())
    }

    pub fn admitted_total(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn released_total(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.lock().await.len()
    }

    /// Total number of connections across all pools.
    pub async fn conn_count(&self) -> usize {
        self.pools
            .lock()
            .await
            .iter()
            .map(|p| p.conn_count() as usize)
            .sum()
    }

    pub async fn pool_infos(&self) -> Vec<PoolInfo> {
        self.pools
            .lock()
            .await
            .iter()
            .enumerate()
            .map(|(index, p)| PoolInfo {
                index,
                conn_count: p.conn_count(),
                conn_limit: p.conn_limit(),
            })
            .collect()
    }

    /// Connection ids of the pool at `index`, if there is one.
    pub async fn pool_conn_ids(&self, index: usize) -> Option<Vec<u16>> {
        self.pools.lock().await.get(index).map(Pool::conn_ids)
    }
}
