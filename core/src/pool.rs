/*
 * pool.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tether, an HTTP client connector library.
 *
 * Tether is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tether is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tether.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Per-destination connection pool.
//!
//! Each [`Destination`] gets a [`DestinationPool`] bounding its live connections (idle plus in
//! use) to `max_connections`. A checkout reuses the most recently returned idle connection, or
//! takes a free slot so the caller can open a new one, or waits for either. Idle connections
//! older than `idle_timeout` are evicted lazily on checkout and by a shared reaper task, which
//! exits once the whole pool has had no live connections for `container_idle_timeout`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::uri::Destination;

const MAX_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Pool limits, taken from [`ConnectorConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub container_idle_timeout: Duration,
}

impl From<&ConnectorConfig> for PoolConfig {
    fn from(c: &ConnectorConfig) -> Self {
        Self {
            max_connections: c.max_connections_per_destination,
            idle_timeout: c.connection_idle_timeout,
            container_idle_timeout: c.container_idle_timeout,
        }
    }
}

impl PoolConfig {
    fn reap_interval(&self) -> Duration {
        self.idle_timeout
            .min(self.container_idle_timeout)
            .min(MAX_REAP_INTERVAL)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct IdleConnection<C> {
    conn: C,
    permit: OwnedSemaphorePermit,
    since: Instant,
}

/// Connections to one destination.
pub struct DestinationPool<C> {
    destination: Destination,
    config: PoolConfig,
    slots: Arc<Semaphore>,
    /// Most recently returned last.
    idle: Mutex<Vec<IdleConnection<C>>>,
    returned: Notify,
    closed: AtomicBool,
}

/// Result of [`DestinationPool::acquire`].
pub enum Checkout<C> {
    /// An idle connection, ready for the next exchange.
    Reused(Lease<C>),
    /// A free slot; open a connection and turn it into a lease with [`Slot::into_lease`].
    Fresh(Slot<C>),
}

/// Permission to open one connection to the destination.
pub struct Slot<C> {
    permit: OwnedSemaphorePermit,
    pool: Arc<DestinationPool<C>>,
}

impl<C> Slot<C> {
    pub fn into_lease(self, conn: C) -> Lease<C> {
        Lease {
            conn,
            permit: self.permit,
            pool: self.pool,
            reused: false,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.pool.destination
    }
}

/// A checked-out connection holding its slot. Give it back with [`Lease::recycle`] or drop it
/// with [`Lease::discard`]; dropping the lease discards as well.
pub struct Lease<C> {
    conn: C,
    permit: OwnedSemaphorePermit,
    pool: Arc<DestinationPool<C>>,
    reused: bool,
}

impl<C> Lease<C> {
    pub fn conn(&self) -> &C {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// True if the connection already served an earlier exchange.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn destination(&self) -> &Destination {
        &self.pool.destination
    }

    /// Return the connection to the idle queue. Discarded instead if the pool is closed.
    pub fn recycle(self) {
        let pool = self.pool;
        if pool.closed.load(Ordering::Acquire) {
            tracing::debug!(destination = %pool.destination, "pool closed, discarding connection");
            return;
        }
        lock(&pool.idle).push(IdleConnection {
            conn: self.conn,
            permit: self.permit,
            since: Instant::now(),
        });
        tracing::debug!(destination = %pool.destination, "connection returned to pool");
        pool.returned.notify_one();
    }

    /// Drop the connection and free its slot.
    pub fn discard(self) {
        tracing::debug!(destination = %self.pool.destination, "connection discarded");
    }
}

impl<C> DestinationPool<C> {
    pub fn new(destination: Destination, config: PoolConfig) -> Arc<Self> {
        let config = PoolConfig {
            max_connections: config.max_connections.min(Semaphore::MAX_PERMITS),
            ..config
        };
        Arc::new(Self {
            destination,
            config,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            idle: Mutex::new(Vec::new()),
            returned: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Connections alive for this destination, idle or in use.
    pub fn live_connections(&self) -> usize {
        self.config
            .max_connections
            .saturating_sub(self.slots.available_permits())
    }

    pub fn idle_connections(&self) -> usize {
        lock(&self.idle).len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop idle connections older than the idle timeout. Returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let timeout = self.config.idle_timeout;
        let mut idle = lock(&self.idle);
        let before = idle.len();
        idle.retain(|c| c.since.elapsed() < timeout);
        let evicted = before - idle.len();
        if evicted > 0 {
            tracing::debug!(destination = %self.destination, evicted, "evicted idle connections");
        }
        evicted
    }

    /// Drop every idle connection, e.g. after one of them turned out to be closed by the peer.
    pub fn clear_idle(&self) -> usize {
        let cleared = {
            let mut idle = lock(&self.idle);
            let n = idle.len();
            idle.clear();
            n
        };
        if cleared > 0 {
            tracing::debug!(destination = %self.destination, cleared, "cleared idle connections");
        }
        cleared
    }

    fn take_idle(&self) -> Option<IdleConnection<C>> {
        self.evict_expired();
        lock(&self.idle).pop()
    }

    /// Check out a connection or a slot for a new one, waiting while the destination is at its cap.
    pub async fn acquire(self: &Arc<Self>) -> Result<Checkout<C>, ConnectorError> {
        loop {
            if self.is_closed() {
                return Err(ConnectorError::PoolClosed(self.destination.to_string()));
            }
            // Register for wakeups before looking, so a return between the check and the wait is not lost.
            let returned = self.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            if let Some(idle) = self.take_idle() {
                tracing::debug!(destination = %self.destination, "reusing idle connection");
                return Ok(Checkout::Reused(Lease {
                    conn: idle.conn,
                    permit: idle.permit,
                    pool: self.clone(),
                    reused: true,
                }));
            }
            match self.slots.clone().try_acquire_owned() {
                Ok(permit) => return Ok(self.fresh(permit)),
                Err(TryAcquireError::Closed) => {
                    return Err(ConnectorError::PoolClosed(self.destination.to_string()))
                }
                Err(TryAcquireError::NoPermits) => {}
            }
            tracing::trace!(destination = %self.destination, "at connection limit, waiting");
            tokio::select! {
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => return Ok(self.fresh(permit)),
                    Err(_) => return Err(ConnectorError::PoolClosed(self.destination.to_string())),
                },
                _ = &mut returned => {}
            }
        }
    }

    fn fresh(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> Checkout<C> {
        Checkout::Fresh(Slot {
            permit,
            pool: self.clone(),
        })
    }

    /// Close the pool: drop idle connections and fail current and future waiters.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.slots.close();
        lock(&self.idle).clear();
        self.returned.notify_waiters();
    }
}

/// Destination pools for one connector, plus the shared idle reaper.
pub struct ConnectionPool<C> {
    config: PoolConfig,
    destinations: Mutex<HashMap<Destination, Arc<DestinationPool<C>>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<C: Send + 'static> ConnectionPool<C> {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            destinations: Mutex::new(HashMap::new()),
            reaper: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The pool for `destination`, created on first use. Starts the reaper if it is not running.
    pub fn destination(
        self: &Arc<Self>,
        destination: &Destination,
    ) -> Result<Arc<DestinationPool<C>>, ConnectorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectorError::PoolClosed(destination.to_string()));
        }
        let pool = lock(&self.destinations)
            .entry(destination.clone())
            .or_insert_with(|| DestinationPool::new(destination.clone(), self.config))
            .clone();
        self.ensure_reaper();
        Ok(pool)
    }

    pub fn live_connections(&self) -> usize {
        lock(&self.destinations)
            .values()
            .map(|p| p.live_connections())
            .sum()
    }

    pub fn idle_connections(&self) -> usize {
        lock(&self.destinations)
            .values()
            .map(|p| p.idle_connections())
            .sum()
    }

    pub fn evict_expired(&self) -> usize {
        let pools: Vec<_> = lock(&self.destinations).values().cloned().collect();
        pools.iter().map(|p| p.evict_expired()).sum()
    }

    /// True while the reaper task is running.
    pub fn reaper_running(&self) -> bool {
        lock(&self.reaper)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Close every destination pool and stop the reaper.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for pool in lock(&self.destinations).drain().map(|(_, p)| p) {
            pool.close();
        }
        if let Some(handle) = lock(&self.reaper).take() {
            handle.abort();
        }
    }

    fn ensure_reaper(self: &Arc<Self>) {
        let mut reaper = lock(&self.reaper);
        if reaper.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = self.config.reap_interval();
        *reaper = Some(tokio::spawn(reap(weak, interval)));
    }

    /// Drop destination pools nobody else holds and that have no live connections.
    fn prune_destinations(&self) {
        lock(&self.destinations)
            .retain(|_, p| Arc::strong_count(p) > 1 || p.live_connections() > 0);
    }
}

async fn reap<C: Send + 'static>(weak: Weak<ConnectionPool<C>>, interval: Duration) {
    let mut quiet_since: Option<Instant> = None;
    loop {
        tokio::time::sleep(interval).await;
        let Some(pool) = weak.upgrade() else {
            return;
        };
        if pool.closed.load(Ordering::Acquire) {
            return;
        }
        pool.evict_expired();
        if pool.live_connections() > 0 {
            quiet_since = None;
            continue;
        }
        let since = *quiet_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= pool.config.container_idle_timeout {
            pool.prune_destinations();
            tracing::debug!("no live connections, idle reaper exiting");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::Scheme;

    fn config(max: usize) -> PoolConfig {
        PoolConfig {
            max_connections: max,
            idle_timeout: Duration::from_secs(10),
            container_idle_timeout: Duration::from_secs(30),
        }
    }

    fn dest() -> Destination {
        Destination::new("example.com", 80, Scheme::Http)
    }

    async fn fresh(pool: &Arc<DestinationPool<u32>>, id: u32) -> Lease<u32> {
        match pool.acquire().await.unwrap() {
            Checkout::Fresh(slot) => slot.into_lease(id),
            Checkout::Reused(_) => panic!("expected a fresh slot"),
        }
    }

    #[tokio::test]
    async fn oversized_limit_is_clamped() {
        let pool: Arc<DestinationPool<u32>> = DestinationPool::new(dest(), config(usize::MAX));
        assert_eq!(pool.live_connections(), 0);
        let lease = fresh(&pool, 1).await;
        assert_eq!(pool.live_connections(), 1);
        lease.discard();
        assert_eq!(pool.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recycled_connection_is_reused() {
        let pool = DestinationPool::new(dest(), config(2));
        let lease = fresh(&pool, 1).await;
        assert!(!lease.is_reused());
        lease.recycle();
        assert_eq!(pool.idle_connections(), 1);
        assert_eq!(pool.live_connections(), 1);
        match pool.acquire().await.unwrap() {
            Checkout::Reused(lease) => {
                assert_eq!(*lease.conn(), 1);
                assert!(lease.is_reused());
            }
            Checkout::Fresh(_) => panic!("expected reuse"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cap_blocks_until_return() {
        let pool = DestinationPool::new(dest(), config(2));
        let a = fresh(&pool, 1).await;
        let _b = fresh(&pool, 2).await;
        assert_eq!(pool.live_connections(), 2);
        let blocked = tokio::time::timeout(Duration::from_secs(1), pool.acquire()).await;
        assert!(blocked.is_err(), "third checkout must wait at the cap");

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::task::yield_now().await;
        a.recycle();
        match waiter.await.unwrap().unwrap() {
            Checkout::Reused(lease) => assert_eq!(*lease.conn(), 1),
            Checkout::Fresh(_) => panic!("expected the returned connection"),
        }
        assert_eq!(pool.live_connections(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn discard_frees_slot() {
        let pool = DestinationPool::new(dest(), config(1));
        let a = fresh(&pool, 1).await;
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::task::yield_now().await;
        a.discard();
        assert!(matches!(waiter.await.unwrap().unwrap(), Checkout::Fresh(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connections_expire() {
        let pool = DestinationPool::new(dest(), config(2));
        fresh(&pool, 1).await.recycle();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(matches!(pool.acquire().await.unwrap(), Checkout::Fresh(_)));
        assert_eq!(pool.idle_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_pool_rejects_and_discards() {
        let pool = DestinationPool::new(dest(), config(2));
        let lease = fresh(&pool, 1).await;
        pool.close();
        assert!(matches!(pool.acquire().await, Err(ConnectorError::PoolClosed(_))));
        lease.recycle();
        assert_eq!(pool.idle_connections(), 0);
        assert_eq!(pool.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_evicts_and_exits() {
        let pool: Arc<ConnectionPool<u32>> = ConnectionPool::new(PoolConfig {
            max_connections: 4,
            idle_timeout: Duration::from_secs(2),
            container_idle_timeout: Duration::from_secs(5),
        });
        let dp = pool.destination(&dest()).unwrap();
        fresh(&dp, 7).await.recycle();
        drop(dp);
        assert!(pool.reaper_running());
        assert_eq!(pool.idle_connections(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(pool.idle_connections(), 0);
        assert_eq!(pool.live_connections(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!pool.reaper_running());

        // Next use starts it again.
        let _dp = pool.destination(&dest()).unwrap();
        assert!(pool.reaper_running());
    }

    #[tokio::test]
    async fn closed_connection_pool_rejects_destinations() {
        let pool: Arc<ConnectionPool<u32>> = ConnectionPool::new(config(1));
        let _ = pool.destination(&dest()).unwrap();
        pool.close();
        assert!(pool.destination(&dest()).is_err());
    }
}
