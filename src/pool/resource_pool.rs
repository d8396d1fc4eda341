use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::{AppError, AppResult, BoxFuture, PoolConfig};

type Factory<T> = Arc<dyn Fn() -> BoxFuture<'static, AppResult<T>> + Send + Sync>;

struct IdleEntry<T> {
    resource: T,
    returned_at: Instant,
}

struct PoolState<T> {
    /// idle plus checked out resources
    active: usize,
    /// freshest at the front
    idle: VecDeque<IdleEntry<T>>,
}

/// A bounded pool of reusable resources, typically outgoing connections.
///
/// Resources are created by the factory on demand and destroyed by dropping
/// them. The lock only guards the idle list and the counter; the factory
/// runs and resources are dropped with the lock released.
pub struct Pool<T> {
    factory: Factory<T>,
    max_idle: usize,
    max_active: usize,
    idle_timeout: Option<Duration>,
    state: Mutex<PoolState<T>>,
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Pool")
            .field("max_idle", &self.max_idle)
            .field("max_active", &self.max_active)
            .field("idle_timeout", &self.idle_timeout)
            .field("active", &state.active)
            .field("idle", &state.idle.len())
            .finish()
    }
}

/// A reserved active slot, given back on drop unless the resource it was
/// reserved for came into existence.
struct ActiveSlot<'a, T> {
    state: &'a Mutex<PoolState<T>>,
    armed: bool,
}

impl<T> ActiveSlot<'_, T> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T> Drop for ActiveSlot<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
    }
}

impl<T: Send + 'static> Pool<T> {
    pub fn new<F, Fut>(config: &PoolConfig, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        Pool {
            factory: Arc::new(move || Box::pin(factory()) as BoxFuture<'static, AppResult<T>>),
            max_idle: config.max_idle,
            max_active: config.max_active,
            idle_timeout: config.idle_timeout(),
            state: Mutex::new(PoolState {
                active: 0,
                idle: VecDeque::new(),
            }),
        }
    }

    /// Returns the freshest idle resource, or a new one from the factory.
    ///
    /// Idle resources older than the idle timeout are destroyed first.
    pub async fn get(&self) -> AppResult<T> {
        let (stale, reused) = {
            let mut state = self.state.lock();
            let stale = self.prune_stale(&mut state);
            let reused = state.idle.pop_front().map(|entry| entry.resource);
            (stale, reused)
        };
        if !stale.is_empty() {
            debug!("pool dropped {} stale idle resources", stale.len());
        }
        drop(stale);

        match reused {
            Some(resource) => Ok(resource),
            None => self.create().await,
        }
    }

    /// Always creates a new resource, leaving the idle list alone.
    pub async fn get_new(&self) -> AppResult<T> {
        self.create().await
    }

    fn prune_stale(&self, state: &mut PoolState<T>) -> Vec<T> {
        let mut stale = Vec::new();
        let Some(timeout) = self.idle_timeout else {
            return stale;
        };
        let now = Instant::now();
        while let Some(oldest) = state.idle.back() {
            if oldest.returned_at + timeout > now {
                break;
            }
            if let Some(entry) = state.idle.pop_back() {
                stale.push(entry.resource);
                state.active = state.active.saturating_sub(1);
            }
        }
        stale
    }

    async fn create(&self) -> AppResult<T> {
        let slot = self.reserve()?;
        let resource = (self.factory)().await?;
        slot.disarm();
        Ok(resource)
    }

    fn reserve(&self) -> AppResult<ActiveSlot<'_, T>> {
        let mut state = self.state.lock();
        if self.max_active > 0 && state.active >= self.max_active {
            return Err(AppError::PoolExhausted);
        }
        state.active += 1;
        Ok(ActiveSlot {
            state: &self.state,
            armed: true,
        })
    }

    /// Gives a resource back. With `force_close` it is destroyed instead;
    /// otherwise it becomes the freshest idle entry, and the stalest one is
    /// destroyed if the idle list is over its limit.
    pub fn put(&self, resource: T, force_close: bool) {
        let destroyed = {
            let mut state = self.state.lock();
            if force_close {
                state.active = state.active.saturating_sub(1);
                Some(resource)
            } else {
                state.idle.push_front(IdleEntry {
                    resource,
                    returned_at: Instant::now(),
                });
                if state.idle.len() > self.max_idle {
                    state.active = state.active.saturating_sub(1);
                    state.idle.pop_back().map(|entry| entry.resource)
                } else {
                    None
                }
            }
        };
        drop(destroyed);
    }

    /// Destroys every idle resource `keep` rejects, returning how many.
    pub fn filter_idle<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let removed: Vec<T> = {
            let mut state = self.state.lock();
            let mut kept = VecDeque::with_capacity(state.idle.len());
            let mut removed = Vec::new();
            for entry in state.idle.drain(..) {
                if keep(&entry.resource) {
                    kept.push_back(entry);
                } else {
                    removed.push(entry.resource);
                }
            }
            state.idle = kept;
            state.active = state.active.saturating_sub(removed.len());
            removed
        };
        let count = removed.len();
        if count > 0 {
            debug!("pool filtered out {} idle resources", count);
        }
        count
    }

    /// Destroys all idle resources and resets the counter. Checked out
    /// resources stay with their holders.
    pub fn close(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.active = 0;
            std::mem::take(&mut state.idle)
        };
        debug!("pool closed, dropping {} idle resources", idle.len());
        drop(idle);
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;

    use super::*;

    #[derive(Debug)]
    struct Tracked {
        id: usize,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Counters {
        created: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    impl Counters {
        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        fn dropped(&self) -> usize {
            self.dropped.load(Ordering::SeqCst)
        }
    }

    fn tracked_pool(
        max_idle: usize,
        max_active: usize,
        idle_timeout_ms: u64,
    ) -> (Pool<Tracked>, Counters) {
        let created = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        let config = PoolConfig {
            max_idle,
            max_active,
            idle_timeout_ms,
        };
        let pool = {
            let created = created.clone();
            let dropped = dropped.clone();
            Pool::new(&config, move || {
                let id = created.fetch_add(1, Ordering::SeqCst);
                let drops = dropped.clone();
                async move { Ok(Tracked { id, drops }) }
            })
        };
        (pool, Counters { created, dropped })
    }

    #[tokio::test]
    async fn test_get_reuses_freshest() {
        let (pool, counters) = tracked_pool(4, 0, 0);
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        assert_eq!((a.id, b.id), (0, 1));
        pool.put(a, false);
        pool.put(b, false);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.active_count(), 2);

        let again = pool.get().await.unwrap();
        assert_eq!(again.id, 1);
        assert_eq!(counters.created(), 2);
        assert_eq!(pool.idle_count(), 1);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[tokio::test]
    async fn test_max_active_exhaustion(#[case] max_active: usize) {
        let (pool, _counters) = tracked_pool(4, max_active, 0);
        let mut held = Vec::new();
        for _ in 0..max_active {
            held.push(pool.get().await.unwrap());
        }
        assert!(matches!(pool.get().await, Err(AppError::PoolExhausted)));
        assert!(matches!(pool.get_new().await, Err(AppError::PoolExhausted)));
        assert_eq!(pool.active_count(), max_active);

        pool.put(held.pop().unwrap(), true);
        assert_eq!(pool.active_count(), max_active - 1);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_max_idle_evicts_stalest() {
        let (pool, counters) = tracked_pool(2, 0, 0);
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.get().await.unwrap());
        }
        for resource in held {
            pool.put(resource, false);
            assert!(pool.idle_count() <= 2);
        }
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.active_count(), 2);
        assert_eq!(counters.dropped(), 2);

        // ids 0 and 1 went first, 3 is the freshest
        assert_eq!(pool.get().await.unwrap().id, 3);
        pool.close();
        assert_eq!(counters.dropped(), 4);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let (pool, counters) = tracked_pool(4, 0, 100);
        let first = pool.get().await.unwrap();
        pool.put(first, false);

        tokio::time::advance(Duration::from_millis(50)).await;
        let reused = pool.get().await.unwrap();
        assert_eq!(reused.id, 0);
        pool.put(reused, false);

        tokio::time::advance(Duration::from_millis(150)).await;
        let fresh = pool.get().await.unwrap();
        assert_eq!(fresh.id, 1);
        assert_eq!(counters.dropped(), 1);
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn test_factory_failure_releases_slot() {
        let config = PoolConfig {
            max_idle: 1,
            max_active: 1,
            idle_timeout_ms: 0,
        };
        let pool: Pool<Tracked> = Pool::new(&config, || async {
            Err(AppError::InvalidValue("dial refused".to_string()))
        });
        assert!(matches!(pool.get().await, Err(AppError::InvalidValue(_))));
        assert_eq!(pool.active_count(), 0);
        assert!(matches!(pool.get().await, Err(AppError::InvalidValue(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_get_releases_slot() {
        let config = PoolConfig {
            max_idle: 1,
            max_active: 1,
            idle_timeout_ms: 0,
        };
        let pool: Pool<u32> = Pool::new(&config, || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(7)
        });
        let res = tokio::time::timeout(Duration::from_millis(10), pool.get()).await;
        assert!(res.is_err());
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.get().await.unwrap(), 7);
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn test_get_new_skips_idle() {
        let (pool, counters) = tracked_pool(4, 0, 0);
        let first = pool.get().await.unwrap();
        pool.put(first, false);
        let fresh = pool.get_new().await.unwrap();
        assert_eq!(fresh.id, 1);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(counters.created(), 2);
    }

    #[tokio::test]
    async fn test_filter_idle() {
        let (pool, counters) = tracked_pool(8, 0, 0);
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.get().await.unwrap());
        }
        for resource in held {
            pool.put(resource, false);
        }
        let removed = pool.filter_idle(|r| r.id % 2 == 0);
        assert_eq!(removed, 2);
        assert_eq!(counters.dropped(), 2);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.active_count(), 3);
        // order of the kept entries is unchanged
        assert_eq!(pool.get().await.unwrap().id, 4);
    }
}
