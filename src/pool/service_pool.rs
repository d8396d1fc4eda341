use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::Pool;
use crate::network::{Connection, ConnectionConfig};
use crate::{AppError, AppResult, PoolConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Up,
    Down,
}

/// One instance of a peer service as announced by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub server_id: u64,
    /// `host:port`
    pub address: String,
    pub group_id: u32,
    pub status: EndpointStatus,
    pub properties: HashMap<String, String>,
}

impl DiscoveryRecord {
    pub fn up(server_id: u64, address: impl Into<String>) -> Self {
        DiscoveryRecord {
            server_id,
            address: address.into(),
            group_id: 0,
            status: EndpointStatus::Up,
            properties: HashMap::new(),
        }
    }

    pub fn down(server_id: u64) -> Self {
        DiscoveryRecord {
            server_id,
            address: String::new(),
            group_id: 0,
            status: EndpointStatus::Down,
            properties: HashMap::new(),
        }
    }
}

/// Picks the endpoint the next connection is dialed to.
pub trait Selector: Debug + Send + Sync {
    fn select<'a>(
        &self,
        endpoints: &'a BTreeMap<u64, DiscoveryRecord>,
    ) -> Option<&'a DiscoveryRecord>;
}

/// Cycles through the endpoints in ascending server id order.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl Selector for RoundRobinSelector {
    fn select<'a>(
        &self,
        endpoints: &'a BTreeMap<u64, DiscoveryRecord>,
    ) -> Option<&'a DiscoveryRecord> {
        if endpoints.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        endpoints.values().nth(index)
    }
}

/// A pooled connection together with the endpoint it was dialed to.
#[derive(Debug)]
pub struct PooledConnection {
    server_id: u64,
    address: String,
    conn: Connection,
}

impl PooledConnection {
    pub fn server_id(&self) -> u64 {
        self.server_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn into_inner(self) -> Connection {
        self.conn
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

type Endpoints = Arc<Mutex<BTreeMap<u64, DiscoveryRecord>>>;

/// Connection pool for one named peer service.
///
/// Endpoints come and go through [`ServicePool::apply`]; a withdrawn
/// endpoint takes its idle connections with it. Connections already
/// checked out are left to their holders.
#[derive(Debug)]
pub struct ServicePool {
    name: String,
    endpoints: Endpoints,
    pool: Pool<PooledConnection>,
}

impl ServicePool {
    pub fn new(
        name: impl Into<String>,
        pool_config: &PoolConfig,
        connection_config: ConnectionConfig,
    ) -> Self {
        ServicePool::with_selector(
            name,
            pool_config,
            connection_config,
            RoundRobinSelector::default(),
        )
    }

    pub fn with_selector<S: Selector + 'static>(
        name: impl Into<String>,
        pool_config: &PoolConfig,
        connection_config: ConnectionConfig,
        selector: S,
    ) -> Self {
        let name = name.into();
        let endpoints: Endpoints = Arc::new(Mutex::new(BTreeMap::new()));
        let connection_config = Arc::new(connection_config);
        let pool = {
            let name = name.clone();
            let endpoints = endpoints.clone();
            Pool::new(pool_config, move || {
                let target = {
                    let endpoints = endpoints.lock();
                    selector
                        .select(&endpoints)
                        .map(|record| (record.server_id, record.address.clone()))
                };
                let name = name.clone();
                let connection_config = connection_config.clone();
                async move {
                    let (server_id, address) = target.ok_or(AppError::NoEndpoint(name))?;
                    let conn = Connection::connect(address.as_str(), &connection_config).await?;
                    debug!("dialed {} at {} (server {})", conn.id(), address, server_id);
                    Ok::<_, AppError>(PooledConnection {
                        server_id,
                        address,
                        conn,
                    })
                }
            })
        };
        ServicePool {
            name,
            endpoints,
            pool,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies one discovery update and returns how many idle connections
    /// it closed.
    pub fn apply(&self, record: DiscoveryRecord) -> usize {
        let server_id = record.server_id;
        match record.status {
            EndpointStatus::Up => {
                info!(
                    "service {} add endpoint {} at {} group {}",
                    self.name, server_id, record.address, record.group_id
                );
                self.endpoints.lock().insert(server_id, record);
                0
            }
            EndpointStatus::Down => {
                let removed = self.endpoints.lock().remove(&server_id);
                if removed.is_none() {
                    return 0;
                }
                info!("service {} remove endpoint {}", self.name, server_id);
                self.pool.filter_idle(|conn| conn.server_id != server_id)
            }
        }
    }

    /// Applies updates until every sender is gone.
    pub async fn run(&self, mut records: mpsc::Receiver<DiscoveryRecord>) {
        while let Some(record) = records.recv().await {
            self.apply(record);
        }
        debug!("service {} discovery channel closed", self.name);
    }

    /// Current endpoints in ascending server id order.
    pub fn endpoints(&self) -> Vec<DiscoveryRecord> {
        self.endpoints.lock().values().cloned().collect()
    }

    pub async fn get(&self) -> AppResult<PooledConnection> {
        self.pool.get().await
    }

    pub async fn get_new(&self) -> AppResult<PooledConnection> {
        self.pool.get_new().await
    }

    pub fn put(&self, conn: PooledConnection, force_close: bool) {
        self.pool.put(conn, force_close);
    }

    pub fn close(&self) {
        self.pool.close();
    }

    pub fn pool(&self) -> &Pool<PooledConnection> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn listeners(n: usize) -> Vec<TcpListener> {
        let mut listeners = Vec::with_capacity(n);
        for _ in 0..n {
            listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
        }
        listeners
    }

    fn service_pool() -> ServicePool {
        ServicePool::new("echo", &PoolConfig::default(), ConnectionConfig::default())
    }

    #[test]
    fn test_round_robin_ascending_ids() {
        let selector = RoundRobinSelector::default();
        let mut endpoints = BTreeMap::new();
        for id in [30, 10, 20] {
            endpoints.insert(id, DiscoveryRecord::up(id, format!("127.0.0.1:{}", id)));
        }
        let picked: Vec<u64> = (0..6)
            .map(|_| selector.select(&endpoints).unwrap().server_id)
            .collect();
        assert_eq!(picked, vec![10, 20, 30, 10, 20, 30]);
        assert!(selector.select(&BTreeMap::new()).is_none());
    }

    #[tokio::test]
    async fn test_no_endpoint() {
        let pool = service_pool();
        match pool.get().await {
            Err(AppError::NoEndpoint(name)) => assert_eq!(name, "echo"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(pool.pool().active_count(), 0);
    }

    #[tokio::test]
    async fn test_dial_follows_selector() {
        let servers = listeners(2).await;
        let pool = service_pool();
        for (id, server) in (1..).zip(&servers) {
            pool.apply(DiscoveryRecord::up(id, server.local_addr().unwrap().to_string()));
        }
        let first = pool.get().await.unwrap();
        let second = pool.get().await.unwrap();
        assert_eq!((first.server_id(), second.server_id()), (1, 2));
        assert_eq!(first.peer_addr(), servers[0].local_addr().unwrap());
        assert_eq!(pool.endpoints().len(), 2);
    }

    #[tokio::test]
    async fn test_withdrawal_drops_idle_connections() {
        let servers = listeners(2).await;
        let pool = service_pool();
        for (id, server) in (1..).zip(&servers) {
            pool.apply(DiscoveryRecord::up(id, server.local_addr().unwrap().to_string()));
        }
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.get_new().await.unwrap());
        }
        for conn in held {
            pool.put(conn, false);
        }
        assert_eq!(pool.pool().idle_count(), 4);

        assert_eq!(pool.apply(DiscoveryRecord::down(1)), 2);
        assert_eq!(pool.pool().idle_count(), 2);
        assert_eq!(pool.pool().active_count(), 2);
        // unknown endpoints are ignored
        assert_eq!(pool.apply(DiscoveryRecord::down(9)), 0);

        let conn = pool.get().await.unwrap();
        assert_eq!(conn.server_id(), 2);
        let fresh = pool.get_new().await.unwrap();
        assert_eq!(fresh.server_id(), 2);
    }

    #[tokio::test]
    async fn test_run_consumes_channel() {
        let servers = listeners(1).await;
        let pool = service_pool();
        let (tx, rx) = mpsc::channel(4);
        tx.send(DiscoveryRecord::up(7, servers[0].local_addr().unwrap().to_string()))
            .await
            .unwrap();
        drop(tx);
        pool.run(rx).await;
        assert_eq!(pool.endpoints()[0].server_id, 7);
        assert_eq!(pool.get().await.unwrap().server_id(), 7);
    }
}
