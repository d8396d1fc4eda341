use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use super::config::NetworkConfig;
use super::Shutdown;
use crate::network::{Connection, ConnectionConfig};
use crate::protocol::{DynamicMessage, Encodable, Message, Registry, Schema};
use crate::{AppError, AppResult, BoxFuture};

/// Called with each decoded message; returning `false` closes the connection.
pub type MessageHandle =
    Arc<dyn Fn(Arc<Connection>, Box<dyn Message>) -> BoxFuture<'static, bool> + Send + Sync>;

/// Called once a connection is accepted; returning `false` closes it.
pub type ConnectHandle = Arc<dyn Fn(Arc<Connection>) -> BoxFuture<'static, bool> + Send + Sync>;

/// Called once per connection as it ends. The error is `None` when a
/// connect or message handle asked for the close, and the cause otherwise.
pub type CloseHandle =
    Arc<dyn Fn(Arc<Connection>, Option<AppError>) -> BoxFuture<'static, ()> + Send + Sync>;

const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Handlers {
    registry: Registry,
    messages: HashMap<u32, MessageHandle>,
    on_connect: Option<ConnectHandle>,
    on_close: Option<CloseHandle>,
    connection_config: ConnectionConfig,
}

struct RunningState {
    listen_addr: SocketAddr,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_rx: mpsc::Receiver<()>,
}

/// A framed TCP server dispatching messages to handles by type id.
///
/// Every handle must be registered before [`Server::start`]; registering
/// afterwards panics. Each connection is served by its own task, so handles
/// run concurrently across connections but one at a time per connection,
/// in arrival order.
pub struct Server {
    handlers: Option<Handlers>,
    max_connection: usize,
    running: Option<RunningState>,
}

impl Default for Server {
    fn default() -> Self {
        Server::new()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen_addr", &self.listen_addr())
            .field("max_connection", &self.max_connection)
            .finish()
    }
}

impl Server {
    pub fn new() -> Self {
        Server {
            handlers: Some(Handlers::default()),
            max_connection: 0,
            running: None,
        }
    }

    pub fn with_config(config: &NetworkConfig) -> Self {
        let mut server = Server::new();
        server.max_connection = config.max_connection;
        server.handlers_mut().connection_config = config.connection_config();
        server
    }

    fn handlers_mut(&mut self) -> &mut Handlers {
        match self.handlers.as_mut() {
            Some(handlers) => handlers,
            None => panic!("server is running, register handles before start"),
        }
    }

    /// Registers `M` and the handle its messages are dispatched to.
    ///
    /// # Panics
    ///
    /// Panics once the server started, or if the type id of `M` already
    /// has a handle.
    pub fn register_handle<M, F, Fut>(&mut self, handle: F)
    where
        M: Message + Encodable + Default + 'static,
        F: Fn(Arc<Connection>, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let type_id = M::default().message_type();
        let handlers = self.handlers_mut();
        if !handlers.registry.register::<M>() {
            panic!("message type {} already has a handle", type_id);
        }
        let handle: MessageHandle = Arc::new(move |conn: Arc<Connection>, msg: Box<dyn Message>| {
            match msg.downcast::<M>() {
                Some(msg) => Box::pin(handle(conn, *msg)) as BoxFuture<'static, bool>,
                None => {
                    error!("message type {} decoded to an unexpected type", type_id);
                    Box::pin(async { false })
                }
            }
        });
        handlers.messages.insert(type_id, handle);
    }

    /// Registers a runtime-described message type and its handle.
    ///
    /// # Panics
    ///
    /// Same conditions as [`Server::register_handle`].
    pub fn register_schema_handle<F, Fut>(&mut self, schema: Schema, handle: F)
    where
        F: Fn(Arc<Connection>, DynamicMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let type_id = schema.type_id();
        let handlers = self.handlers_mut();
        if !handlers.registry.register_schema(schema) {
            panic!("message type {} already has a handle", type_id);
        }
        let handle: MessageHandle = Arc::new(move |conn: Arc<Connection>, msg: Box<dyn Message>| {
            match msg.downcast::<DynamicMessage>() {
                Some(msg) => Box::pin(handle(conn, *msg)) as BoxFuture<'static, bool>,
                None => {
                    error!("message type {} decoded to an unexpected type", type_id);
                    Box::pin(async { false })
                }
            }
        });
        handlers.messages.insert(type_id, handle);
    }

    pub fn register_connect_func<F, Fut>(&mut self, handle: F)
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let handle: ConnectHandle =
            Arc::new(move |conn| Box::pin(handle(conn)) as BoxFuture<'static, bool>);
        self.handlers_mut().on_connect = Some(handle);
    }

    pub fn register_close_func<F, Fut>(&mut self, handle: F)
    where
        F: Fn(Arc<Connection>, Option<AppError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle: CloseHandle =
            Arc::new(move |conn, err| Box::pin(handle(conn, err)) as BoxFuture<'static, ()>);
        self.handlers_mut().on_close = Some(handle);
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|state| state.listen_addr)
    }

    /// Binds `addr` and starts accepting in the background. Returns the
    /// bound address, which tells the port when `addr` asked for port 0.
    pub async fn start<A: ToSocketAddrs>(&mut self, addr: A) -> AppResult<SocketAddr> {
        self.assert_not_started();
        let listener = TcpListener::bind(addr).await?;
        self.run_listener(listener)
    }

    /// Tries `tries` consecutive ports starting at the port of `addr`.
    pub async fn start_range(&mut self, addr: &str, tries: u16) -> AppResult<SocketAddr> {
        self.assert_not_started();
        let (ip, port) = addr
            .rsplit_once(':')
            .and_then(|(ip, port)| port.parse::<u16>().ok().map(|port| (ip, port)))
            .ok_or_else(|| AppError::InvalidValue(format!("listen address {}", addr)))?;

        for offset in 0..tries {
            let Some(port) = port.checked_add(offset) else {
                break;
            };
            match TcpListener::bind((ip, port)).await {
                Ok(listener) => return self.run_listener(listener),
                Err(e) => debug!("listen {}:{} failed: {}", ip, port, e),
            }
        }
        Err(AppError::IllegalStateError(format!(
            "no free port in {} ports from {}",
            tries, addr
        )))
    }

    fn assert_not_started(&self) {
        if self.handlers.is_none() {
            panic!("server already started");
        }
    }

    fn run_listener(&mut self, listener: TcpListener) -> AppResult<SocketAddr> {
        let listen_addr = listener.local_addr()?;
        let handlers = match self.handlers.take() {
            Some(handlers) => Arc::new(handlers),
            None => panic!("server already started"),
        };
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        let limit_connections =
            (self.max_connection > 0).then(|| Arc::new(Semaphore::new(self.max_connection)));

        // subscribed before spawning so a shutdown sent before the first poll is seen
        let shutdown = Shutdown::new(notify_shutdown.subscribe());
        let acceptor = Acceptor {
            listener,
            handlers,
            limit_connections,
            notify_shutdown: notify_shutdown.clone(),
            shutdown_complete_tx,
        };
        tokio::spawn(acceptor.run(shutdown));
        info!("server listening on {}", listen_addr);

        self.running = Some(RunningState {
            listen_addr,
            notify_shutdown,
            shutdown_complete_rx,
        });
        Ok(listen_addr)
    }

    /// Stops accepting, ends every connection and waits for all of their
    /// tasks. Close handles see [`AppError::ServerShutdown`].
    pub async fn shutdown(&mut self) {
        let Some(state) = self.running.take() else {
            return;
        };
        let RunningState {
            listen_addr,
            notify_shutdown,
            mut shutdown_complete_rx,
        } = state;
        info!("server on {} shutting down", listen_addr);
        let _ = notify_shutdown.send(());
        drop(notify_shutdown);
        // every task holds a sender, recv returns None once all are gone
        let _ = shutdown_complete_rx.recv().await;
        info!("server on {} stopped", listen_addr);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // without a shutdown call the accept loop would outlive the server
        if let Some(state) = &self.running {
            let _ = state.notify_shutdown.send(());
        }
    }
}

/// The accept loop.
struct Acceptor {
    listener: TcpListener,
    handlers: Arc<Handlers>,
    limit_connections: Option<Arc<Semaphore>>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

impl Acceptor {
    async fn run(self, mut shutdown: Shutdown) {
        loop {
            let permit = tokio::select! {
                permit = self.acquire_permit() => permit,
                _ = shutdown.recv() => break,
            };
            let socket = tokio::select! {
                socket = self.accept() => socket,
                _ = shutdown.recv() => break,
            };

            if let Err(e) = socket.set_nodelay(true) {
                debug!("set nodelay: {}", e);
            }
            let connection = match Connection::new(socket, &self.handlers.connection_config) {
                Ok(connection) => Arc::new(connection),
                Err(e) => {
                    warn!("set up accepted connection: {}", e);
                    continue;
                }
            };
            debug!(
                "accepted connection {} from {}",
                connection.id(),
                connection.peer_addr()
            );
            let handler = ConnectionHandler {
                handlers: self.handlers.clone(),
                connection,
                shutdown: Shutdown::new(self.notify_shutdown.subscribe()),
                _permit: permit,
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
            };
            tokio::spawn(handler.run());
        }
        debug!("accept loop on {:?} exited", self.listener.local_addr());
    }

    async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.limit_connections.clone()?;
        // the semaphore is never closed
        semaphore.acquire_owned().await.ok()
    }

    /// Accepts the next socket. Errors are logged and retried with a capped
    /// backoff; they never end the loop.
    async fn accept(&self) -> TcpStream {
        let mut backoff = ACCEPT_BACKOFF_START;
        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return socket,
                Err(e) => {
                    warn!("accept error: {}, retry in {:?}", e, backoff);
                    time::sleep(backoff).await;
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                }
            }
        }
    }
}

// handler for each connection
struct ConnectionHandler {
    handlers: Arc<Handlers>,
    connection: Arc<Connection>,
    shutdown: Shutdown,
    _permit: Option<OwnedSemaphorePermit>,
    _shutdown_complete_tx: mpsc::Sender<()>,
}

impl ConnectionHandler {
    async fn run(mut self) {
        let reason = tokio::select! {
            reason = Self::serve(&self.handlers, &self.connection) => reason,
            _ = self.shutdown.recv() => Some(AppError::ServerShutdown),
        };
        match &reason {
            None => debug!("connection {} closed by handle", self.connection.id()),
            Some(e) => info!(
                "connection {} from {} closed: {}",
                self.connection.id(),
                self.connection.peer_addr(),
                e
            ),
        }
        if let Some(on_close) = &self.handlers.on_close {
            on_close(self.connection.clone(), reason).await;
        }
        self.connection.close().await;
    }

    /// Runs a connection until it should close, returning why.
    async fn serve(handlers: &Handlers, connection: &Arc<Connection>) -> Option<AppError> {
        if let Some(on_connect) = &handlers.on_connect {
            if !on_connect(connection.clone()).await {
                return None;
            }
        }
        loop {
            let msg = match connection.recv(&handlers.registry).await {
                Ok(msg) => msg,
                Err(e) => return Some(e),
            };
            let type_id = msg.message_type();
            let Some(handle) = handlers.messages.get(&type_id) else {
                return Some(AppError::UnregisteredType(type_id));
            };
            if !handle(connection.clone(), msg).await {
                return None;
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!("connection handler {} dropped", self.connection.id());
    }
}
