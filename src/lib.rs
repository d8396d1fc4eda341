//! Framed binary wire protocol for game backends.
//!
//! - [`protocol`]: frame header, body codec, message registry
//! - [`network`]: stream buffering and framed TCP connections
//! - [`pool`]: idle resource pool and discovery-fed service pools
//! - [`service`]: the dispatch server, configuration, errors and tracing

use std::future::Future;
use std::pin::Pin;

pub mod network;
pub mod pool;
pub mod protocol;
pub mod service;

pub use network::{Connection, ConnectionConfig};
pub use pool::{DiscoveryRecord, Pool, ServicePool};
pub use protocol::{
    DynamicMessage, Encodable, FieldSpec, Header, LongEncodable, Message, Pack, Registry, Schema,
    Shape, Unpack, Value,
};
pub use service::{
    setup_local_tracing, setup_tracing, AppConfig, AppError, AppResult, NetworkConfig, PoolConfig,
    Server, Shutdown,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
