//! Outgoing resource pooling.
//!
//! [`Pool`] is generic over the pooled resource; [`ServicePool`] pools
//! connections to one peer service whose endpoints are fed in by a
//! discovery collaborator as [`DiscoveryRecord`]s.

pub use resource_pool::Pool;
pub use service_pool::{
    DiscoveryRecord, EndpointStatus, PooledConnection, RoundRobinSelector, Selector, ServicePool,
};

mod resource_pool;
mod service_pool;
