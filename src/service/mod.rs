pub use app_error::{AppError, AppResult};
pub use config::{AppConfig, NetworkConfig, PoolConfig};
pub use server::{CloseHandle, ConnectHandle, MessageHandle, Server};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod config;
mod server;
mod shutdown;
mod tracing_config;
