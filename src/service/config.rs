use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};
use crate::network::{ConnectionConfig, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_READ_CHUNK_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    /// 0 accepts without limit
    pub max_connection: usize,
    /// 0 disables the read deadline
    pub read_timeout_ms: u64,
    /// 0 disables the write deadline
    pub write_timeout_ms: u64,
    pub read_chunk_size: usize,
    pub max_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 8000,
            max_connection: 0,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

impl NetworkConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            read_timeout: millis(self.read_timeout_ms),
            write_timeout: millis(self.write_timeout_ms),
            read_chunk_size: self.read_chunk_size,
            max_buffer_size: self.max_buffer_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_idle: usize,
    /// 0 means unbounded
    pub max_active: usize,
    /// 0 keeps idle resources forever
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle: 4,
            max_active: 0,
            idle_timeout_ms: 0,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        millis(self.idle_timeout_ms)
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub pool: PoolConfig,
}

impl AppConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<AppConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.network.listen_addr(), "0.0.0.0:8000");
        assert_eq!(config.pool.max_idle, 4);
        assert_eq!(config.pool.idle_timeout(), None);

        let conn = config.network.connection_config();
        assert_eq!(conn, ConnectionConfig::default());
    }

    #[test]
    fn test_connection_config_timeouts() {
        let network = NetworkConfig {
            read_timeout_ms: 1500,
            ..Default::default()
        };
        let conn = network.connection_config();
        assert_eq!(conn.read_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(conn.write_timeout, None);
    }
}
