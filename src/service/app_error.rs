// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::ErrorKind;
use std::time::Duration;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// marker error: the buffer does not yet hold a complete frame.
    /// Header-short and body-short reads both map to this one value.
    #[error("input not enough for a complete frame")]
    Incomplete,

    /// frame errors, all fatal for the connection
    #[error("invalid frame length {length} for type {type_id}")]
    InvalidFrameLength { length: u32, type_id: u32 },

    #[error("message type {0} is not registered")]
    UnregisteredType(u32),

    #[error("unpack error: type {type_id} {op}")]
    Unpack { type_id: u32, op: String },

    #[error("unpack consumed {consumed} bytes but header declares {declared}")]
    LengthMismatch { consumed: usize, declared: u32 },

    #[error("read buffer reach max size: {0}")]
    BufferOverflow(usize),

    /// transport errors
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("deadline of {0:?} expired")]
    Timeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("server is shutting down")]
    ServerShutdown,

    /// pool errors
    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("no endpoint available for service {0}")]
    NoEndpoint(String),

    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),
}

impl AppError {
    pub(crate) fn unpack(type_id: u32, op: impl Into<String>) -> Self {
        AppError::Unpack {
            type_id,
            op: op.into(),
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, AppError::Incomplete)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout(_))
    }

    /// The peer closed its side of the stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, AppError::IoError(err) if err.kind() == ErrorKind::UnexpectedEof)
    }
}
