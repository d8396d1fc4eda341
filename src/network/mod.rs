//! Network Module Implementation
//!
//! Turns a TCP byte stream into frames and back. A [`StreamBuffer`]
//! accumulates reads until the registry can decode a whole frame; a
//! [`Connection`] owns one socket together with its buffer, with reads and
//! writes locked independently so a response can be written while the next
//! request is being read.

pub use connection::{Connection, ConnectionConfig};
pub use stream_buffer::{StreamBuffer, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_READ_CHUNK_SIZE};

mod connection;
mod stream_buffer;
