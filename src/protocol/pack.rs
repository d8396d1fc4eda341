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

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use super::header::{Header, HEADER_LENGTH, RES_SUCCESS};
use super::Encodable;

const INITIAL_CAPACITY: usize = 256;

/// Append-only write buffer for one frame.
///
/// The first [`HEADER_LENGTH`] bytes are reserved; the body is written first
/// and [`Pack::put_header`] patches the header in place once the body length
/// is known. `BytesMut` takes care of geometric growth.
///
/// ```ignore
/// let mut pack = Pack::new();
/// msg.encode_body(&mut pack);
/// pack.put_header(msg.message_type(), RES_SUCCESS);
/// stream.write_all(pack.bytes()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Pack {
    buf: BytesMut,
}

impl Default for Pack {
    fn default() -> Self {
        Self::new()
    }
}

impl Pack {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(capacity.max(HEADER_LENGTH));
        buf.put_bytes(0, HEADER_LENGTH);
        Pack { buf }
    }

    /// Total bytes written, header included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() == HEADER_LENGTH
    }

    /// The whole frame; only meaningful after [`Pack::put_header`].
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Body without the header, used when nesting one message inside another.
    pub fn body_bytes(&self) -> &[u8] {
        &self.buf[HEADER_LENGTH..]
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn freeze_body(mut self) -> Bytes {
        self.buf.split_off(HEADER_LENGTH).freeze()
    }

    /// Drops the body and keeps the reserved header room.
    pub fn clear(&mut self) {
        self.buf.truncate(HEADER_LENGTH);
        self.buf[..HEADER_LENGTH].fill(0);
    }

    pub fn put_bool(&mut self, b: bool) {
        self.buf.put_u8(u8::from(b));
    }

    pub fn put_u8(&mut self, u8: u8) {
        self.buf.put_u8(u8);
    }

    pub fn put_u16(&mut self, u16: u16) {
        self.buf.put_u16_le(u16);
    }

    pub fn put_u32(&mut self, u32: u32) {
        self.buf.put_u32_le(u32);
    }

    pub fn put_u64(&mut self, u64: u64) {
        self.buf.put_u64_le(u64);
    }

    /// u16 length prefixed string
    pub fn put_short_str(&mut self, s: &str) {
        let s = truncate_str(s, u16::MAX as usize, "put_short_str");
        self.buf.put_u16_le(s.len() as u16);
        self.buf.put_slice(s.as_bytes());
    }

    /// u32 length prefixed string
    pub fn put_long_str(&mut self, s: &str) {
        let s = truncate_str(s, u32::MAX as usize, "put_long_str");
        self.buf.put_u32_le(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
    }

    pub fn put_short_bytes(&mut self, bytes: &[u8]) {
        let bytes = truncate_bytes(bytes, u16::MAX as usize, "put_short_bytes");
        self.buf.put_u16_le(bytes.len() as u16);
        self.buf.put_slice(bytes);
    }

    pub fn put_long_bytes(&mut self, bytes: &[u8]) {
        let bytes = truncate_bytes(bytes, u32::MAX as usize, "put_long_bytes");
        self.buf.put_u32_le(bytes.len() as u32);
        self.buf.put_slice(bytes);
    }

    /// Writes a sequence/map element count.
    pub fn put_count(&mut self, count: usize) {
        self.put_u32(count as u32);
    }

    pub fn put_value<T: Encodable + ?Sized>(&mut self, value: &T) {
        value.encode(self);
    }

    /// Patches the reserved header; call after the body is complete.
    pub fn put_header(&mut self, type_id: u32, res_code: u16) {
        let header = Header::new(self.buf.len() as u32, type_id, res_code);
        header.write_to(&mut self.buf[..HEADER_LENGTH]);
    }

    pub fn put_success_header(&mut self, type_id: u32) {
        self.put_header(type_id, RES_SUCCESS);
    }
}

fn truncate_str<'a>(s: &'a str, max: usize, op: &str) -> &'a str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    warn!("{} truncate string from {} to {} bytes", op, s.len(), end);
    &s[..end]
}

fn truncate_bytes<'a>(bytes: &'a [u8], max: usize, op: &str) -> &'a [u8] {
    if bytes.len() <= max {
        return bytes;
    }
    warn!("{} truncate bytes from {} to {}", op, bytes.len(), max);
    &bytes[..max]
}
