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

use std::mem;

use super::header::Header;
use super::Encodable;
use crate::{AppError, AppResult};

/// Read cursor over an immutable byte slice.
///
/// `valid` is the decode ceiling. It starts at the slice length and is
/// lowered to the header's declared length by [`Unpack::pop_header`], so a
/// message never reads into the next frame already sitting in the buffer.
#[derive(Debug)]
pub struct Unpack<'a> {
    buf: &'a [u8],
    offset: usize,
    valid: usize,
    header: Option<Header>,
}

macro_rules! implement_pop_int {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self) -> AppResult<$type> {
            const SIZE: usize = std::mem::size_of::<$type>();
            let raw = self.take(SIZE, stringify!($name))?;
            let mut le = [0u8; SIZE];
            le.copy_from_slice(raw);
            Ok(<$type>::from_le_bytes(le))
        }
    };
}

impl<'a> Unpack<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Unpack {
            buf,
            offset: 0,
            valid: buf.len(),
            header: None,
        }
    }

    /// The popped header, `None` until [`Unpack::pop_header`] succeeded.
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Type id used in error context, 0 before a header is known.
    pub fn type_id(&self) -> u32 {
        self.header.map_or(0, |h| h.type_id)
    }

    /// Bytes read so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the underlying slice, ignoring the ceiling.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left before the ceiling.
    pub fn remaining(&self) -> usize {
        self.valid.saturating_sub(self.offset)
    }

    fn check_space(&self, size: usize) -> bool {
        self.offset
            .checked_add(size)
            .is_some_and(|end| end <= self.valid)
    }

    fn take(&mut self, size: usize, op: &str) -> AppResult<&'a [u8]> {
        if !self.check_space(size) {
            return Err(AppError::unpack(self.type_id(), op));
        }
        let raw = &self.buf[self.offset..self.offset + size];
        self.offset += size;
        Ok(raw)
    }

    pub fn pop_bool(&mut self) -> AppResult<bool> {
        let raw = self.take(1, "pop_bool")?;
        Ok(raw[0] != 0)
    }

    pub fn pop_u8(&mut self) -> AppResult<u8> {
        let raw = self.take(1, "pop_u8")?;
        Ok(raw[0])
    }

    implement_pop_int!(pop_u16, u16);
    implement_pop_int!(pop_u32, u32);
    implement_pop_int!(pop_u64, u64);

    pub fn pop_short_bytes(&mut self) -> AppResult<&'a [u8]> {
        let length = self.pop_u16()? as usize;
        self.take(length, &format!("pop_short_bytes {}", length))
    }

    pub fn pop_long_bytes(&mut self) -> AppResult<&'a [u8]> {
        let length = self.pop_u32()? as usize;
        self.take(length, &format!("pop_long_bytes {}", length))
    }

    pub fn pop_short_str(&mut self) -> AppResult<String> {
        let length = self.pop_u16()? as usize;
        let raw = self.take(length, &format!("pop_short_str {}", length))?;
        self.utf8(raw, "pop_short_str")
    }

    pub fn pop_long_str(&mut self) -> AppResult<String> {
        let length = self.pop_u32()? as usize;
        let raw = self.take(length, &format!("pop_long_str {}", length))?;
        self.utf8(raw, "pop_long_str")
    }

    fn utf8(&self, raw: &[u8], op: &str) -> AppResult<String> {
        String::from_utf8(raw.to_vec())
            .map_err(|_| AppError::unpack(self.type_id(), format!("{} invalid utf-8", op)))
    }

    /// Element count of a sequence or map.
    pub fn pop_count(&mut self) -> AppResult<usize> {
        Ok(self.pop_u32()? as usize)
    }

    /// Capacity to reserve for `count` elements of `T`. A hostile count
    /// never reserves more memory than the bytes actually left.
    pub fn capacity_hint<T>(&self, count: usize) -> usize {
        count.min(self.remaining() / mem::size_of::<T>().max(1))
    }

    pub fn pop_value<T: Encodable>(&mut self) -> AppResult<T> {
        T::decode(self)
    }

    /// Parses the header and lowers the decode ceiling to its declared length.
    pub fn pop_header(&mut self) -> AppResult<Header> {
        let length = self.pop_u32()?;
        let type_id = self.pop_u32()?;
        let res_code = self.pop_u16()?;
        let header = Header::new(length, type_id, res_code);
        self.header = Some(header);
        if (length as usize) < self.buf.len() {
            self.valid = length as usize;
        }
        Ok(header)
    }
}
