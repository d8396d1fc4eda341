/// Header length: Length 4 + TypeID 4 + ResultCode 2
pub const HEADER_LENGTH: usize = 10;

/// Largest frame a peer may declare, 64MB.
pub const MAX_FRAME_LENGTH: u32 = 64 * 1024 * 1024;

/// Result code carried by every successful frame.
pub const RES_SUCCESS: u16 = 200;

/// Fixed frame header, little-endian on the wire.
///
/// `length` counts the whole frame, header included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub length: u32,
    pub type_id: u32,
    pub res_code: u16,
}

impl Header {
    pub fn new(length: u32, type_id: u32, res_code: u16) -> Self {
        Header {
            length,
            type_id,
            res_code,
        }
    }

    /// Parses a header from the first ten bytes of `buf` without validating it.
    /// Returns `None` when fewer than ten bytes are available.
    pub fn peek(buf: &[u8]) -> Option<Header> {
        let raw: &[u8; HEADER_LENGTH] = buf.get(..HEADER_LENGTH)?.try_into().ok()?;
        Some(Header {
            length: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            type_id: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            res_code: u16::from_le_bytes([raw[8], raw[9]]),
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.type_id.to_le_bytes());
        buf[8..10].copy_from_slice(&self.res_code.to_le_bytes());
    }

    /// A frame is sane when it is at least a header and no larger than
    /// [`MAX_FRAME_LENGTH`].
    pub fn is_sane(&self) -> bool {
        self.length as usize >= HEADER_LENGTH && self.length <= MAX_FRAME_LENGTH
    }

    pub fn body_length(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_LENGTH)
    }
}
