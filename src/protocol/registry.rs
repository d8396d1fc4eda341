use std::collections::HashMap;
use std::sync::Arc;

use tracing::{trace, warn};

use super::dynamic::Schema;
use super::header::{Header, HEADER_LENGTH};
use super::{Encodable, Message, Unpack};
use crate::{AppError, AppResult};

/// Builds a concrete message from a body positioned right after the header.
pub type Decoder = Box<dyn Fn(&mut Unpack<'_>) -> AppResult<Box<dyn Message>> + Send + Sync>;

/// Type id to decoder mapping.
///
/// Filled during setup and read-only afterwards; share it behind an `Arc`.
/// Registering an id twice keeps the first decoder.
#[derive(Default)]
pub struct Registry {
    decoders: HashMap<u32, Decoder>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.decoders.keys().collect();
        ids.sort();
        f.debug_struct("Registry").field("type_ids", &ids).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers `M` under the type id its default value reports.
    pub fn register<M>(&mut self) -> bool
    where
        M: Message + Encodable + Default + 'static,
    {
        let type_id = M::default().message_type();
        self.register_decoder(type_id, |unpack| {
            let msg = M::decode(unpack)?;
            Ok(Box::new(msg) as Box<dyn Message>)
        })
    }

    pub fn register_decoder<F>(&mut self, type_id: u32, decoder: F) -> bool
    where
        F: Fn(&mut Unpack<'_>) -> AppResult<Box<dyn Message>> + Send + Sync + 'static,
    {
        if self.decoders.contains_key(&type_id) {
            warn!("message type {} already registered, keeping the first", type_id);
            return false;
        }
        self.decoders.insert(type_id, Box::new(decoder));
        true
    }

    /// Registers a runtime-described message type.
    pub fn register_schema(&mut self, schema: Schema) -> bool {
        let schema = Arc::new(schema);
        let type_id = schema.type_id();
        self.register_decoder(type_id, move |unpack| {
            let msg = schema.decode_message(unpack)?;
            Ok(Box::new(msg) as Box<dyn Message>)
        })
    }

    pub fn contains(&self, type_id: u32) -> bool {
        self.decoders.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decodes one message, popping the header first unless that already
    /// happened.
    pub fn decode(&self, unpack: &mut Unpack<'_>) -> AppResult<Box<dyn Message>> {
        if unpack.header().is_none() {
            unpack.pop_header()?;
        }
        let type_id = unpack.type_id();
        let decoder = self
            .decoders
            .get(&type_id)
            .ok_or(AppError::UnregisteredType(type_id))?;
        decoder(unpack)
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns the message and the number of bytes it occupied, which is
    /// always the header's length. [`AppError::Incomplete`] means more bytes
    /// are needed; every other error means the stream cannot be resynced.
    pub fn decode_frame(&self, buf: &[u8]) -> AppResult<(Box<dyn Message>, usize)> {
        if buf.len() < HEADER_LENGTH {
            return Err(AppError::Incomplete);
        }
        let header = Header::peek(buf).ok_or(AppError::Incomplete)?;
        if !header.is_sane() {
            warn!(
                "invalid frame length {} for type {}",
                header.length, header.type_id
            );
            return Err(AppError::InvalidFrameLength {
                length: header.length,
                type_id: header.type_id,
            });
        }
        let length = header.length as usize;
        if buf.len() < length {
            trace!("frame incomplete: {} of {} bytes", buf.len(), length);
            return Err(AppError::Incomplete);
        }
        if !self.contains(header.type_id) {
            warn!("unregistered message type {}", header.type_id);
            return Err(AppError::UnregisteredType(header.type_id));
        }

        let mut unpack = Unpack::new(&buf[..length]);
        unpack.pop_header()?;
        let msg = self.decode(&mut unpack).map_err(|e| {
            warn!("decode message type {} failed: {}", header.type_id, e);
            e
        })?;
        if unpack.offset() != length {
            warn!(
                "message type {} consumed {} of {} bytes",
                header.type_id,
                unpack.offset(),
                length
            );
            return Err(AppError::LengthMismatch {
                consumed: unpack.offset(),
                declared: header.length,
            });
        }
        Ok((msg, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::dynamic::{FieldSpec, Shape, Value};
    use crate::protocol::{get_framed_bytes, DynamicMessage, MAX_FRAME_LENGTH};

    crate::wire_message! {
        #[message_type(1)]
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Ping {
            seq: u32,
            text: String,
        }
    }

    crate::wire_message! {
        #[message_type(3)]
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Short {
            a: u16,
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        assert!(registry.register::<Ping>());
        registry
    }

    fn ping() -> Ping {
        Ping {
            seq: 0x0102,
            text: "abcde".to_string(),
        }
    }

    #[test]
    fn test_register_keeps_first() {
        let mut registry = registry();
        assert!(!registry.register::<Ping>());
        assert!(!registry.register_decoder(1, |_| Err(AppError::Incomplete)));
        let frame = get_framed_bytes(&ping());
        assert!(registry.decode_frame(&frame).is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_end_to_end_frame() {
        let frame = get_framed_bytes(&ping());
        assert_eq!(
            &frame[..],
            &[
                21, 0, 0, 0, 1, 0, 0, 0, 200, 0, 2, 1, 0, 0, 5, 0, b'a', b'b', b'c', b'd', b'e'
            ][..]
        );
        let (msg, consumed) = registry().decode_frame(&frame).unwrap();
        assert_eq!(consumed, 21);
        assert_eq!(msg.downcast_ref::<Ping>(), Some(&ping()));
    }

    #[test]
    fn test_partial_frames_are_incomplete() {
        let registry = registry();
        let frame = get_framed_bytes(&ping());
        for cut in [0, 1, 9, 10, 11, frame.len() - 1] {
            assert!(
                matches!(registry.decode_frame(&frame[..cut]), Err(AppError::Incomplete)),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_trailing_bytes_are_left() {
        let registry = registry();
        let mut buf = get_framed_bytes(&ping()).to_vec();
        let first = buf.len();
        buf.extend_from_slice(&get_framed_bytes(&ping()));
        buf.extend_from_slice(&[1, 2, 3]);

        let (_, consumed) = registry.decode_frame(&buf).unwrap();
        assert_eq!(consumed, first);
        let (_, consumed) = registry.decode_frame(&buf[first..]).unwrap();
        assert_eq!(consumed, first);
        assert!(matches!(
            registry.decode_frame(&buf[2 * first..]),
            Err(AppError::Incomplete)
        ));
    }

    #[test]
    fn test_corrupt_length_is_fatal() {
        let registry = registry();
        let mut frame = get_framed_bytes(&ping()).to_vec();

        frame[0] = 54;
        match registry.decode_frame(&frame) {
            Err(AppError::Incomplete) => {}
            other => panic!("a longer declared length waits for more bytes: {:?}", other),
        }

        frame[0] = 3;
        assert!(matches!(
            registry.decode_frame(&frame),
            Err(AppError::InvalidFrameLength { length: 3, type_id: 1 })
        ));

        let over = (MAX_FRAME_LENGTH + 1).to_le_bytes();
        frame[..4].copy_from_slice(&over);
        assert!(matches!(
            registry.decode_frame(&frame),
            Err(AppError::InvalidFrameLength { .. })
        ));
    }

    #[test]
    fn test_declared_length_shorter_than_body_is_an_error() {
        let registry = registry();
        let mut frame = get_framed_bytes(&ping()).to_vec();
        // declared 17, the string no longer fits under the ceiling
        frame[0] = 17;
        assert!(matches!(
            registry.decode_frame(&frame),
            Err(AppError::Unpack { type_id: 1, .. })
        ));
    }

    #[test]
    fn test_unconsumed_body_is_a_length_mismatch() {
        let mut registry = registry();
        registry.register::<Short>();
        let mut frame = get_framed_bytes(&Short { a: 7 }).to_vec();
        frame.extend_from_slice(&[0, 0]);
        frame[0] = 14;
        assert!(matches!(
            registry.decode_frame(&frame),
            Err(AppError::LengthMismatch {
                consumed: 12,
                declared: 14
            })
        ));
    }

    #[test]
    fn test_decode_pops_missing_header() {
        let frame = get_framed_bytes(&ping());
        let mut up = Unpack::new(&frame);
        let msg = registry().decode(&mut up).unwrap();
        assert_eq!(msg.message_type(), 1);
        assert_eq!(up.offset(), frame.len());
    }

    #[test]
    fn test_unregistered_type() {
        let frame = get_framed_bytes(&Short { a: 1 });
        assert!(matches!(
            registry().decode_frame(&frame),
            Err(AppError::UnregisteredType(3))
        ));
    }

    #[test]
    fn test_header_only_frame() {
        let mut registry = Registry::new();
        registry.register_decoder(8, |_| Ok(Box::new(Short::default()) as Box<dyn Message>));
        let frame = [10, 0, 0, 0, 8, 0, 0, 0, 200, 0];
        let (_, consumed) = registry.decode_frame(&frame).unwrap();
        assert_eq!(consumed, 10);
    }

    #[test]
    fn test_schema_registration() {
        let mut registry = Registry::new();
        let schema = Schema::new(1)
            .field(FieldSpec::new("seq", Shape::U64).with_directive("u32"))
            .field(FieldSpec::new("text", Shape::Str));
        assert!(registry.register_schema(schema));

        let (msg, _) = registry.decode_frame(&get_framed_bytes(&ping())).unwrap();
        let msg = msg.downcast::<DynamicMessage>().unwrap();
        assert_eq!(msg.get("seq"), Some(&Value::UInt(0x0102)));
        assert_eq!(msg.get("text").and_then(Value::as_str), Some("abcde"));
    }
}
