use std::any::Any;
use std::fmt::Debug;

use bytes::Bytes;

use super::header::RES_SUCCESS;
use super::{Encodable, Pack, Unpack};
use crate::AppResult;

#[doc(hidden)]
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A frame body identified on the wire by its message type.
///
/// Most messages implement [`Encodable`] and forward `encode_body` to it;
/// the `wire_message!` macro writes both impls. Decoding goes through the
/// [`Registry`](super::Registry), which knows which concrete type to build
/// for a given type id.
pub trait Message: AsAny + Debug + Send + Sync {
    fn message_type(&self) -> u32;

    fn encode_body(&self, pack: &mut Pack);
}

impl dyn Message {
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast<T: Message>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}

/// Encodes `msg` into a complete frame with a success result code.
pub fn get_marshal_pack(msg: &dyn Message) -> Pack {
    get_marshal_pack_with_code(msg, RES_SUCCESS)
}

pub fn get_marshal_pack_with_code(msg: &dyn Message, res_code: u16) -> Pack {
    let mut pack = Pack::new();
    msg.encode_body(&mut pack);
    pack.put_header(msg.message_type(), res_code);
    pack
}

/// One-shot send preparation: body first, then the header patched in place.
pub fn get_framed_bytes(msg: &dyn Message) -> Bytes {
    get_marshal_pack(msg).freeze()
}

pub fn get_framed_bytes_with_code(msg: &dyn Message, res_code: u16) -> Bytes {
    get_marshal_pack_with_code(msg, res_code).freeze()
}

/// Body without a header, for carrying one message inside another.
pub fn marshal_body(msg: &dyn Message) -> Bytes {
    let mut pack = Pack::new();
    msg.encode_body(&mut pack);
    pack.freeze_body()
}

pub fn unmarshal_body<T: Encodable>(data: &[u8]) -> AppResult<T> {
    let mut unpack = Unpack::new(data);
    T::decode(&mut unpack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Header;

    #[derive(Debug, Default, PartialEq)]
    struct SimpleProto {
        i: u32,
        s: String,
    }

    impl Encodable for SimpleProto {
        fn encode(&self, pack: &mut Pack) {
            pack.put_u32(self.i);
            pack.put_short_str(&self.s);
        }

        fn decode(unpack: &mut Unpack<'_>) -> AppResult<Self> {
            Ok(SimpleProto {
                i: unpack.pop_u32()?,
                s: unpack.pop_short_str()?,
            })
        }
    }

    impl Message for SimpleProto {
        fn message_type(&self) -> u32 {
            1
        }

        fn encode_body(&self, pack: &mut Pack) {
            self.encode(pack);
        }
    }

    #[test]
    fn test_framed_bytes_header() {
        let msg = SimpleProto {
            i: 0x0102,
            s: "abcde".to_string(),
        };
        let frame = get_framed_bytes(&msg);
        let header = Header::peek(&frame).unwrap();
        assert_eq!(header.length as usize, frame.len());
        assert_eq!(header.type_id, 1);
        assert_eq!(header.res_code, RES_SUCCESS);

        let frame = get_framed_bytes_with_code(&msg, 404);
        assert_eq!(Header::peek(&frame).unwrap().res_code, 404);
    }

    #[test]
    fn test_marshal_body_round_trip() {
        let msg = SimpleProto {
            i: 1234,
            s: "abcdefg123456789".to_string(),
        };
        let body = marshal_body(&msg);
        let decoded: SimpleProto = unmarshal_body(&body).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_downcast() {
        let msg: Box<dyn Message> = Box::new(SimpleProto::default());
        assert!(msg.is::<SimpleProto>());
        assert!(msg.downcast_ref::<SimpleProto>().is_some());
        let concrete = msg.downcast::<SimpleProto>().unwrap();
        assert_eq!(*concrete, SimpleProto::default());
    }
}
