use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use bytes::Bytes;

use super::{Pack, Unpack};
use crate::AppResult;

/// A value with a wire representation.
///
/// Everything a message body is built from implements this: the unsigned
/// integers, `bool`, `String` (u16 length prefix), `Bytes` (u16 length
/// prefix), and the composites `Vec<T>`, `HashMap<K, V>` and `BTreeMap<K, V>`
/// (u32 count followed by the elements or `(key, value)` pairs).
///
/// `Vec<u8>` is a sequence of `u8`, not a byte string; use `Bytes` for the
/// latter.
pub trait Encodable {
    fn encode(&self, pack: &mut Pack);

    fn decode(unpack: &mut Unpack<'_>) -> AppResult<Self>
    where
        Self: Sized;
}

/// Values that can also be framed with a u32 length prefix.
pub trait LongEncodable {
    fn encode_long(&self, pack: &mut Pack);

    fn decode_long(unpack: &mut Unpack<'_>) -> AppResult<Self>
    where
        Self: Sized;
}

macro_rules! implement_encodable {
    ($type:ty, $put:ident, $pop:ident) => {
        impl Encodable for $type {
            fn encode(&self, pack: &mut Pack) {
                pack.$put(*self);
            }

            fn decode(unpack: &mut Unpack<'_>) -> AppResult<Self> {
                unpack.$pop()
            }
        }
    };
}

implement_encodable!(bool, put_bool, pop_bool);
implement_encodable!(u8, put_u8, pop_u8);
implement_encodable!(u16, put_u16, pop_u16);
implement_encodable!(u32, put_u32, pop_u32);
implement_encodable!(u64, put_u64, pop_u64);

impl Encodable for String {
    fn encode(&self, pack: &mut Pack) {
        pack.put_short_str(self);
    }

    fn decode(unpack: &mut Unpack<'_>) -> AppResult<Self> {
        unpack.pop_short_str()
    }
}

impl LongEncodable for String {
    fn encode_long(&self, pack: &mut Pack) {
        pack.put_long_str(self);
    }

    fn decode_long(unpack: &mut Unpack<'_>) -> AppResult<Self> {
        unpack.pop_long_str()
    }
}

impl Encodable for Bytes {
    fn encode(&self, pack: &mut Pack) {
        pack.put_short_bytes(self);
    }

    fn decode(unpack: &mut Unpack<'_>) -> AppResult<Self> {
        unpack.pop_short_bytes().map(Bytes::copy_from_slice)
    }
}

impl LongEncodable for Bytes {
    fn encode_long(&self, pack: &mut Pack) {
        pack.put_long_bytes(self);
    }

    fn decode_long(unpack: &mut Unpack<'_>) -> AppResult<Self> {
        unpack.pop_long_bytes().map(Bytes::copy_from_slice)
    }
}

impl<T: Encodable> Encodable for Box<T> {
    fn encode(&self, pack: &mut Pack) {
        (**self).encode(pack);
    }

    fn decode(unpack: &mut Unpack<'_>) -> AppResult<Self> {
        T::decode(unpack).map(Box::new)
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode(&self, pack: &mut Pack) {
        pack.put_count(self.len());
        for item in self {
            item.encode(pack);
        }
    }

    fn decode(unpack: &mut Unpack<'_>) -> AppResult<Self> {
        let count = unpack.pop_count()?;
        let mut items = Vec::with_capacity(unpack.capacity_hint::<T>(count));
        for _ in 0..count {
            items.push(T::decode(unpack)?);
        }
        Ok(items)
    }
}

// Map iteration order is not part of the wire contract. Decoders must not
// rely on it and two encodes of an equal HashMap may differ byte for byte.
impl<K, V> Encodable for HashMap<K, V>
where
    K: Encodable + Eq + Hash,
    V: Encodable,
{
    fn encode(&self, pack: &mut Pack) {
        pack.put_count(self.len());
        for (key, value) in self {
            key.encode(pack);
            value.encode(pack);
        }
    }

    fn decode(unpack: &mut Unpack<'_>) -> AppResult<Self> {
        let count = unpack.pop_count()?;
        let mut map = HashMap::with_capacity(unpack.capacity_hint::<(K, V)>(count));
        for _ in 0..count {
            let key = K::decode(unpack)?;
            let value = V::decode(unpack)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<K, V> Encodable for BTreeMap<K, V>
where
    K: Encodable + Ord,
    V: Encodable,
{
    fn encode(&self, pack: &mut Pack) {
        pack.put_count(self.len());
        for (key, value) in self {
            key.encode(pack);
            value.encode(pack);
        }
    }

    fn decode(unpack: &mut Unpack<'_>) -> AppResult<Self> {
        let count = unpack.pop_count()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = K::decode(unpack)?;
            let value = V::decode(unpack)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppError;

    fn round_trip<T: Encodable>(value: &T) -> (T, usize) {
        let mut pack = Pack::new();
        value.encode(&mut pack);
        let mut up = Unpack::new(pack.body_bytes());
        let decoded = T::decode(&mut up).unwrap();
        assert_eq!(up.remaining(), 0);
        (decoded, pack.body_bytes().len())
    }

    #[test]
    fn test_sequence_layout() {
        let mut pack = Pack::new();
        vec![1u16, 2u16].encode(&mut pack);
        assert_eq!(pack.body_bytes(), &[2, 0, 0, 0, 1, 0, 2, 0]);
    }

    #[test]
    fn test_vec_u8_is_a_sequence_and_bytes_is_a_string() {
        let mut pack = Pack::new();
        vec![7u8].encode(&mut pack);
        Bytes::from_static(&[7]).encode(&mut pack);
        assert_eq!(pack.body_bytes(), &[1, 0, 0, 0, 7, 1, 0, 7]);
    }

    #[test]
    fn test_nested_composites() {
        let mut value: HashMap<u32, Vec<String>> = HashMap::new();
        value.insert(1, vec!["a".to_string(), "bc".to_string()]);
        value.insert(2, Vec::new());
        let (decoded, size) = round_trip(&value);
        assert_eq!(decoded, value);
        // count + (key + count + "a" + "bc") + (key + count)
        assert_eq!(size, 4 + (4 + 4 + 3 + 4) + (4 + 4));
    }

    #[test]
    fn test_btree_map_and_box() {
        let mut value = BTreeMap::new();
        value.insert(3u64, Box::new(true));
        value.insert(1u64, Box::new(false));
        let (decoded, _) = round_trip(&value);
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_long_encodable() {
        let mut pack = Pack::new();
        "xy".to_string().encode_long(&mut pack);
        Bytes::from_static(b"z").encode_long(&mut pack);
        assert_eq!(pack.body_bytes(), &[2, 0, 0, 0, b'x', b'y', 1, 0, 0, 0, b'z']);

        let mut up = Unpack::new(pack.body_bytes());
        assert_eq!(String::decode_long(&mut up).unwrap(), "xy");
        assert_eq!(Bytes::decode_long(&mut up).unwrap(), Bytes::from_static(b"z"));
    }

    #[test]
    fn test_truncated_sequence_is_an_error() {
        let buf = [3, 0, 0, 0, 1, 0];
        let mut up = Unpack::new(&buf);
        assert!(matches!(
            Vec::<u16>::decode(&mut up),
            Err(AppError::Unpack { .. })
        ));
    }
}
