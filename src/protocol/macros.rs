/// Declares a struct together with its field-by-field wire codec.
///
/// Fields are encoded in declaration order using their [`Encodable`] impl.
/// A `#[wire(..)]` directive changes that for one field:
///
/// - `u8`, `u16`, `u32`, `u64`: frame an integer field with that width
/// - `str`: u16 length prefix (the default for `String` and `Bytes`)
/// - `str32`: u32 length prefix, through [`LongEncodable`]
/// - `skip`: not on the wire, decodes to `Default::default()`
///
/// Any other directive fails to compile. With a leading
/// `#[message_type(..)]` the struct also implements [`Message`] and can be
/// registered and sent on its own; without it the struct is only usable as
/// a nested field.
///
/// ```ignore
/// wire_message! {
///     #[message_type(2)]
///     #[derive(Debug, Default, Clone, PartialEq)]
///     pub struct Login {
///         pub uid: u64,
///         #[wire(u8)]
///         pub platform: u32,
///         #[wire(str32)]
///         pub token: String,
///     }
/// }
/// ```
///
/// [`Encodable`]: crate::Encodable
/// [`LongEncodable`]: crate::LongEncodable
/// [`Message`]: crate::Message
#[macro_export]
macro_rules! wire_message {
    (
        #[message_type($type_id:expr)]
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[doc = $doc:expr])*
                $(#[wire($directive:ident)])?
                $field_vis:vis $field:ident : $field_ty:ty
            ),* $(,)?
        }
    ) => {
        $crate::wire_message! {
            $(#[$meta])*
            $vis struct $name {
                $(
                    $(#[doc = $doc])*
                    $(#[wire($directive)])?
                    $field_vis $field : $field_ty
                ),*
            }
        }

        impl $crate::Message for $name {
            fn message_type(&self) -> u32 {
                $type_id
            }

            fn encode_body(&self, pack: &mut $crate::Pack) {
                $crate::Encodable::encode(self, pack);
            }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[doc = $doc:expr])*
                $(#[wire($directive:ident)])?
                $field_vis:vis $field:ident : $field_ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[doc = $doc])*
                $field_vis $field : $field_ty,
            )*
        }

        impl $crate::Encodable for $name {
            #[allow(unused_variables)]
            fn encode(&self, pack: &mut $crate::Pack) {
                $( $crate::__wire_put!(pack, self.$field, $($directive)?); )*
            }

            #[allow(unused_variables)]
            fn decode(unpack: &mut $crate::Unpack<'_>) -> $crate::AppResult<Self> {
                Ok($name {
                    $( $field: $crate::__wire_pop!(unpack, $field_ty, $($directive)?), )*
                })
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __wire_put {
    ($pack:ident, $value:expr, ) => {
        $crate::Encodable::encode(&$value, $pack)
    };
    ($pack:ident, $value:expr, skip) => {};
    ($pack:ident, $value:expr, u8) => {
        $pack.put_u8($value as u8)
    };
    ($pack:ident, $value:expr, u16) => {
        $pack.put_u16($value as u16)
    };
    ($pack:ident, $value:expr, u32) => {
        $pack.put_u32($value as u32)
    };
    ($pack:ident, $value:expr, u64) => {
        $pack.put_u64($value as u64)
    };
    ($pack:ident, $value:expr, str) => {
        $crate::Encodable::encode(&$value, $pack)
    };
    ($pack:ident, $value:expr, str32) => {
        $crate::LongEncodable::encode_long(&$value, $pack)
    };
    ($pack:ident, $value:expr, $other:ident) => {
        compile_error!(concat!("unsupported wire directive `", stringify!($other), "`"))
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __wire_pop {
    ($unpack:ident, $ty:ty, ) => {
        <$ty as $crate::Encodable>::decode($unpack)?
    };
    ($unpack:ident, $ty:ty, skip) => {
        <$ty as ::std::default::Default>::default()
    };
    ($unpack:ident, $ty:ty, u8) => {
        $unpack.pop_u8()? as $ty
    };
    ($unpack:ident, $ty:ty, u16) => {
        $unpack.pop_u16()? as $ty
    };
    ($unpack:ident, $ty:ty, u32) => {
        $unpack.pop_u32()? as $ty
    };
    ($unpack:ident, $ty:ty, u64) => {
        $unpack.pop_u64()? as $ty
    };
    ($unpack:ident, $ty:ty, str) => {
        <$ty as $crate::Encodable>::decode($unpack)?
    };
    ($unpack:ident, $ty:ty, str32) => {
        <$ty as $crate::LongEncodable>::decode_long($unpack)?
    };
    ($unpack:ident, $ty:ty, $other:ident) => {
        compile_error!(concat!("unsupported wire directive `", stringify!($other), "`"))
    };
}
