//! Frame codec.
//!
//! Every frame is a fixed ten byte [`Header`] followed by a body, all
//! little-endian:
//!
//! ```text
//! offset 0:  u32 length     (whole frame, header included)
//! offset 4:  u32 type id
//! offset 8:  u16 result code
//! offset 10: body
//! ```
//!
//! Bodies are written with [`Pack`] and read with [`Unpack`]. Types describe
//! their own layout through [`Encodable`]; those that travel as a whole frame
//! also implement [`Message`]. The [`Registry`] maps a type id back to a
//! decoder, and [`DynamicMessage`] covers layouts only known at runtime.

pub use dynamic::{Directive, DynamicMessage, FieldSpec, Schema, Shape, Value};
pub use encodable::{Encodable, LongEncodable};
pub use header::{Header, HEADER_LENGTH, MAX_FRAME_LENGTH, RES_SUCCESS};
pub use message::{
    get_framed_bytes, get_framed_bytes_with_code, get_marshal_pack, get_marshal_pack_with_code,
    marshal_body, unmarshal_body, Message,
};
pub use pack::Pack;
pub use registry::{Decoder, Registry};
pub use unpack::Unpack;

mod dynamic;
mod encodable;
mod header;
mod macros;
mod message;
mod pack;
mod registry;
mod unpack;
