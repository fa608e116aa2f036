//! Wire framing for the RPC runtime core: the fixed 16-byte header, TLV
//! extensions, and the combined `Frame` type.
//!
//! All multi-byte integers on the wire are big-endian. See [`Header`] and
//! [`Tlv`] for the exact layouts.

mod error;
mod frame;
mod header;
mod msg_type;
mod tlv;

pub use error::FrameError;
pub use frame::Frame;
pub use header::{Header, HEADER_LEN};
pub use msg_type::{MsgType, StatusCode};
pub use tlv::{decode_tlvs, method_name_from_tlvs, Tlv, METHOD_NAME_MAX, TLV_TYPE_METHOD_NAME};
