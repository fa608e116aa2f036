use std::fmt;

use serde::{de::DeserializeOwned, Serialize};

/// Wire-stable tag for which codec packed a body. Not part of the frame
/// header; carried alongside a service descriptor so mixed-codec
/// deployments can still interoperate (unused by the default single-codec
/// setup, but kept because the source this is grounded on treats it as
/// part of the public contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Encoding {
    Postcard = 1,
    Json = 2,
    Raw = 3,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Postcard => write!(f, "postcard"),
            Encoding::Json => write!(f, "json"),
            Encoding::Raw => write!(f, "raw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownEncoding(pub u16);

impl fmt::Display for UnknownEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown encoding tag {}", self.0)
    }
}

impl std::error::Error for UnknownEncoding {}

impl TryFrom<u16> for Encoding {
    type Error = UnknownEncoding;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Encoding::Postcard),
            2 => Ok(Encoding::Json),
            3 => Ok(Encoding::Raw),
            other => Err(UnknownEncoding(other)),
        }
    }
}

impl From<Encoding> for u16 {
    fn from(e: Encoding) -> Self {
        e as u16
    }
}

/// The opaque `pack(msg) -> bytes` / `unpack(bytes) -> msg` capability the
/// design treats as an external collaborator. Body bytes never have a
/// meaning to the frame codec or transport layer beyond their length.
pub trait Codec: Send + Sync + 'static {
    const ENCODING: Encoding;
    type EncodeError: std::error::Error + Send + Sync + 'static;
    type DecodeError: std::error::Error + Send + Sync + 'static;

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Self::EncodeError>;
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Self::DecodeError>;
}

pub struct PostcardCodec;

impl Codec for PostcardCodec {
    const ENCODING: Encoding = Encoding::Postcard;
    type EncodeError = postcard::Error;
    type DecodeError = postcard::Error;

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Self::EncodeError> {
        postcard::to_allocvec(value)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Self::DecodeError> {
        postcard::from_bytes(bytes)
    }
}

pub struct JsonCodec;

impl Codec for JsonCodec {
    const ENCODING: Encoding = Encoding::Json;
    type EncodeError = serde_json::Error;
    type DecodeError = serde_json::Error;

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Self::EncodeError> {
        serde_json::to_vec(value)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Self::DecodeError> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCodecError;

impl fmt::Display for RawCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawCodec only supports byte-vector passthrough, not generic (de)serialization")
    }
}

impl std::error::Error for RawCodecError {}

/// Passthrough codec for callers who already have raw bytes and don't want
/// a serde round-trip; `Codec::encode`/`decode` intentionally fail so
/// misuse through the generic seam is caught instead of silently
/// corrupting data.
pub struct RawCodec;

impl RawCodec {
    pub fn to_bytes(value: &[u8]) -> Vec<u8> {
        value.to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
}

impl Codec for RawCodec {
    const ENCODING: Encoding = Encoding::Raw;
    type EncodeError = RawCodecError;
    type DecodeError = RawCodecError;

    fn encode<T: Serialize>(_value: &T) -> Result<Vec<u8>, Self::EncodeError> {
        Err(RawCodecError)
    }

    fn decode<T: DeserializeOwned>(_bytes: &[u8]) -> Result<T, Self::DecodeError> {
        Err(RawCodecError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
        note: String,
    }

    #[test]
    fn postcard_round_trip() {
        let v = Ping { seq: 7, note: "hi".into() };
        let bytes = PostcardCodec::encode(&v).unwrap();
        let back: Ping = PostcardCodec::decode(&bytes).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn json_round_trip() {
        let v = Ping { seq: 7, note: "hi".into() };
        let bytes = JsonCodec::encode(&v).unwrap();
        let back: Ping = JsonCodec::decode(&bytes).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn raw_codec_rejects_generic_encode() {
        let v = Ping { seq: 1, note: String::new() };
        assert!(RawCodec::encode(&v).is_err());
    }

    #[test]
    fn encoding_tag_round_trips() {
        for e in [Encoding::Postcard, Encoding::Json, Encoding::Raw] {
            let tag: u16 = e.into();
            assert_eq!(Encoding::try_from(tag).unwrap(), e);
        }
        assert!(Encoding::try_from(99).is_err());
    }
}
