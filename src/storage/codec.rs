//! Key and value codecs.
//!
//! Keys are compared as raw bytes by both access methods, so every [`KeyCodec`] must produce
//! an encoding whose lexicographic order matches the natural order of the type.

use crate::types::{Result, StoreError};

/// Trait implemented by key types that can be stored in an index.
pub trait KeyCodec: Sized {
    /// Type identity recorded in the heading page.
    const TYPE_TAG: &'static str;

    /// Encode `key` into `out` using the order-preserving representation.
    fn encode_key(key: &Self, out: &mut Vec<u8>);

    /// Decode a key from its encoded representation.
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Trait implemented by value types persisted as blobs.
pub trait ValCodec: Sized {
    /// Type identity recorded in the heading page.
    const TYPE_TAG: &'static str;

    /// Encode `value` into `out`.
    fn encode_val(value: &Self, out: &mut Vec<u8>);

    /// Decode a value from `src`.
    fn decode_val(src: &[u8]) -> Result<Self>;
}

/// Encodes a key into a fresh buffer.
pub fn key_bytes<K: KeyCodec>(key: &K) -> Vec<u8> {
    let mut out = Vec::new();
    K::encode_key(key, &mut out);
    out
}

/// Encodes a value into a fresh buffer.
pub fn val_bytes<V: ValCodec>(value: &V) -> Vec<u8> {
    let mut out = Vec::new();
    V::encode_val(value, &mut out);
    out
}

fn fixed<const N: usize>(bytes: &[u8], what: &'static str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| StoreError::Codec(format!("{what} expects {N} bytes, got {}", bytes.len())))
}

macro_rules! unsigned_codec {
    ($($ty:ty => $tag:literal),* $(,)?) => {$(
        impl KeyCodec for $ty {
            const TYPE_TAG: &'static str = $tag;

            fn encode_key(key: &Self, out: &mut Vec<u8>) {
                out.extend_from_slice(&key.to_be_bytes());
            }

            fn decode_key(bytes: &[u8]) -> Result<Self> {
                Ok(<$ty>::from_be_bytes(fixed(bytes, $tag)?))
            }
        }

        impl ValCodec for $ty {
            const TYPE_TAG: &'static str = $tag;

            fn encode_val(value: &Self, out: &mut Vec<u8>) {
                out.extend_from_slice(&value.to_be_bytes());
            }

            fn decode_val(src: &[u8]) -> Result<Self> {
                Ok(<$ty>::from_be_bytes(fixed(src, $tag)?))
            }
        }
    )*};
}

// Signed keys flip the sign bit so negative values sort before positive ones.
macro_rules! signed_codec {
    ($($ty:ty => $uty:ty, $tag:literal),* $(,)?) => {$(
        impl KeyCodec for $ty {
            const TYPE_TAG: &'static str = $tag;

            fn encode_key(key: &Self, out: &mut Vec<u8>) {
                let flipped = (*key as $uty) ^ (1 << (<$uty>::BITS - 1));
                out.extend_from_slice(&flipped.to_be_bytes());
            }

            fn decode_key(bytes: &[u8]) -> Result<Self> {
                let raw = <$uty>::from_be_bytes(fixed(bytes, $tag)?);
                Ok((raw ^ (1 << (<$uty>::BITS - 1))) as $ty)
            }
        }

        impl ValCodec for $ty {
            const TYPE_TAG: &'static str = $tag;

            fn encode_val(value: &Self, out: &mut Vec<u8>) {
                out.extend_from_slice(&value.to_be_bytes());
            }

            fn decode_val(src: &[u8]) -> Result<Self> {
                Ok(<$ty>::from_be_bytes(fixed(src, $tag)?))
            }
        }
    )*};
}

unsigned_codec!(u8 => "u8", u16 => "u16", u32 => "u32", u64 => "u64");
signed_codec!(i8 => u8, "i8", i16 => u16, "i16", i32 => u32, "i32", i64 => u64, "i64");

impl KeyCodec for String {
    const TYPE_TAG: &'static str = "string";

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key.as_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|err| StoreError::Codec(err.to_string()))
    }
}

impl ValCodec for String {
    const TYPE_TAG: &'static str = "string";

    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value.as_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        String::from_utf8(src.to_vec()).map_err(|err| StoreError::Codec(err.to_string()))
    }
}

impl KeyCodec for Vec<u8> {
    const TYPE_TAG: &'static str = "bytes";

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl ValCodec for Vec<u8> {
    const TYPE_TAG: &'static str = "bytes";

    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(src.to_vec())
    }
}
