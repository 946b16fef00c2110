//! Bencoding codec.
//!
//! Bencoding is the byte-level grammar used by `.torrent` files and tracker
//! responses: integers (`i<decimal>e`), byte-strings (`<len>:<bytes>`),
//! lists (`l<items>e`) and dictionaries (`d<key><value>...e`). This module
//! decodes bencoded bytes into a tagged [`BencodeValue`] tree and encodes
//! the reverse.
use std::collections::HashMap;
use thiserror::Error;

pub mod decoder;
pub mod encoder;

/// A decoded bencode value. Dictionary keys are raw bytes, not text, since
/// bencoded dictionaries make no charset guarantee.
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(HashMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&HashMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Errors raised while decoding or encoding a bencode value.
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Any malformed prefix: a missing terminator, a non-digit length, a bad
    /// type tag. `offset` is the byte position where decoding gave up.
    #[error("malformed bencoding at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot encode type: {0}")]
    CannotEncodeType(&'static str),
}

impl BencodeError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        BencodeError::Malformed {
            offset,
            reason: reason.into(),
        }
    }
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;

/// Decodes a single bencode value from `data`, ignoring any trailing bytes.
pub fn decode(data: &[u8]) -> BencodeResult<BencodeValue> {
    let mut cursor = decoder::Cursor::new(data);
    decoder::decode_value(&mut cursor)
}

/// Decodes a top-level bencoded dictionary, returning both the decoded
/// key/value pairs and the original `[start, end)` byte span each value
/// occupied in `data`. See [`decoder::decode_top_level_dict_with_spans`].
pub fn decode_top_level_dict_with_spans(
    data: &[u8],
) -> BencodeResult<(
    HashMap<Vec<u8>, BencodeValue>,
    HashMap<Vec<u8>, std::ops::Range<usize>>,
)> {
    decoder::decode_top_level_dict_with_spans(data)
}

/// Encodes `value` into its canonical bencoded form (dictionary entries in
/// ascending lexicographic order of their raw key bytes).
pub fn encode(value: &BencodeValue) -> BencodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    encoder::encode_value(&mut buf, value)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_dict() {
        let input = b"d3:cow3:moo4:spam4:eggse";
        let value = decode(input).unwrap();
        let encoded = encode(&value).unwrap();
        assert_eq!(encoded, input);
    }

    #[test]
    fn round_trip_nested_list() {
        let input = b"li42e3:fooe";
        let value = decode(input).unwrap();
        assert_eq!(
            value,
            BencodeValue::List(vec![
                BencodeValue::Integer(42),
                BencodeValue::String(b"foo".to_vec()),
            ])
        );
        assert_eq!(encode(&value).unwrap(), input);
    }

    #[test]
    fn decodes_negative_integer() {
        assert_eq!(decode(b"i-3e").unwrap(), BencodeValue::Integer(-3));
    }

    #[test]
    fn decodes_empty_string() {
        assert_eq!(decode(b"0:").unwrap(), BencodeValue::String(Vec::new()));
    }

    #[test]
    fn rejects_unterminated_integer() {
        assert!(decode(b"i1").is_err());
    }

    #[test]
    fn encodes_dict_keys_in_sorted_order() {
        let mut dict = HashMap::new();
        dict.insert(b"zebra".to_vec(), BencodeValue::Integer(1));
        dict.insert(b"apple".to_vec(), BencodeValue::Integer(2));
        let encoded = encode(&BencodeValue::Dict(dict)).unwrap();
        assert_eq!(encoded, b"d5:applei2e5:zebrai1ee");
    }
}
