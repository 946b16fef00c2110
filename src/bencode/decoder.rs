//! Recursive-descent bencode decoder.
//!
//! Works over a byte slice rather than a generic `Read` so that callers can
//! recover the exact `[start, end)` span a nested value occupied in the
//! original buffer — needed by `torrent::metainfo` to hash the `info`
//! dictionary's original bytes rather than a re-encoded copy.
use super::{BencodeError, BencodeResult, BencodeValue};
use std::collections::HashMap;
use tracing::instrument;

/// A read-only cursor over a byte slice, tracking the current offset.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> BencodeResult<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| BencodeError::malformed(self.pos, "unexpected end of input"))
    }

    fn advance(&mut self) -> BencodeResult<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> BencodeResult<&'a [u8]> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(BencodeError::malformed(self.pos, "unexpected end of input"));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_until(&mut self, delimiter: u8) -> BencodeResult<&'a [u8]> {
        let start = self.pos;
        loop {
            let byte = self.peek()?;
            if byte == delimiter {
                let slice = &self.data[start..self.pos];
                self.pos += 1;
                return Ok(slice);
            }
            self.pos += 1;
        }
    }
}

/// Decodes a bencode byte-string (`<len>:<bytes>`).
#[instrument(skip(cursor), level = "trace")]
pub fn decode_string(cursor: &mut Cursor) -> BencodeResult<Vec<u8>> {
    let start = cursor.position();
    let digits = cursor.read_until(b':')?;
    let length_str = std::str::from_utf8(digits)
        .map_err(|_| BencodeError::malformed(start, "string length is not UTF-8"))?;
    let length: usize = length_str
        .parse()
        .map_err(|_| BencodeError::malformed(start, "invalid string length"))?;
    Ok(cursor.take(length)?.to_vec())
}

/// Decodes a bencode integer (`i<decimal>e`).
#[instrument(skip(cursor), level = "trace")]
pub fn decode_integer(cursor: &mut Cursor) -> BencodeResult<i64> {
    let start = cursor.position();
    let tag = cursor.advance()?;
    if tag != b'i' {
        return Err(BencodeError::malformed(start, "integer must start with 'i'"));
    }

    let digits = cursor.read_until(b'e')?;
    let num_str = std::str::from_utf8(digits)
        .map_err(|_| BencodeError::malformed(start, "integer is not UTF-8"))?;

    if num_str.is_empty() {
        return Err(BencodeError::malformed(start, "empty integer"));
    }
    if num_str == "-0" {
        return Err(BencodeError::malformed(start, "'-0' is not a valid integer"));
    }
    if num_str.len() > 1 && num_str.starts_with('0') {
        return Err(BencodeError::malformed(start, "leading zero in integer"));
    }
    if num_str.len() > 1 && num_str.starts_with("-0") {
        return Err(BencodeError::malformed(start, "leading zero in integer"));
    }

    num_str
        .parse::<i64>()
        .map_err(|_| BencodeError::malformed(start, "invalid integer"))
}

/// Decodes a bencode list (`l<items>e`).
#[instrument(skip(cursor), level = "trace")]
fn decode_list(cursor: &mut Cursor) -> BencodeResult<Vec<BencodeValue>> {
    let start = cursor.position();
    if cursor.advance()? != b'l' {
        return Err(BencodeError::malformed(start, "list must start with 'l'"));
    }

    let mut list = Vec::new();
    loop {
        if cursor.peek()? == b'e' {
            cursor.advance()?;
            return Ok(list);
        }
        list.push(decode_value(cursor)?);
    }
}

/// Decodes a bencode dictionary (`d<key><value>...e`). Keys must be
/// byte-strings; original key order is not preserved (callers that need
/// the original byte span of a nested dictionary should use
/// [`super::decode_with_span`] before descending into it).
#[instrument(skip(cursor), level = "trace")]
fn decode_dict(cursor: &mut Cursor) -> BencodeResult<HashMap<Vec<u8>, BencodeValue>> {
    let start = cursor.position();
    if cursor.advance()? != b'd' {
        return Err(BencodeError::malformed(start, "dict must start with 'd'"));
    }

    let mut dict = HashMap::new();
    loop {
        if cursor.peek()? == b'e' {
            cursor.advance()?;
            return Ok(dict);
        }
        let key = decode_string(cursor)?;
        let value = decode_value(cursor)?;
        dict.insert(key, value);
    }
}

/// Decodes the next bencode value at the cursor's current position,
/// dispatching on the leading type tag.
#[instrument(skip(cursor), level = "trace")]
pub fn decode_value(cursor: &mut Cursor) -> BencodeResult<BencodeValue> {
    match cursor.peek()? {
        b'0'..=b'9' => decode_string(cursor).map(BencodeValue::String),
        b'i' => decode_integer(cursor).map(BencodeValue::Integer),
        b'l' => decode_list(cursor).map(BencodeValue::List),
        b'd' => decode_dict(cursor).map(BencodeValue::Dict),
        other => Err(BencodeError::malformed(
            cursor.position(),
            format!("unexpected byte 0x{other:02x}"),
        )),
    }
}

/// Decodes a top-level dictionary, additionally returning the `[start, end)`
/// byte span each value occupied in `data`. Metainfo parsing uses this to
/// recover the original bytes of the `info` value for the info-hash
/// invariant (§4.1): hashing a re-encoded copy of `info` is only guaranteed
/// to match the original when the source dictionary's keys were already in
/// canonical sorted order, which real-world `.torrent` files don't always
/// honor.
#[instrument(skip(data), level = "debug")]
pub fn decode_top_level_dict_with_spans(
    data: &[u8],
) -> BencodeResult<(
    HashMap<Vec<u8>, BencodeValue>,
    HashMap<Vec<u8>, std::ops::Range<usize>>,
)> {
    let mut cursor = Cursor::new(data);
    let start = cursor.position();
    if cursor.advance()? != b'd' {
        return Err(BencodeError::malformed(start, "dict must start with 'd'"));
    }

    let mut dict = HashMap::new();
    let mut spans = HashMap::new();
    loop {
        if cursor.peek()? == b'e' {
            cursor.advance()?;
            return Ok((dict, spans));
        }
        let key = decode_string(&mut cursor)?;
        let value_start = cursor.position();
        let value = decode_value(&mut cursor)?;
        let value_end = cursor.position();
        spans.insert(key.clone(), value_start..value_end);
        dict.insert(key, value);
    }
}
