//! Bencode encoder. Mirrors the decoder's grammar in reverse; dictionaries
//! are always emitted with keys in ascending lexicographic order so that
//! encoding is a fixed point for conformant (already-sorted) input.
use super::{BencodeResult, BencodeValue};
use std::collections::HashMap;
use std::io::Write;
use tracing::instrument;

#[instrument(skip(writer, s), level = "trace")]
fn encode_string<W: Write>(writer: &mut W, s: &[u8]) -> BencodeResult<()> {
    write!(writer, "{}:", s.len())?;
    writer.write_all(s)?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_integer<W: Write>(writer: &mut W, i: i64) -> BencodeResult<()> {
    write!(writer, "i{i}e")?;
    Ok(())
}

#[instrument(skip(writer, list), level = "trace")]
fn encode_list<W: Write>(writer: &mut W, list: &[BencodeValue]) -> BencodeResult<()> {
    writer.write_all(b"l")?;
    for item in list {
        encode_value(writer, item)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

#[instrument(skip(writer, dict), level = "trace")]
fn encode_dict<W: Write>(
    writer: &mut W,
    dict: &HashMap<Vec<u8>, BencodeValue>,
) -> BencodeResult<()> {
    writer.write_all(b"d")?;
    let mut keys: Vec<&Vec<u8>> = dict.keys().collect();
    keys.sort_unstable();
    for key in keys {
        encode_string(writer, key)?;
        encode_value(writer, &dict[key])?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
pub(super) fn encode_value<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    match value {
        BencodeValue::String(s) => encode_string(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(list) => encode_list(writer, list),
        BencodeValue::Dict(dict) => encode_dict(writer, dict),
    }
}
