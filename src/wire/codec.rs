//! Primitive field readers and writers.
//!
//! Every reader loops until the requested number of bytes has arrived (via
//! [`Read::read_exact`]), so a source that hands out a few bytes per call decodes exactly
//! like an in-memory buffer. Short input always surfaces as
//! [`CodecError::TruncatedInput`].
use std::io::{BufRead, Read, Write};

use bson::Document;

use super::{CodecError, frame::MAX_MESSAGE_SIZE};

/// Smallest possible BSON document: length prefix plus the trailing null.
const MIN_DOCUMENT_SIZE: usize = 5;

fn truncated(what: &'static str) -> impl Fn(std::io::Error) -> CodecError {
    move |e| match CodecError::from(e) {
        CodecError::TruncatedInput(_) => CodecError::TruncatedInput(what),
        other => other,
    }
}

pub fn read_i32<R: Read>(source: &mut R) -> Result<i32, CodecError> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf).map_err(truncated("int32"))?;
    Ok(i32::from_le_bytes(buf))
}

pub fn read_u32<R: Read>(source: &mut R) -> Result<u32, CodecError> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf).map_err(truncated("uint32"))?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_i64<R: Read>(source: &mut R) -> Result<i64, CodecError> {
    let mut buf = [0u8; 8];
    source.read_exact(&mut buf).map_err(truncated("int64"))?;
    Ok(i64::from_le_bytes(buf))
}

/// Reads bytes up to and including a null terminator and returns them, terminator
/// excluded, as a string.
pub fn read_cstring<R: Read>(source: &mut R) -> Result<String, CodecError> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        source.read_exact(&mut byte).map_err(truncated("string"))?;
        if byte[0] == 0 {
            break;
        }
        out.push(byte[0]);
    }

    Ok(String::from_utf8(out)?)
}

/// Reads one length-prefixed document.
pub fn read_document<R: Read>(source: &mut R) -> Result<Document, CodecError> {
    let length = read_u32(source).map_err(|e| match e {
        CodecError::TruncatedInput(_) => CodecError::TruncatedInput("document length"),
        other => other,
    })? as usize;

    if !(MIN_DOCUMENT_SIZE..=MAX_MESSAGE_SIZE).contains(&length) {
        return Err(CodecError::DocumentLength(length as i64));
    }

    // The length counts its own four bytes, and the decoder wants them back.
    let mut raw = vec![0u8; length];
    raw[..4].copy_from_slice(&(length as u32).to_le_bytes());
    source
        .read_exact(&mut raw[4..])
        .map_err(truncated("document"))?;

    Ok(Document::from_reader(&mut raw.as_slice())?)
}

/// True if `source` has at least one more byte to offer.
pub fn has_remaining<R: BufRead>(source: &mut R) -> Result<bool, CodecError> {
    Ok(!source.fill_buf()?.is_empty())
}

pub fn write_i32<W: Write>(sink: &mut W, value: i32) -> Result<usize, CodecError> {
    sink.write_all(&value.to_le_bytes())?;
    Ok(4)
}

pub fn write_u32<W: Write>(sink: &mut W, value: u32) -> Result<usize, CodecError> {
    sink.write_all(&value.to_le_bytes())?;
    Ok(4)
}

pub fn write_i64<W: Write>(sink: &mut W, value: i64) -> Result<usize, CodecError> {
    sink.write_all(&value.to_le_bytes())?;
    Ok(8)
}

pub fn write_cstring<W: Write>(sink: &mut W, value: &str) -> Result<usize, CodecError> {
    sink.write_all(value.as_bytes())?;
    sink.write_all(&[0])?;
    Ok(value.len() + 1)
}

/// Encodes `doc` and writes the raw bytes, returning how many were written.
pub fn write_document<W: Write>(sink: &mut W, doc: &Document) -> Result<usize, CodecError> {
    let raw = encode_document(doc)?;
    sink.write_all(&raw)?;
    Ok(raw.len())
}

pub fn encode_document(doc: &Document) -> Result<Vec<u8>, CodecError> {
    let mut raw = Vec::new();
    doc.to_writer(&mut raw)?;
    Ok(raw)
}

/// Encoded length of `doc` in bytes.
pub fn document_size(doc: &Document) -> Result<usize, CodecError> {
    Ok(encode_document(doc)?.len())
}

pub fn cstring_size(value: &str) -> usize {
    value.len() + 1
}
