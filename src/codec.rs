//! MessagePack encoding of [`Value`]s.
//!
//! A log is the plain concatenation of encoded values: no header, no framing,
//! no separators. The format is self-describing, so a byte stream is split
//! back into values by decoding one value at a time. Any prefix of a log that
//! ends on a value boundary is itself a valid log.
//!
//! Decoding distinguishes two failure modes:
//!
//! * the input ends in the middle of a value: decoding stops, the complete
//!   values are returned and the trailing bytes are kept for a later attempt;
//! * the input is malformed: a [`DecodeError`] names the byte offset. Bytes
//!   are never skipped to resynchronize.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::{DecodeError, DecodeErrorKind, Result};
use crate::value::{Float, Integer, Value};

/// Maximum nesting of arrays and maps accepted by the decoder.
pub const MAX_DEPTH: usize = 512;

/// Chunk size used by [`LogReader`] when reading a finished file.
pub const READ_CHUNK_SIZE: usize = 100_000;

/// Encodes a value into a fresh buffer.
///
/// # Panics
///
/// Panics if a string, byte sequence, array or map holds more than
/// `u32::MAX` elements; MessagePack cannot represent such lengths.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

/// Appends the encoding of `value` to `out`.
///
/// Map keys are written in sorted order, so encoding is deterministic.
pub fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0xc0),
        Value::Bool(false) => out.push(0xc2),
        Value::Bool(true) => out.push(0xc3),
        Value::Integer(i) => encode_integer(*i, out),
        Value::Float(Float::F32(v)) => {
            out.push(0xca);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Float(Float::F64(v)) => {
            out.push(0xcb);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::String(s) => encode_str(s, out),
        Value::Bytes(b) => {
            let len = length_of(b.len());
            if len <= u8::MAX as u32 {
                out.push(0xc4);
                out.push(len as u8);
            } else if len <= u16::MAX as u32 {
                out.push(0xc5);
                out.extend_from_slice(&(len as u16).to_be_bytes());
            } else {
                out.push(0xc6);
                out.extend_from_slice(&len.to_be_bytes());
            }
            out.extend_from_slice(b);
        }
        Value::Array(items) => {
            write_container_header(items.len(), 0x90, 0xdc, out);
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(map) => {
            write_container_header(map.len(), 0x80, 0xde, out);
            for (key, item) in map {
                encode_str(key, out);
                encode_into(item, out);
            }
        }
    }
}

fn encode_integer(i: Integer, out: &mut Vec<u8>) {
    if let Some(v) = i.as_u64() {
        if v < 0x80 {
            out.push(v as u8);
        } else if v <= u8::MAX as u64 {
            out.push(0xcc);
            out.push(v as u8);
        } else if v <= u16::MAX as u64 {
            out.push(0xcd);
            out.extend_from_slice(&(v as u16).to_be_bytes());
        } else if v <= u32::MAX as u64 {
            out.push(0xce);
            out.extend_from_slice(&(v as u32).to_be_bytes());
        } else {
            out.push(0xcf);
            out.extend_from_slice(&v.to_be_bytes());
        }
    } else if let Some(v) = i.as_i64() {
        if v >= -32 {
            out.push(v as i8 as u8);
        } else if v >= i8::MIN as i64 {
            out.push(0xd0);
            out.push(v as i8 as u8);
        } else if v >= i16::MIN as i64 {
            out.push(0xd1);
            out.extend_from_slice(&(v as i16).to_be_bytes());
        } else if v >= i32::MIN as i64 {
            out.push(0xd2);
            out.extend_from_slice(&(v as i32).to_be_bytes());
        } else {
            out.push(0xd3);
            out.extend_from_slice(&v.to_be_bytes());
        }
    }
}

fn encode_str(s: &str, out: &mut Vec<u8>) {
    let len = length_of(s.len());
    if len < 32 {
        out.push(0xa0 | len as u8);
    } else if len <= u8::MAX as u32 {
        out.push(0xd9);
        out.push(len as u8);
    } else if len <= u16::MAX as u32 {
        out.push(0xda);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0xdb);
        out.extend_from_slice(&len.to_be_bytes());
    }
    out.extend_from_slice(s.as_bytes());
}

// fix marker covers lengths below 16; the 32-bit form follows the 16-bit one.
fn write_container_header(len: usize, fix: u8, marker16: u8, out: &mut Vec<u8>) {
    let len = length_of(len);
    if len < 16 {
        out.push(fix | len as u8);
    } else if len <= u16::MAX as u32 {
        out.push(marker16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(marker16 + 1);
        out.extend_from_slice(&len.to_be_bytes());
    }
}

fn length_of(len: usize) -> u32 {
    assert!(
        len <= u32::MAX as usize,
        "length {} exceeds the MessagePack limit",
        len
    );
    len as u32
}

/// Outcome of decoding a single value from the front of a buffer.
enum Step {
    Done(Value),
    Incomplete,
    Malformed(DecodeError),
}

/// Cursor over a byte slice that decodes one value at a time.
///
/// `base` is the absolute offset of `data[0]` in the overall stream, so that
/// errors report positions in the file rather than in the current chunk.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

/// Marker for running out of input mid-value.
struct Short;

/// Outer error: more bytes needed. Inner error: malformed input.
type Decoded = std::result::Result<std::result::Result<Value, DecodeError>, Short>;

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    fn read_u8(&mut self) -> std::result::Result<u8, Short> {
        let byte = *self.data.get(self.pos).ok_or(Short)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> std::result::Result<&'a [u8], Short> {
        let end = self.pos.checked_add(len).ok_or(Short)?;
        let slice = self.data.get(self.pos..end).ok_or(Short)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> std::result::Result<[u8; N], Short> {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(self.read_bytes(N)?);
        Ok(bytes)
    }

    fn read_u16(&mut self) -> std::result::Result<u16, Short> {
        self.read_array().map(u16::from_be_bytes)
    }

    fn read_u32(&mut self) -> std::result::Result<u32, Short> {
        self.read_array().map(u32::from_be_bytes)
    }

    fn read_u64(&mut self) -> std::result::Result<u64, Short> {
        self.read_array().map(u64::from_be_bytes)
    }

    fn error(&self, at: usize, kind: DecodeErrorKind) -> DecodeError {
        DecodeError {
            offset: self.base + at as u64,
            kind,
        }
    }

    /// Decodes the value starting at the current position.
    ///
    /// On `Incomplete` or `Malformed` the position is meaningless and the
    /// caller must rewind.
    fn next_value(&mut self) -> Step {
        match self.value(0) {
            Ok(Ok(value)) => Step::Done(value),
            Ok(Err(e)) => Step::Malformed(e),
            Err(Short) => Step::Incomplete,
        }
    }

    fn value(&mut self, depth: usize) -> Decoded {
        let start = self.pos;
        let marker = self.read_u8()?;
        let value = match marker {
            0x00..=0x7f => Value::from(marker as u64),
            0xe0..=0xff => Value::from(marker as i8 as i64),
            0xc0 => Value::Null,
            0xc2 => Value::Bool(false),
            0xc3 => Value::Bool(true),
            0xcc => Value::from(self.read_u8()? as u64),
            0xcd => Value::from(self.read_u16()? as u64),
            0xce => Value::from(self.read_u32()? as u64),
            0xcf => Value::from(self.read_u64()?),
            0xd0 => Value::from(self.read_u8()? as i8 as i64),
            0xd1 => Value::from(self.read_u16()? as i16 as i64),
            0xd2 => Value::from(self.read_u32()? as i32 as i64),
            0xd3 => Value::from(self.read_u64()? as i64),
            0xca => Value::from(f32::from_bits(self.read_u32()?)),
            0xcb => Value::from(f64::from_bits(self.read_u64()?)),
            0xa0..=0xbf => return self.string((marker & 0x1f) as usize, start),
            0xd9 => {
                let len = self.read_u8()? as usize;
                return self.string(len, start);
            }
            0xda => {
                let len = self.read_u16()? as usize;
                return self.string(len, start);
            }
            0xdb => {
                let len = self.read_u32()? as usize;
                return self.string(len, start);
            }
            0xc4 => {
                let len = self.read_u8()? as usize;
                Value::Bytes(self.read_bytes(len)?.to_vec())
            }
            0xc5 => {
                let len = self.read_u16()? as usize;
                Value::Bytes(self.read_bytes(len)?.to_vec())
            }
            0xc6 => {
                let len = self.read_u32()? as usize;
                Value::Bytes(self.read_bytes(len)?.to_vec())
            }
            0x90..=0x9f => return self.array((marker & 0x0f) as usize, start, depth),
            0xdc => {
                let len = self.read_u16()? as usize;
                return self.array(len, start, depth);
            }
            0xdd => {
                let len = self.read_u32()? as usize;
                return self.array(len, start, depth);
            }
            0x80..=0x8f => return self.map((marker & 0x0f) as usize, start, depth),
            0xde => {
                let len = self.read_u16()? as usize;
                return self.map(len, start, depth);
            }
            0xdf => {
                let len = self.read_u32()? as usize;
                return self.map(len, start, depth);
            }
            0xc7..=0xc9 | 0xd4..=0xd8 => {
                return Ok(Err(
                    self.error(start, DecodeErrorKind::UnsupportedExtension(marker))
                ))
            }
            0xc1 => return Ok(Err(self.error(start, DecodeErrorKind::ReservedMarker(marker)))),
        };
        Ok(Ok(value))
    }

    fn string(&mut self, len: usize, start: usize) -> Decoded {
        let bytes = self.read_bytes(len)?;
        Ok(match std::str::from_utf8(bytes) {
            Ok(s) => Ok(Value::String(s.to_owned())),
            Err(_) => Err(self.error(start, DecodeErrorKind::InvalidUtf8)),
        })
    }

    fn array(&mut self, len: usize, start: usize, depth: usize) -> Decoded {
        if depth >= MAX_DEPTH {
            return Ok(Err(self.error(start, DecodeErrorKind::TooDeep(MAX_DEPTH))));
        }
        // Every element takes at least one byte.
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            match self.value(depth + 1)? {
                Ok(item) => items.push(item),
                Err(e) => return Ok(Err(e)),
            }
        }
        Ok(Ok(Value::Array(items)))
    }

    fn map(&mut self, len: usize, start: usize, depth: usize) -> Decoded {
        if depth >= MAX_DEPTH {
            return Ok(Err(self.error(start, DecodeErrorKind::TooDeep(MAX_DEPTH))));
        }
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key_at = self.pos;
            let key = match self.value(depth + 1)? {
                Ok(Value::String(key)) => key,
                Ok(_) => return Ok(Err(self.error(key_at, DecodeErrorKind::NonStringKey))),
                Err(e) => return Ok(Err(e)),
            };
            match self.value(depth + 1)? {
                Ok(item) => {
                    map.insert(key, item);
                }
                Err(e) => return Ok(Err(e)),
            }
        }
        Ok(Ok(Value::Map(map)))
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }
}

/// Decodes the value at the front of `data`.
///
/// Returns the value and the number of bytes it occupies, `Ok(None)` if
/// `data` ends before the value does.
fn decode_front(data: &[u8], base: u64) -> std::result::Result<Option<(Value, usize)>, DecodeError> {
    let mut cursor = Cursor::new(data, base);
    match cursor.next_value() {
        Step::Done(value) => Ok(Some((value, cursor.pos))),
        Step::Incomplete => Ok(None),
        Step::Malformed(e) => Err(e),
    }
}

/// Lazily decodes the values concatenated in `data`.
///
/// Iteration stops at the first incomplete value (see
/// [`ValueStream::consumed`]) or after yielding a [`DecodeError`].
///
/// ```
/// use mpacklog::codec::{decode_stream, encode};
/// use mpacklog::record;
///
/// let mut bytes = encode(&record! { "x" => 1 });
/// bytes.extend(encode(&record! { "x" => 2 }));
/// bytes.push(0x81); // start of a third map
///
/// let mut stream = decode_stream(&bytes);
/// let values: Vec<_> = stream.by_ref().collect::<Result<_, _>>().unwrap();
/// assert_eq!(values.len(), 2);
/// assert_eq!(stream.remainder(), &[0x81]);
/// ```
pub fn decode_stream(data: &[u8]) -> ValueStream<'_> {
    ValueStream {
        data,
        pos: 0,
        failed: false,
    }
}

/// Iterator returned by [`decode_stream`].
pub struct ValueStream<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> ValueStream<'a> {
    /// Bytes covered by the complete values decoded so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Bytes not yet decoded.
    pub fn remainder(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

impl Iterator for ValueStream<'_> {
    type Item = std::result::Result<Value, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        match decode_front(&self.data[self.pos..], self.pos as u64) {
            Ok(Some((value, used))) => {
                self.pos += used;
                Some(Ok(value))
            }
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Incremental decoder for a growing byte stream.
///
/// Bytes are fed as they arrive; complete values are handed out in order and
/// a partial trailing value is kept until the bytes completing it are fed.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    start: usize,
    base: u64,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.start > 0 && self.start >= self.buffer.len() / 2 {
            self.buffer.drain(..self.start);
            self.base += self.start as u64;
            self.start = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete value, or `Ok(None)` if more bytes are needed.
    ///
    /// A malformed value is reported every time this is called; the decoder
    /// does not move past it.
    pub fn next_value(&mut self) -> std::result::Result<Option<Value>, DecodeError> {
        if self.start >= self.buffer.len() {
            return Ok(None);
        }
        let offset = self.offset();
        match decode_front(&self.buffer[self.start..], offset)? {
            Some((value, used)) => {
                self.start += used;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Absolute stream offset of the next undecoded byte.
    pub fn offset(&self) -> u64 {
        self.base + self.start as u64
    }

    /// Number of bytes held back waiting for completion.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.start
    }
}

/// Reads the values of a finished log file, in order.
///
/// A partial value at the very end of the file (for instance the tail of a
/// crashed writer) ends iteration without an error; it is logged as a
/// warning. Malformed bytes yield a [`DecodeError`] and end iteration.
pub struct LogReader<R> {
    source: R,
    decoder: StreamDecoder,
    chunk: Vec<u8>,
    done: bool,
}

/// Opens `path` as a [`LogReader`].
pub fn read_log(path: impl AsRef<Path>) -> Result<LogReader<File>> {
    let file = File::open(path.as_ref())?;
    Ok(LogReader::new(file))
}

impl<R: Read> LogReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_chunk_size(source, READ_CHUNK_SIZE)
    }

    pub fn with_chunk_size(source: R, chunk_size: usize) -> Self {
        Self {
            source,
            decoder: StreamDecoder::new(),
            chunk: vec![0; chunk_size.max(1)],
            done: false,
        }
    }

    fn fill(&mut self) -> io::Result<usize> {
        loop {
            match self.source.read(&mut self.chunk) {
                Ok(n) => {
                    self.decoder.feed(&self.chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: Read> Iterator for LogReader<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.decoder.next_value() {
                Ok(Some(value)) => return Some(Ok(value)),
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
            match self.fill() {
                Ok(0) => {
                    self.done = true;
                    if self.decoder.buffered() > 0 {
                        tracing::warn!(
                            offset = self.decoder.offset(),
                            bytes = self.decoder.buffered(),
                            "log ends with an incomplete record"
                        );
                    }
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}
