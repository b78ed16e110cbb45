// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tagged, length-prefixed chunk reading and writing.
//!
//! Every chunk on the wire is laid out as:
//!
//! ```text
//! [tag: 4 bytes][size: i32 LE][payload: size bytes][zero padding to 4]
//! ```
//!
//! The padding is not part of `size` but is part of whatever bound the
//! enclosing chunk declared.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Seek, SeekFrom, Write};

/// Size of a chunk header (tag + size)
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Chunk payloads are padded to this boundary
pub const CHUNK_ALIGNMENT: usize = 4;

/// Errors raised while decoding or encoding chunk data
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// Not enough bytes left to satisfy a read
    #[error("Unexpected end of data at offset {offset}: needed {needed} bytes, {available} available")]
    UnexpectedEof {
        /// Offset of the failed read
        offset: usize,
        /// Bytes requested
        needed: usize,
        /// Bytes left before the bound
        available: usize,
    },

    /// A chunk declares a size that runs past its parent bound
    #[error("Chunk '{tag}' at offset {offset} declares size {size}, exceeding bound {bound}")]
    ChunkOutOfBounds {
        /// Chunk tag
        tag: Tag,
        /// Offset of the chunk header
        offset: usize,
        /// Declared payload size
        size: i64,
        /// Absolute offset the payload must not pass
        bound: usize,
    },

    /// A chunk handler consumed more than the chunk's payload
    #[error("Chunk '{tag}' handler read {read} bytes of a {size}-byte payload")]
    Overread {
        /// Chunk tag
        tag: Tag,
        /// Declared payload size
        size: usize,
        /// Bytes actually consumed
        read: usize,
    },

    /// A specific chunk was required but another was found
    #[error("Expected chunk '{expected}', found '{found}'")]
    UnexpectedTag {
        /// Required tag
        expected: Tag,
        /// Tag present in the data
        found: Tag,
    },

    /// Seek outside of the buffer
    #[error("Seek to {target} outside of buffer of length {len}")]
    SeekOutOfBounds {
        /// Requested absolute position
        target: usize,
        /// Buffer length
        len: usize,
    },

    /// String data is not valid
    #[error("Invalid string: {0}")]
    InvalidString(String),

    /// File header fields are malformed
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Underlying writer error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for chunk operations
pub type Result<T> = std::result::Result<T, FormatError>;

/// Number of zero bytes that follow a payload of `size` bytes
pub const fn padding_for(size: usize) -> usize {
    (CHUNK_ALIGNMENT - size % CHUNK_ALIGNMENT) % CHUNK_ALIGNMENT
}

/// Four-byte chunk identifier.
///
/// Stored in wire order: the ASCII name reversed and NUL padded, so
/// `"Tex"` is `78 65 54 00` in the file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag([u8; 4]);

impl Tag {
    /// Build a tag from its readable name (at most four ASCII bytes)
    pub const fn new(name: &str) -> Self {
        let bytes = name.as_bytes();
        let len = bytes.len();
        assert!(len > 0 && len <= 4, "tag names are one to four bytes");

        let mut wire = [0u8; 4];
        let mut i = 0;
        while i < len {
            wire[i] = bytes[len - 1 - i];
            i += 1;
        }
        Self(wire)
    }

    /// Build a tag from the four bytes found on the wire
    pub const fn from_wire(wire: [u8; 4]) -> Self {
        Self(wire)
    }

    /// Bytes as they appear in the file
    pub const fn wire(&self) -> [u8; 4] {
        self.0
    }

    /// Tag interpreted as a little-endian integer
    pub fn as_i32(&self) -> i32 {
        i32::from_le_bytes(self.0)
    }

    /// Readable name
    pub fn name(&self) -> String {
        self.0
            .iter()
            .rev()
            .skip_while(|b| **b == 0)
            .map(|b| if b.is_ascii_graphic() { *b as char } else { '?' })
            .collect()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({:?})", self.name())
    }
}

/// Bounds-checked cursor over a byte slice
#[derive(Debug, Clone)]
pub struct ChunkReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current absolute position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying buffer
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Move the cursor to an absolute position
    pub fn seek(&mut self, target: usize) -> Result<()> {
        if target > self.data.len() {
            return Err(FormatError::SeekOutOfBounds {
                target,
                len: self.data.len(),
            });
        }
        self.pos = target;
        Ok(())
    }

    /// Advance the cursor by `count` bytes
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(FormatError::UnexpectedEof {
                offset: self.pos,
                needed: count,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    /// Read `count` raw bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    /// Read a byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a one-byte boolean (any non-zero value is `true`)
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a little-endian `i16`
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    /// Read a little-endian `i32`
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    /// Read a little-endian `f32`
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Read a chunk tag
    pub fn read_tag(&mut self) -> Result<Tag> {
        let bytes = self.take(4)?;
        Ok(Tag::from_wire([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read an `i32` length followed by that many UTF-8 bytes
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| FormatError::InvalidString(format!("negative length {len}")))?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| FormatError::InvalidString(e.to_string()))
    }
}

/// Growable little-endian writer that supports seeking back to patch
/// placeholders
#[derive(Debug, Default)]
pub struct ChunkWriter {
    cursor: Cursor<Vec<u8>>,
}

impl ChunkWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write position
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    /// Move the write position
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.len() {
            return Err(FormatError::SeekOutOfBounds {
                target: pos,
                len: self.len(),
            });
        }
        self.cursor.seek(SeekFrom::Start(pos as u64))?;
        Ok(())
    }

    /// Overwrite an `i32` at `pos` and return to the previous position
    pub fn patch_i32(&mut self, pos: usize, value: i32) -> Result<()> {
        let resume = self.position();
        self.seek(pos)?;
        self.write_i32(value)?;
        self.seek(resume)
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.cursor.write_all(bytes)?;
        Ok(())
    }

    /// Write `count` zero bytes
    pub fn write_zeros(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.cursor.write_u8(0)?;
        }
        Ok(())
    }

    /// Write a byte
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.cursor.write_u8(value)?;
        Ok(())
    }

    /// Write a one-byte boolean
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Write a little-endian `i16`
    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.cursor.write_i16::<LittleEndian>(value)?;
        Ok(())
    }

    /// Write a little-endian `i32`
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.cursor.write_i32::<LittleEndian>(value)?;
        Ok(())
    }

    /// Write a little-endian `f32`
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.cursor.write_f32::<LittleEndian>(value)?;
        Ok(())
    }

    /// Write a chunk tag
    pub fn write_tag(&mut self, tag: Tag) -> Result<()> {
        self.write_bytes(&tag.wire())
    }

    /// Write an `i32` length followed by the UTF-8 bytes of `value`
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = i32::try_from(value.len())
            .map_err(|_| FormatError::InvalidString("string too long".to_string()))?;
        self.write_i32(len)?;
        self.write_bytes(value.as_bytes())
    }

    /// Borrow the written bytes
    pub fn as_slice(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    /// Consume the writer, returning the buffer
    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

/// Something that can be emitted as one chunk
pub trait ChunkItem {
    /// Tag written in the chunk header
    fn tag(&self) -> Tag;

    /// Whether the chunk should be emitted at all
    fn is_present(&self) -> bool {
        true
    }

    /// Serialize the payload (without header or padding)
    fn write_payload(&self, writer: &mut ChunkWriter) -> Result<()>;
}

/// Write one chunk. The payload is serialized to a scratch buffer first so
/// the size is always exact.
pub fn write_chunk<F>(writer: &mut ChunkWriter, tag: Tag, payload: F) -> Result<()>
where
    F: FnOnce(&mut ChunkWriter) -> Result<()>,
{
    let mut scratch = ChunkWriter::new();
    payload(&mut scratch)?;
    let bytes = scratch.into_inner();
    let size = i32::try_from(bytes.len()).map_err(|_| FormatError::ChunkOutOfBounds {
        tag,
        offset: writer.position(),
        size: bytes.len() as i64,
        bound: i32::MAX as usize,
    })?;

    writer.write_tag(tag)?;
    writer.write_i32(size)?;
    writer.write_bytes(&bytes)?;
    writer.write_zeros(padding_for(bytes.len()))
}

/// Write every present item as a chunk, in order
pub fn write_nested<T: ChunkItem>(writer: &mut ChunkWriter, items: &[T]) -> Result<()> {
    for item in items.iter().filter(|item| item.is_present()) {
        write_chunk(writer, item.tag(), |w| item.write_payload(w))?;
    }
    Ok(())
}

/// Walk the chunks contained in the next `total_size` bytes.
///
/// `on_chunk` is called with the reader positioned at each payload. Whatever
/// it consumes, the reader is then moved to the end of that payload (and its
/// padding). Unknown tags only need to be ignored by the callback.
pub fn read_nested<'a, F>(reader: &mut ChunkReader<'a>, total_size: usize, mut on_chunk: F) -> Result<()>
where
    F: FnMut(&mut ChunkReader<'a>, Tag, usize) -> Result<()>,
{
    let start = reader.position();
    if total_size > reader.remaining() {
        return Err(FormatError::UnexpectedEof {
            offset: start,
            needed: total_size,
            available: reader.remaining(),
        });
    }
    let end = start + total_size;

    while reader.position() < end {
        let header = reader.position();
        if end - header < CHUNK_HEADER_SIZE {
            return Err(FormatError::UnexpectedEof {
                offset: header,
                needed: CHUNK_HEADER_SIZE,
                available: end - header,
            });
        }

        let tag = reader.read_tag()?;
        let declared = reader.read_i32()?;
        let payload_start = reader.position();
        let size = usize::try_from(declared)
            .ok()
            .filter(|size| payload_start + size <= end)
            .ok_or(FormatError::ChunkOutOfBounds {
                tag,
                offset: header,
                size: i64::from(declared),
                bound: end,
            })?;

        tracing::trace!(%tag, size, offset = header, "chunk");
        on_chunk(reader, tag, size)?;

        let payload_end = payload_start + size;
        if reader.position() > payload_end {
            return Err(FormatError::Overread {
                tag,
                size,
                read: reader.position() - payload_start,
            });
        }
        reader.seek((payload_end + padding_for(size)).min(end))?;
    }

    Ok(())
}

/// A chunk kept as opaque bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChunk {
    /// Chunk tag
    pub tag: Tag,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl ChunkItem for RawChunk {
    fn tag(&self) -> Tag {
        self.tag
    }

    fn write_payload(&self, writer: &mut ChunkWriter) -> Result<()> {
        writer.write_bytes(&self.payload)
    }
}

/// Collect the chunks of the next `total_size` bytes without interpreting them
pub fn read_raw_chunks(reader: &mut ChunkReader<'_>, total_size: usize) -> Result<Vec<RawChunk>> {
    let mut chunks = Vec::new();
    read_nested(reader, total_size, |r, tag, size| {
        chunks.push(RawChunk {
            tag,
            payload: r.read_bytes(size)?.to_vec(),
        });
        Ok(())
    })?;
    Ok(chunks)
}

/// Read a single chunk that must carry `expected`, returning its payload size
/// with the reader positioned at the payload
pub fn expect_chunk(reader: &mut ChunkReader<'_>, expected: Tag) -> Result<usize> {
    let offset = reader.position();
    let found = reader.read_tag()?;
    if found != expected {
        return Err(FormatError::UnexpectedTag { expected, found });
    }
    let declared = reader.read_i32()?;
    usize::try_from(declared)
        .ok()
        .filter(|size| *size <= reader.remaining())
        .ok_or(FormatError::ChunkOutOfBounds {
            tag: found,
            offset,
            size: i64::from(declared),
            bound: reader.len(),
        })
}
