use std::fmt::{self, Display};
use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{ReadBytesExt, LE};
use thiserror::Error;

use crate::types::{BBox, Vec3d};

/// A failed primitive read, naming the field being read and where the source
/// stood when it failed.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("unexpected end of file reading {what} at offset {position:#x}")]
    UnexpectedEof { what: &'static str, position: u64 },
    #[error("invalid length prefix {len} for {what} at offset {position:#x}")]
    InvalidLength { what: &'static str, len: i32, position: u64 },
    #[error("io error reading {what} at offset {position:#x}: {source}")]
    Io {
        what: &'static str,
        position: u64,
        #[source]
        source: io::Error,
    },
}

/// A top-level chunk id; four ASCII bytes, little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(pub [u8; 4]);
impl Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

/// Little-endian primitive decoding over a seekable byte source.
pub struct Reader<R> {
    file: R,
    position: u64,
    len: u64,
}

impl<R: Read + Seek> Reader<R> {
    pub fn new(mut file: R) -> io::Result<Reader<R>> {
        let len = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Reader { file, position: 0, len })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.position)
    }

    pub fn seek(&mut self, position: u64) -> Result<(), ReadError> {
        self.file
            .seek(SeekFrom::Start(position))
            .map_err(|source| ReadError::Io { what: "seek target", position, source })?;
        self.position = position;
        Ok(())
    }

    fn wrap_err(&self, what: &'static str, source: io::Error) -> ReadError {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            ReadError::UnexpectedEof { what, position: self.position }
        } else {
            ReadError::Io { what, position: self.position, source }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8], what: &'static str) -> Result<(), ReadError> {
        self.file.read_exact(buf).map_err(|e| self.wrap_err(what, e))?;
        self.position += buf.len() as u64;
        Ok(())
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8, ReadError> {
        let mut buf = [0; 1];
        self.read_exact(&mut buf, what)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self, what: &'static str) -> Result<u16, ReadError> {
        let mut buf = [0; 2];
        self.read_exact(&mut buf, what)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32, ReadError> {
        let mut buf = [0; 4];
        self.read_exact(&mut buf, what)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32(&mut self, what: &'static str) -> Result<i32, ReadError> {
        Ok(self.read_u32(what)? as i32)
    }

    pub fn read_f32(&mut self, what: &'static str) -> Result<f32, ReadError> {
        let mut buf = [0; 4];
        self.read_exact(&mut buf, what)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub fn read_bytes(&mut self, n: usize, what: &'static str) -> Result<Box<[u8]>, ReadError> {
        // refuse buffers the source cannot possibly hold; a hostile length
        // prefix must not allocate gigabytes
        if n as u64 > self.remaining() {
            return Err(ReadError::UnexpectedEof { what, position: self.position });
        }
        let mut buf = vec![0; n];
        self.read_exact(&mut buf, what)?;
        Ok(buf.into())
    }

    /// A u32 length followed by that many bytes.
    pub fn read_byte_buffer(&mut self, what: &'static str) -> Result<Box<[u8]>, ReadError> {
        let n = self.read_u32(what)? as usize;
        self.read_bytes(n, what)
    }

    /// An i32 length followed by that many bytes; decoded permissively as
    /// Latin-1 and trimmed at the first NUL, which absorbs both the
    /// with-NUL and without-NUL length conventions chunks use.
    pub fn read_string(&mut self, what: &'static str) -> Result<String, ReadError> {
        let len = self.read_i32(what)?;
        if len < 0 {
            return Err(ReadError::InvalidLength { what, len, position: self.position });
        }
        let buf = self.read_bytes(len as usize, what)?;
        Ok(decode_latin1(&buf))
    }

    /// Exactly `n` bytes, zero-padded on the wire, trimmed at the first NUL.
    pub fn read_fixed_string(&mut self, n: usize, what: &'static str) -> Result<String, ReadError> {
        let buf = self.read_bytes(n, what)?;
        Ok(decode_latin1(&buf))
    }

    pub fn read_vec3d(&mut self, what: &'static str) -> Result<Vec3d, ReadError> {
        Ok(Vec3d {
            x: self.read_f32(what)?,
            y: self.read_f32(what)?,
            z: self.read_f32(what)?,
        })
    }

    pub fn read_bbox(&mut self, what: &'static str) -> Result<BBox, ReadError> {
        Ok(BBox { min: self.read_vec3d(what)?, max: self.read_vec3d(what)? })
    }

    /// Reads the next top-level chunk header, or `None` on a clean EOF at a
    /// chunk boundary. The returned length excludes the 8-byte header.
    pub fn read_chunk_header(&mut self) -> Result<Option<(ChunkId, i32)>, ReadError> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let mut id = [0; 4];
        self.read_exact(&mut id, "chunk id")?;
        let len = self.read_i32("chunk length")?;
        Ok(Some((ChunkId(id), len)))
    }
}

fn decode_latin1(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    buf[..end].iter().map(|&b| b as char).collect()
}

/// In-memory little-endian cursor for BSP streams. Keeps an absolute offset
/// so child-offset opcodes can jump around the slice.
pub struct SliceCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceCursor<'a> {
    pub fn new(buf: &'a [u8]) -> SliceCursor<'a> {
        SliceCursor { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> SliceCursor<'a> {
        SliceCursor { buf, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn stream(&self) -> &'a [u8] {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ReadError> {
        if self.remaining() < n {
            return Err(ReadError::UnexpectedEof { what, position: self.pos as u64 });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize, what: &'static str) -> Result<(), ReadError> {
        self.take(n, what).map(|_| ())
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8, ReadError> {
        Ok(self.take(1, what)?[0])
    }

    pub fn read_u16(&mut self, what: &'static str) -> Result<u16, ReadError> {
        let mut bytes = self.take(2, what)?;
        Ok(bytes.read_u16::<LE>().unwrap())
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32, ReadError> {
        let mut bytes = self.take(4, what)?;
        Ok(bytes.read_u32::<LE>().unwrap())
    }

    pub fn read_f32(&mut self, what: &'static str) -> Result<f32, ReadError> {
        let mut bytes = self.take(4, what)?;
        Ok(bytes.read_f32::<LE>().unwrap())
    }

    pub fn read_vec3d(&mut self, what: &'static str) -> Result<Vec3d, ReadError> {
        Ok(Vec3d {
            x: self.read_f32(what)?,
            y: self.read_f32(what)?,
            z: self.read_f32(what)?,
        })
    }

    pub fn read_bbox(&mut self, what: &'static str) -> Result<BBox, ReadError> {
        Ok(BBox { min: self.read_vec3d(what)?, max: self.read_vec3d(what)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn primitives_little_endian() {
        let bytes = [0x44, 0x08, 0x00, 0x00, 0x00, 0x00, 0x80, 0x3f];
        let mut reader = Reader::new(Cursor::new(&bytes[..])).unwrap();
        assert_eq!(reader.read_u32("a").unwrap(), 0x844);
        assert_eq!(reader.read_f32("b").unwrap(), 1.0);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn negative_string_length_is_refused() {
        let bytes = (-5i32).to_le_bytes();
        let mut reader = Reader::new(Cursor::new(&bytes[..])).unwrap();
        let err = reader.read_string("dock properties").unwrap_err();
        match err {
            ReadError::InvalidLength { what, len, .. } => {
                assert_eq!(what, "dock properties");
                assert_eq!(len, -5);
            }
            other => panic!("expected InvalidLength, got {other}"),
        }
    }

    #[test]
    fn eof_names_field_and_position() {
        let mut reader = Reader::new(Cursor::new(&[0u8, 0][..])).unwrap();
        match reader.read_u32("max_radius") {
            Err(ReadError::UnexpectedEof { what, position }) => {
                assert_eq!(what, "max_radius");
                assert_eq!(position, 0);
            }
            other => panic!("expected eof, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn strings_trim_at_nul() {
        // length prefix includes the trailing NUL here
        let mut bytes = vec![5, 0, 0, 0];
        bytes.extend(b"hull\0");
        let mut reader = Reader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.read_string("name").unwrap(), "hull");
    }

    #[test]
    fn hostile_length_prefix_is_eof_not_alloc() {
        let bytes = [0xff, 0xff, 0xff, 0x7f, 1, 2, 3];
        let mut reader = Reader::new(Cursor::new(&bytes[..])).unwrap();
        assert!(matches!(reader.read_byte_buffer("props"), Err(ReadError::UnexpectedEof { .. })));
    }

    #[test]
    fn chunk_header_peeks_eof() {
        let mut reader = Reader::new(Cursor::new(Vec::new())).unwrap();
        assert!(reader.read_chunk_header().unwrap().is_none());

        let mut bytes = vec![];
        bytes.extend(b"TXTR");
        bytes.extend(4i32.to_le_bytes());
        bytes.extend(0u32.to_le_bytes());
        let mut reader = Reader::new(Cursor::new(bytes)).unwrap();
        let (id, len) = reader.read_chunk_header().unwrap().unwrap();
        assert_eq!(format!("{}", id), "TXTR");
        assert_eq!(len, 4);
    }

    #[test]
    fn slice_cursor_bounds() {
        let mut cursor = SliceCursor::new(&[1, 0, 0, 0]);
        assert_eq!(cursor.read_u32("op").unwrap(), 1);
        assert!(matches!(cursor.read_u8("next"), Err(ReadError::UnexpectedEof { .. })));
    }
}
