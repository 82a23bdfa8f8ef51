//! Binary framing of cached payloads.
//!
//! ```text
//! Header (16 bytes):
//!   Magic: "ATRC" (4 bytes)
//!   Version: u16
//!   Flags: u16 (compression)
//!   Payload length: u64 (uncompressed)
//!
//! Body:
//!   Payload bytes, optionally LZ4 compressed
//! ```

use std::io::{self, Read, Write};

/// Magic bytes identifying a cached payload.
pub const PAYLOAD_MAGIC: &[u8; 4] = b"ATRC";

/// Current format version.
pub const PAYLOAD_VERSION: u16 = 1;

/// Compression type for payload bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    #[default]
    None = 0,
    /// LZ4 fast compression.
    Lz4 = 1,
}

impl CompressionType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lz4),
            _ => None,
        }
    }
}

/// Payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub compression: CompressionType,
    /// Uncompressed payload length.
    pub length: u64,
}

impl PayloadHeader {
    /// Magic(4) + Version(2) + Flags(2) + Length(8) = 16
    pub const SIZE: usize = 16;

    /// Write header to output.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(PAYLOAD_MAGIC)?;
        w.write_all(&PAYLOAD_VERSION.to_le_bytes())?;
        w.write_all(&(self.compression as u16).to_le_bytes())?;
        w.write_all(&self.length.to_le_bytes())?;
        Ok(())
    }

    /// Read header from input.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != PAYLOAD_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid payload magic bytes",
            ));
        }

        let mut buf2 = [0u8; 2];
        let mut buf8 = [0u8; 8];

        r.read_exact(&mut buf2)?;
        let version = u16::from_le_bytes(buf2);
        if version != PAYLOAD_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported payload version: {}", version),
            ));
        }

        r.read_exact(&mut buf2)?;
        let flags = u16::from_le_bytes(buf2);
        let compression = CompressionType::from_u8((flags & 0x0F) as u8).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown compression flag: {}", flags & 0x0F),
            )
        })?;

        r.read_exact(&mut buf8)?;
        let length = u64::from_le_bytes(buf8);

        Ok(Self {
            compression,
            length,
        })
    }
}

/// Frame a payload for storage.
pub fn encode_payload(data: &[u8], compression: CompressionType) -> Vec<u8> {
    let header = PayloadHeader {
        compression,
        length: data.len() as u64,
    };
    let body = match compression {
        CompressionType::None => data.to_vec(),
        CompressionType::Lz4 => compress_lz4(data),
    };

    let mut out = Vec::with_capacity(PayloadHeader::SIZE + body.len());
    // Writing into a Vec cannot fail
    let _ = header.write_to(&mut out);
    out.extend_from_slice(&body);
    out
}

/// Unframe a stored payload.
pub fn decode_payload(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut cursor = io::Cursor::new(bytes);
    let header = PayloadHeader::read_from(&mut cursor)?;
    let body = &bytes[PayloadHeader::SIZE..];

    let data = match header.compression {
        CompressionType::None => body.to_vec(),
        CompressionType::Lz4 => decompress_lz4(body)?,
    };

    if data.len() as u64 != header.length {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Payload size mismatch: header says {} bytes, found {}",
                header.length,
                data.len()
            ),
        ));
    }
    Ok(data)
}

/// Compress data using LZ4.
#[cfg(feature = "lz4")]
pub fn compress_lz4(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompress LZ4 data.
#[cfg(feature = "lz4")]
pub fn decompress_lz4(data: &[u8]) -> io::Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Fallback when LZ4 is not available.
#[cfg(not(feature = "lz4"))]
pub fn compress_lz4(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

#[cfg(not(feature = "lz4"))]
pub fn decompress_lz4(data: &[u8]) -> io::Result<Vec<u8>> {
    Ok(data.to_vec())
}
