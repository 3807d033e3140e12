//! Fixed 16-byte file header.
//!
//! Layout, every multi-byte field little-endian:
//!
//! | offset | size | field                                  |
//! |-------:|-----:|----------------------------------------|
//! | 0      | 3    | magic `"SQT"`                          |
//! | 3      | 1    | byte order flag (1 = little-endian)    |
//! | 4      | 1    | format version                         |
//! | 5      | 3    | reserved, zero                         |
//! | 8      | 4    | feature count of the indexed dataset   |
//! | 12     | 4    | configured maximum depth               |
//!
//! The header is encoded with bincode using fixed-width integers and an
//! explicit little-endian configuration, so its bytes never depend on the
//! host's struct layout or endianness.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use super::qix_constants::{BYTE_ORDER_LSB, BYTE_ORDER_MSB, HEADER_SIZE, MAGIC, VERSION};
use super::qix_types::{QixError, QixResult};

fn header_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

/// File header stored at the beginning of every index file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: [u8; 3],
    pub byte_order: u8,
    pub version: u8,
    pub reserved: [u8; 3],
    pub feature_count: u32,
    pub max_depth: u32,
}

impl FileHeader {
    pub fn new(feature_count: u32, max_depth: u32) -> Self {
        Self {
            magic: MAGIC,
            byte_order: BYTE_ORDER_LSB,
            version: VERSION,
            reserved: [0; 3],
            feature_count,
            max_depth,
        }
    }

    pub fn validate(&self) -> QixResult<()> {
        if self.magic != MAGIC {
            return Err(QixError::CorruptIndex(
                "Invalid file format (bad magic)".into(),
            ));
        }
        match self.byte_order {
            BYTE_ORDER_LSB => {}
            BYTE_ORDER_MSB => {
                return Err(QixError::CorruptIndex(
                    "Big-endian index files are not supported".into(),
                ))
            }
            other => {
                return Err(QixError::CorruptIndex(format!(
                    "Unknown byte order flag {}",
                    other
                )))
            }
        }
        if self.version != VERSION {
            return Err(QixError::CorruptIndex(format!(
                "Unsupported file format version {}",
                self.version
            )));
        }
        if self.max_depth == 0 {
            return Err(QixError::CorruptIndex("Header declares zero depth".into()));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> QixResult<[u8; HEADER_SIZE as usize]> {
        let bytes = bincode::serde::encode_to_vec(self, header_config())
            .map_err(|e| QixError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
        bytes.try_into().map_err(|bytes: Vec<u8>| {
            QixError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Encoded header is {} bytes, expected {}", bytes.len(), HEADER_SIZE),
            ))
        })
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE as usize]) -> QixResult<Self> {
        bincode::serde::decode_from_slice(bytes, header_config())
            .map(|(header, _)| header)
            .map_err(|e| QixError::CorruptIndex(format!("Unreadable header: {}", e)))
    }

    /// Writes the header at the current position of `out`.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> QixResult<()> {
        out.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    /// Reads and validates a header from the current position of `input`.
    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> QixResult<Self> {
        let mut buffer = [0u8; HEADER_SIZE as usize];
        input
            .read_exact(&mut buffer)
            .map_err(|e| QixError::from_read(e, "file header"))?;
        let header = Self::from_bytes(&buffer)?;
        header.validate()?;
        Ok(header)
    }
}
