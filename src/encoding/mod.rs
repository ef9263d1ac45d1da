//! On-disk framing shared by data files, commit files and checkpoints.
//!
//! Every persisted object is a fixed-size header followed by a single frame:
//!
//! ```text
//! +-----------+------------------+-----------+
//! |length:u32 | payload          |crc32:u32  |
//! +-----------+------------------+-----------+
//! | 4 bytes   | variable length  | 4 bytes   |
//! +-----------+------------------+-----------+
//! ```
//!
//! Integers are big-endian. The payload is bincode.

pub mod bincode;

use crate::error::{Error, Result};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use std::io::{self, Read, Write};

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Writes `payload` as a length-prefixed, checksummed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Encoding(format!("Frame too large: {} bytes", payload.len())))?;
    writer.write_u32::<BigEndian>(len)?;
    writer.write_all(payload)?;
    writer.write_u32::<BigEndian>(CRC32.checksum(payload))?;
    Ok(())
}

/// Reads one frame and verifies its checksum.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader.read_u32::<BigEndian>().map_err(truncated)? as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(truncated)?;

    let stored = reader.read_u32::<BigEndian>().map_err(truncated)?;
    let computed = CRC32.checksum(&payload);
    if stored != computed {
        return Err(Error::InvalidData(format!(
            "Checksum mismatch: stored {:#x}, computed {:#x}",
            stored, computed
        )));
    }

    Ok(payload)
}

fn truncated(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::InvalidData("Truncated frame".to_string())
    } else {
        Error::IoError(err)
    }
}
