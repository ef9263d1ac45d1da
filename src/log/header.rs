use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

pub const HEADER_SIZE: usize = 32;
const COMMIT_MAGIC: &[u8; 8] = b"LKLG\0LOG";
const CHECKPOINT_MAGIC: &[u8; 8] = b"LKLG\0CKP";
const VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFileKind {
    Commit,
    Checkpoint,
}

impl LogFileKind {
    fn magic(self) -> &'static [u8; 8] {
        match self {
            LogFileKind::Commit => COMMIT_MAGIC,
            LogFileKind::Checkpoint => CHECKPOINT_MAGIC,
        }
    }
}

/// Header written at the start of every commit and checkpoint file.
#[derive(Debug, Clone, PartialEq)]
pub struct LogHeader {
    pub kind: LogFileKind,
    pub format_version: u32,
    /// Table version the file describes
    pub table_version: u64,
}

impl LogHeader {
    pub fn new(kind: LogFileKind, table_version: u64) -> Self {
        Self {
            kind,
            format_version: VERSION,
            table_version,
        }
    }

    pub fn encode(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(self.kind.magic());
        (&mut buf[8..12]).write_u32::<BigEndian>(self.format_version)?;
        (&mut buf[12..20]).write_u64::<BigEndian>(self.table_version)?;
        Ok(buf)
    }

    /// Decodes a header, checking that it has the expected kind.
    pub fn decode(buf: &[u8], expected: LogFileKind) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::InvalidData("Truncated log file header".to_string()));
        }
        let mut cursor = Cursor::new(&buf[..HEADER_SIZE]);

        let mut magic = [0u8; 8];
        cursor.read_exact(&mut magic)?;
        if &magic != expected.magic() {
            return Err(Error::InvalidData(format!(
                "Invalid log file magic number, expected {:?} file",
                expected
            )));
        }

        let format_version = cursor.read_u32::<BigEndian>()?;
        if format_version != VERSION {
            return Err(Error::InvalidData(format!(
                "Unsupported log format version: {}",
                format_version
            )));
        }
        let table_version = cursor.read_u64::<BigEndian>()?;

        Ok(Self {
            kind: expected,
            format_version,
            table_version,
        })
    }
}
