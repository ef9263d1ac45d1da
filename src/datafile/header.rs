use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

pub const HEADER_SIZE: usize = 64;
const MAGIC: &[u8; 8] = b"LKLG\0DAT";
const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct DataFileHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub row_count: u64,
    pub column_count: u32,
}

impl DataFileHeader {
    pub fn new(row_count: u64, column_count: u32) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            row_count,
            column_count,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != *MAGIC {
            return Err(Error::InvalidData(
                "Invalid data file magic number".to_string(),
            ));
        }
        if self.version != VERSION {
            return Err(Error::InvalidData(format!(
                "Unsupported data file version: {}",
                self.version
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        (&mut buf[8..12]).write_u32::<BigEndian>(self.version)?;
        (&mut buf[12..20]).write_u64::<BigEndian>(self.row_count)?;
        (&mut buf[20..24]).write_u32::<BigEndian>(self.column_count)?;
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::InvalidData("Truncated data file header".to_string()));
        }
        let mut cursor = Cursor::new(&buf[..HEADER_SIZE]);

        let mut magic = [0u8; 8];
        cursor.read_exact(&mut magic)?;

        let version = cursor.read_u32::<BigEndian>()?;
        let row_count = cursor.read_u64::<BigEndian>()?;
        let column_count = cursor.read_u32::<BigEndian>()?;

        let header = Self {
            magic,
            version,
            row_count,
            column_count,
        };
        header.validate()?;
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_with_values() {
        let header = DataFileHeader::new(1_000, 9);
        let encoded = header.encode().unwrap();
        let decoded = DataFileHeader::decode(&encoded).expect("Failed to decode header");
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(b"INVALID!");

        let result = DataFileHeader::decode(&buf);
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut header = DataFileHeader::new(0, 1);
        header.version = 999;
        let encoded = header.encode().unwrap();

        let result = DataFileHeader::decode(&encoded);
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }
}
