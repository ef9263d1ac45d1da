use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Serialize a value using bincode
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| Error::Encoding(format!("Serialization failed: {}", e)))
}

/// Serialize a value into a writer using bincode
pub fn serialize_into<T: Serialize, W: Write>(writer: W, value: &T) -> Result<()> {
    bincode::serialize_into(writer, value)
        .map_err(|e| Error::Encoding(format!("Serialization failed: {}", e)))
}

/// Deserialize a value from a byte slice using bincode
pub fn deserialize<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::Encoding(format!("Deserialization failed: {}", e)))
}

/// Deserialize a value from a reader using bincode
pub fn deserialize_from<T: for<'a> Deserialize<'a>, R: Read>(reader: R) -> Result<T> {
    bincode::deserialize_from(reader)
        .map_err(|e| Error::Encoding(format!("Deserialization failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        id: i64,
        device_id: String,
        values: Vec<Value>,
    }

    #[test]
    fn test_serialize_deserialize() {
        let original = Reading {
            id: 42,
            device_id: "7G007R".to_string(),
            values: vec![Value::Int64(1), Value::Null, Value::Utf8("NOMINAL".into())],
        };

        let serialized = serialize(&original).unwrap();
        let deserialized: Reading = deserialize(&serialized).unwrap();

        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_serialize_into_and_deserialize_from() {
        let original = vec![Value::Float64(0.25), Value::Boolean(true)];

        let mut buffer = Vec::new();
        serialize_into(&mut buffer, &original).unwrap();

        let deserialized: Vec<Value> = deserialize_from(buffer.as_slice()).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_invalid_data() {
        let invalid_data = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<String> = deserialize(&invalid_data);
        assert!(matches!(result, Err(Error::Encoding(_))));
    }
}
