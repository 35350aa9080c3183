use crate::error::Result;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

fn encode_error(err: bincode::Error) -> Error {
    match *err {
        bincode::ErrorKind::Io(e) => Error::IoError(e),
        other => Error::Encode("value", other.to_string()),
    }
}

fn decode_error(err: bincode::Error) -> Error {
    match *err {
        bincode::ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Error::CorruptedDocument("truncated value".to_string())
        }
        bincode::ErrorKind::Io(e) => Error::IoError(e),
        other => Error::Decode("value", other.to_string()),
    }
}

/// Serialize a value using bincode
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(encode_error)
}

/// Serialize a value into a writer using bincode
pub fn serialize_into<T: Serialize, W: Write>(writer: W, value: &T) -> Result<()> {
    bincode::serialize_into(writer, value).map_err(encode_error)
}

/// Deserialize a value from a byte slice using bincode
pub fn deserialize<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(decode_error)
}

/// Deserialize a value from a reader using bincode
pub fn deserialize_from<T: for<'a> Deserialize<'a>, R: Read>(reader: R) -> Result<T> {
    bincode::deserialize_from(reader).map_err(decode_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_value_variants() {
        let values = vec![
            Value::Null,
            Value::from(true),
            Value::from(-42),
            Value::from(3.25),
            Value::from("north"),
        ];
        for original in values {
            let bytes = serialize(&original).unwrap();
            let decoded: Value = deserialize(&bytes).unwrap();
            assert_eq!(original, decoded);
        }
    }

    #[test]
    fn test_serialize_into_and_deserialize_from() {
        let mut buffer = Vec::new();
        serialize_into(&mut buffer, &Value::from("a")).unwrap();
        serialize_into(&mut buffer, &Value::from(2)).unwrap();

        let mut reader = buffer.as_slice();
        let first: Value = deserialize_from(&mut reader).unwrap();
        let second: Value = deserialize_from(&mut reader).unwrap();
        assert_eq!(first, Value::from("a"));
        assert_eq!(second, Value::from(2));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_truncated_data() {
        let bytes = serialize(&Value::from("a longer string")).unwrap();
        let result: Result<Value> = deserialize_from(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(Error::CorruptedDocument(_))));
    }
}
