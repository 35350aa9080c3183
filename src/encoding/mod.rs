//! Binary framing shared by every document writer.
//!
//! Integers are big-endian. Strings are length-prefixed:
//!
//! ```text
//! +-----------+-----------------+
//! |length:u32 | utf-8 bytes     |
//! +-----------+-----------------+
//! ```
//!
//! A manifest is a run of such strings terminated by end of stream. Values
//! are bincode encoded and self-delimiting.

pub mod bincode;

use std::io::{ErrorKind, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::value::Value;
use crate::Error;

pub fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    writer.write_u32::<BigEndian>(s.len() as u32)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

/// Reads one length-prefixed string, `None` on a clean end of stream.
pub fn read_string<R: Read>(reader: &mut R) -> Result<Option<String>> {
    let len = match reader.read_u32::<BigEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::IoError(e)),
    };
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            Error::CorruptedDocument("unexpected end of stream in string".to_string())
        }
        _ => Error::IoError(e),
    })?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| Error::Decode("string", e.to_string()))
}

/// Reads a string that must be present.
pub fn expect_string<R: Read>(reader: &mut R, what: &str) -> Result<String> {
    read_string(reader)?
        .ok_or_else(|| Error::CorruptedDocument(format!("missing {}", what)))
}

pub fn write_manifest<W: Write>(writer: &mut W, names: &[String]) -> Result<()> {
    for name in names {
        write_string(writer, name)?;
    }
    Ok(())
}

pub fn read_manifest<R: Read>(reader: &mut R) -> Result<Vec<String>> {
    let mut names = Vec::new();
    while let Some(name) = read_string(reader)? {
        names.push(name);
    }
    Ok(names)
}

pub fn write_string_list<W: Write>(writer: &mut W, items: &[String]) -> Result<()> {
    writer.write_u32::<BigEndian>(items.len() as u32)?;
    for item in items {
        write_string(writer, item)?;
    }
    Ok(())
}

pub fn read_string_list<R: Read>(reader: &mut R) -> Result<Vec<String>> {
    let count = reader.read_u32::<BigEndian>()? as usize;
    (0..count)
        .map(|_| expect_string(reader, "list entry"))
        .collect()
}

pub fn write_values<W: Write>(writer: &mut W, values: &[Value]) -> Result<()> {
    writer.write_u32::<BigEndian>(values.len() as u32)?;
    for value in values {
        bincode::serialize_into(&mut *writer, value)?;
    }
    Ok(())
}

pub fn read_values<R: Read>(reader: &mut R) -> Result<Vec<Value>> {
    let count = reader.read_u32::<BigEndian>()? as usize;
    (0..count)
        .map(|_| bincode::deserialize_from(&mut *reader))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_ends_at_eof() -> Result<()> {
        let names = vec!["dim/a".to_string(), "".to_string(), "cube/x/fact".to_string()];
        let mut buf = Vec::new();
        write_manifest(&mut buf, &names)?;

        assert_eq!(read_manifest(&mut buf.as_slice())?, names);
        assert!(read_manifest(&mut &b""[..])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_truncated_string() -> Result<()> {
        let mut buf = Vec::new();
        write_string(&mut buf, "hierarchy")?;
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            read_string(&mut buf.as_slice()),
            Err(Error::CorruptedDocument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_values_and_lists() -> Result<()> {
        let mut buf = Vec::new();
        write_string_list(&mut buf, &["k1".to_string(), "k2".to_string()])?;
        write_values(&mut buf, &[Value::from(1), Value::Null, Value::from("x")])?;

        let mut reader = buf.as_slice();
        assert_eq!(read_string_list(&mut reader)?, vec!["k1", "k2"]);
        assert_eq!(
            read_values(&mut reader)?,
            vec![Value::from(1), Value::Null, Value::from("x")]
        );
        Ok(())
    }
}
