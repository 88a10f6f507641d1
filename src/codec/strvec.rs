//! String Vectors
//!
//! An ordered sequence of optional strings sharing one character encoding.
//!
//! Body layout:
//!
//! ```text
//! [encoding name, ASCII][0x00]
//! [u32 element count][u32 element bytes]
//! per element: [0x00]                      (null)
//!              [0x01][bytes...][0x00]      (present)
//! ```

use encoding_rs::{Encoding, UTF_8};

use super::charset::{self, TargetSet};
use super::reader::{ByteReader, ByteWriter};
use super::CodecError;

const FLAG_NULL: u8 = 0;
const FLAG_PRESENT: u8 = 1;

/// Ordered, possibly-null-containing sequence of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringVector {
    /// Elements in order.
    pub items: Vec<Option<String>>,
    /// Encoding the strings were (or will be) serialized in.
    pub encoding: &'static Encoding,
}

impl StringVector {
    /// Create a vector of present strings in UTF-8.
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: items.into_iter().map(|s| Some(s.into())).collect(),
            encoding: UTF_8,
        }
    }

    /// Create a vector from optional strings in UTF-8.
    pub fn from_options(items: Vec<Option<String>>) -> Self {
        Self { items, encoding: UTF_8 }
    }

    /// Use a different source encoding.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Number of elements (null ones included).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when there are no elements.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when every element is present.
    pub fn all_present(&self) -> bool {
        self.items.iter().all(Option::is_some)
    }

    /// Element at `index`, flattening null to `None`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.items.get(index).and_then(|s| s.as_deref())
    }

    /// Present elements, with nulls replaced by the empty string.
    pub fn into_strings(self) -> Vec<String> {
        self.items.into_iter().map(Option::unwrap_or_default).collect()
    }

    /// Declared size of the element area for already-converted items.
    pub fn element_bytes(items: &[Option<Vec<u8>>]) -> usize {
        items
            .iter()
            .map(|item| 1 + item.as_ref().map_or(0, |b| b.len() + 1))
            .sum()
    }

    /// Serialize the body, negotiating against `targets`.
    ///
    /// With no targets the vector's own encoding is used.
    pub fn encode_body(&self, out: &mut ByteWriter, targets: Option<&TargetSet>) -> Result<(), CodecError> {
        let own;
        let targets = match targets {
            Some(t) => t,
            None => {
                own = TargetSet::single(self.encoding);
                &own
            }
        };
        let converted = targets.convert(self.items.iter().map(|s| s.as_deref()));
        if converted.lossy {
            tracing::debug!(
                "Lossy conversion of {} strings to {}",
                self.items.len(),
                converted.encoding.name()
            );
        }

        let count = u32::try_from(converted.items.len()).map_err(|_| CodecError::TooLarge)?;
        let size = u32::try_from(Self::element_bytes(&converted.items)).map_err(|_| CodecError::TooLarge)?;

        out.put_cstr(converted.encoding.name().as_bytes());
        out.put_u32(count);
        out.put_u32(size);
        for item in &converted.items {
            match item {
                Some(bytes) => {
                    out.put_u8(FLAG_PRESENT);
                    out.put_cstr(bytes);
                }
                None => out.put_u8(FLAG_NULL),
            }
        }
        Ok(())
    }

    /// Parse a body.
    pub fn decode_body(input: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let encoding = charset::parse_wire_name(input.read_cstr()?)?;
        // Every element takes at least its flag byte.
        let count = input.read_len(1)?;
        let size = input.read_u32()? as usize;
        let mut elements = input.sub_reader(size)?;

        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            match elements.read_u8()? {
                FLAG_NULL => items.push(None),
                FLAG_PRESENT => {
                    let raw = elements.read_cstr()?;
                    items.push(Some(charset::decode(encoding, raw)));
                }
                other => return Err(CodecError::BadNullFlag(other)),
            }
        }
        if !elements.is_empty() {
            return Err(CodecError::LengthMismatch {
                declared: size,
                consumed: elements.position(),
            });
        }

        Ok(Self { items, encoding })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;

    fn body(v: &StringVector, targets: Option<&TargetSet>) -> Vec<u8> {
        let mut w = ByteWriter::new();
        v.encode_body(&mut w, targets).unwrap();
        w.into_inner()
    }

    #[test]
    fn test_declared_size_matches_elements() {
        let v = StringVector::from_options(vec![Some("ab".into()), None, Some(String::new())]);
        let bytes = body(&v, None);
        // "UTF-8\0" + count + size
        let header = 6 + 4 + 4;
        let size = u32::from_be_bytes(bytes[10..14].try_into().unwrap()) as usize;
        // ab: 1+2+1, null: 1, empty: 1+0+1
        assert_eq!(size, 4 + 1 + 2);
        assert_eq!(bytes.len(), header + size);
    }

    #[test]
    fn test_roundtrip_with_nulls() {
        let v = StringVector::from_options(vec![None, Some("x".into()), None]);
        let bytes = body(&v, None);
        let decoded = StringVector::decode_body(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn test_negotiated_encoding_is_recorded() {
        let v = StringVector::new(["café"]);
        let targets = TargetSet::negotiate(&["latin1"], UTF_8);
        let bytes = body(&v, Some(&targets));
        assert!(bytes.starts_with(b"windows-1252\0"));
        let decoded = StringVector::decode_body(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(decoded.encoding, WINDOWS_1252);
        assert_eq!(decoded.get(0), Some("café"));
    }

    #[test]
    fn test_bad_flag_rejected() {
        let mut w = ByteWriter::new();
        w.put_cstr(b"UTF-8");
        w.put_u32(1);
        w.put_u32(1);
        w.put_u8(7);
        let bytes = w.into_inner();
        assert!(matches!(
            StringVector::decode_body(&mut ByteReader::new(&bytes)),
            Err(CodecError::BadNullFlag(7))
        ));
    }

    #[test]
    fn test_declared_size_too_big_rejected() {
        let mut w = ByteWriter::new();
        w.put_cstr(b"UTF-8");
        w.put_u32(1);
        w.put_u32(3);
        w.put_u8(0);
        w.put_u8(0);
        w.put_u8(0);
        let bytes = w.into_inner();
        assert!(matches!(
            StringVector::decode_body(&mut ByteReader::new(&bytes)),
            Err(CodecError::LengthMismatch { declared: 3, consumed: 1 })
        ));
    }

    #[test]
    fn test_empty_encoding_name_rejected() {
        let mut w = ByteWriter::new();
        w.put_cstr(b"");
        w.put_u32(0);
        w.put_u32(0);
        let bytes = w.into_inner();
        assert!(matches!(
            StringVector::decode_body(&mut ByteReader::new(&bytes)),
            Err(CodecError::BadEncodingName(_))
        ));
    }
}
