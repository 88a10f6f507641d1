//! Wire Codec
//!
//! Self-describing positional records used for every message payload.
//!
//! - `reader.rs`  - bounded byte cursors
//! - `charset.rs` - per-peer character encoding negotiation
//! - `strvec.rs`  - string vectors
//! - `field.rs`   - schemas, field values, encode/decode
//!
//! All functions here are pure transforms over immutable inputs.

pub mod charset;
pub mod field;
pub mod reader;
pub mod strvec;

use thiserror::Error;

pub use charset::TargetSet;
pub use field::{decode, encode, encode_with, Field, FieldKind, FieldSpec, Record, Schema};
pub use strvec::StringVector;

/// Codec errors.
///
/// Any of these on an inbound message means the peer speaks a different
/// protocol version or is broken; the connection is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Buffer ended early.
    #[error("truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the next read required.
        needed: usize,
        /// Bytes that were left.
        available: usize,
    },

    /// Field header disagrees with the schema.
    #[error("field {position}: expected (tag {}, count {}), found (tag {}, count {})",
        .expected.0, .expected.1, .found.0, .found.1)]
    SchemaMismatch {
        /// Field index.
        position: usize,
        /// Schema `(tag, count)`.
        expected: (u8, u32),
        /// Observed `(tag, count)`.
        found: (u8, u32),
    },

    /// Record has a different number of fields than its schema.
    #[error("record has {found} fields, schema has {expected}")]
    FieldCount {
        /// Schema length.
        expected: usize,
        /// Record length.
        found: usize,
    },

    /// Element count inside a payload disagrees with the header.
    #[error("expected {expected} elements, found {found}")]
    CountMismatch {
        /// Header count.
        expected: usize,
        /// Actual count.
        found: usize,
    },

    /// A declared byte length disagrees with the bytes its content used.
    #[error("declared {declared} bytes, consumed {consumed}")]
    LengthMismatch {
        /// Declared length.
        declared: usize,
        /// Bytes actually consumed.
        consumed: usize,
    },

    /// Bytes left over after the last field.
    #[error("{count} trailing bytes")]
    TrailingBytes {
        /// Leftover byte count.
        count: usize,
    },

    /// Encoding name empty or not ASCII.
    #[error("bad encoding name {0:?}")]
    BadEncodingName(String),

    /// Encoding name not supported.
    #[error("unsupported encoding {0:?}")]
    UnsupportedEncoding(String),

    /// Null flag byte other than 0 or 1.
    #[error("bad null flag {0}")]
    BadNullFlag(u8),

    /// String without NUL terminator.
    #[error("unterminated string")]
    UnterminatedString,

    /// Null element in a non-nullable string field.
    #[error("null element in string field")]
    NullInString,

    /// Value does not fit a u32 length.
    #[error("value too large to encode")]
    TooLarge,

    /// Record decoded but its values are not valid for the message type.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// What was wrong.
        reason: String,
    },
}

// =============================================================================
// TYPED RECORDS
// =============================================================================

/// A message payload type with a fixed wire schema.
pub trait WireRecord: Sized {
    /// Layout of this record.
    const SCHEMA: Schema;

    /// Convert to positional field values.
    fn to_record(&self) -> Record;

    /// Build from positional field values already validated against
    /// [`WireRecord::SCHEMA`].
    fn from_record(record: Record) -> Result<Self, CodecError>;

    /// Encode in the record's own string encodings.
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        field::encode(&Self::SCHEMA, &self.to_record())
    }

    /// Encode for a peer accepting `targets`.
    fn encode_for(&self, targets: &TargetSet) -> Result<Vec<u8>, CodecError> {
        field::encode_with(&Self::SCHEMA, &self.to_record(), Some(targets))
    }

    /// Decode and convert.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_record(field::decode(&Self::SCHEMA, bytes)?)
    }
}

/// Sequential typed access to the fields of a decoded record.
///
/// `decode` already checked every header, so a kind mismatch here means a
/// `from_record` impl disagrees with its own schema.
pub struct FieldCursor {
    fields: std::vec::IntoIter<Field>,
    position: usize,
}

impl FieldCursor {
    /// Start at the first field.
    pub fn new(record: Record) -> Self {
        Self {
            fields: record.fields.into_iter(),
            position: 0,
        }
    }

    fn next(&mut self) -> Result<(usize, Field), CodecError> {
        let position = self.position;
        self.position += 1;
        self.fields
            .next()
            .map(|field| (position, field))
            .ok_or(CodecError::FieldCount {
                expected: position + 1,
                found: position,
            })
    }

    fn mismatch(position: usize, expected: FieldKind, found: &Field) -> CodecError {
        CodecError::SchemaMismatch {
            position,
            expected: (expected.tag(), 0),
            found: (found.kind().tag(), 0),
        }
    }

    /// Next field as i32 values.
    pub fn ints(&mut self) -> Result<Vec<i32>, CodecError> {
        match self.next()? {
            (_, Field::Int32Array(v)) => Ok(v),
            (at, other) => Err(Self::mismatch(at, FieldKind::Int32Array, &other)),
        }
    }

    /// Next field as non-null strings.
    pub fn strings(&mut self) -> Result<Vec<String>, CodecError> {
        match self.next()? {
            (_, Field::String(v)) => Ok(v.into_strings()),
            (at, other) => Err(Self::mismatch(at, FieldKind::String, &other)),
        }
    }

    /// Next field as nullable byte arrays.
    pub fn byte_arrays(&mut self) -> Result<Vec<Option<Vec<u8>>>, CodecError> {
        match self.next()? {
            (_, Field::ByteArray(v)) => Ok(v),
            (at, other) => Err(Self::mismatch(at, FieldKind::ByteArray, &other)),
        }
    }

    /// Next field as nullable int arrays.
    pub fn int_arrays(&mut self) -> Result<Vec<Option<Vec<i32>>>, CodecError> {
        match self.next()? {
            (_, Field::IntArrayNullable(v)) => Ok(v),
            (at, other) => Err(Self::mismatch(at, FieldKind::IntArrayNullable, &other)),
        }
    }

    /// Next field as nullable string vectors.
    pub fn string_vectors(&mut self) -> Result<Vec<Option<StringVector>>, CodecError> {
        match self.next()? {
            (_, Field::StringVectorNullable(v)) => Ok(v),
            (at, other) => Err(Self::mismatch(at, FieldKind::StringVectorNullable, &other)),
        }
    }

    /// Next field, which must be opaque, discarded.
    pub fn skip(&mut self) -> Result<(), CodecError> {
        match self.next()? {
            (_, Field::Skip(_)) => Ok(()),
            (at, other) => Err(Self::mismatch(at, FieldKind::Skip, &other)),
        }
    }
}

/// Flatten a nullable-vector field holding one vector into its strings.
///
/// A null vector yields an empty list; null elements become empty strings.
pub fn single_vector(mut vectors: Vec<Option<StringVector>>) -> Vec<String> {
    match vectors.pop().flatten() {
        Some(v) => v.into_strings(),
        None => Vec::new(),
    }
}

/// Wrap strings as a one-vector nullable field.
pub fn vector_field<I, S>(items: I) -> Field
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Field::StringVectorNullable(vec![Some(StringVector::new(items))])
}
