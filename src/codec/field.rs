//! Positional Field Records
//!
//! A record is an ordered list of fields laid out by a fixed [`Schema`].
//! The schema itself never goes on the wire; both ends hold a copy and use
//! it to validate every field header before touching the payload.
//!
//! Field layout:
//!
//! ```text
//! [u8 kind tag][u32 element count][u32 payload bytes][payload...]
//! ```

use std::fmt;

use super::charset::TargetSet;
use super::reader::{ByteReader, ByteWriter};
use super::strvec::StringVector;
use super::CodecError;

const FLAG_NULL: u8 = 0;
const FLAG_PRESENT: u8 = 1;

// =============================================================================
// SCHEMA
// =============================================================================

/// Kind of one positional field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldKind {
    /// Fixed number of big-endian i32.
    Int32Array = 1,
    /// Fixed number of non-null strings sharing one encoding.
    String = 2,
    /// Nullable byte arrays.
    ByteArray = 3,
    /// Nullable i32 arrays of any length.
    IntArrayNullable = 4,
    /// Nullable string vectors of any length.
    StringVectorNullable = 5,
    /// Opaque bytes, carried but not interpreted.
    Skip = 6,
}

impl FieldKind {
    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Int32Array),
            2 => Some(Self::String),
            3 => Some(Self::ByteArray),
            4 => Some(Self::IntArrayNullable),
            5 => Some(Self::StringVectorNullable),
            6 => Some(Self::Skip),
            _ => None,
        }
    }

    /// Wire tag.
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// One schema entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    /// Expected kind.
    pub kind: FieldKind,
    /// Expected element count.
    pub count: u32,
}

impl FieldSpec {
    /// Shorthand constructor usable in `const` schemas.
    pub const fn new(kind: FieldKind, count: u32) -> Self {
        Self { kind, count }
    }
}

/// Positional layout of one record type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schema {
    name: &'static str,
    fields: &'static [FieldSpec],
}

impl Schema {
    /// Define a schema.
    pub const fn new(name: &'static str, fields: &'static [FieldSpec]) -> Self {
        Self { name, fields }
    }

    /// Record type name, for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Entries in wire order.
    pub fn fields(&self) -> &'static [FieldSpec] {
        self.fields
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.name)?;
        for (i, spec) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}x{}", spec.kind, spec.count)?;
        }
        write!(f, "]")
    }
}

// =============================================================================
// FIELD VALUES
// =============================================================================

/// A decoded (or to-be-encoded) field value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    /// i32 values; length must equal the schema count.
    Int32Array(Vec<i32>),
    /// Strings; length must equal the schema count and none may be null.
    String(StringVector),
    /// Nullable byte arrays; length must equal the schema count.
    ByteArray(Vec<Option<Vec<u8>>>),
    /// Nullable i32 arrays; length must equal the schema count.
    IntArrayNullable(Vec<Option<Vec<i32>>>),
    /// Nullable string vectors; length must equal the schema count.
    StringVectorNullable(Vec<Option<StringVector>>),
    /// Opaque payload.
    Skip(Vec<u8>),
}

impl Field {
    /// Kind of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Int32Array(_) => FieldKind::Int32Array,
            Field::String(_) => FieldKind::String,
            Field::ByteArray(_) => FieldKind::ByteArray,
            Field::IntArrayNullable(_) => FieldKind::IntArrayNullable,
            Field::StringVectorNullable(_) => FieldKind::StringVectorNullable,
            Field::Skip(_) => FieldKind::Skip,
        }
    }

    /// Element count this value would be emitted with, or `None` for
    /// [`Field::Skip`], whose count comes from the schema.
    fn count(&self) -> Option<usize> {
        match self {
            Field::Int32Array(v) => Some(v.len()),
            Field::String(v) => Some(v.len()),
            Field::ByteArray(v) => Some(v.len()),
            Field::IntArrayNullable(v) => Some(v.len()),
            Field::StringVectorNullable(v) => Some(v.len()),
            Field::Skip(_) => None,
        }
    }
}

/// Ordered field values of one record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    /// Values in schema order.
    pub fields: Vec<Field>,
}

impl Record {
    /// Wrap field values.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }
}

// =============================================================================
// ENCODE
// =============================================================================

/// Encode `record` with each string vector in its own encoding.
pub fn encode(schema: &Schema, record: &Record) -> Result<Vec<u8>, CodecError> {
    encode_with(schema, record, None)
}

/// Encode `record`, converting strings for a receiver accepting `targets`.
pub fn encode_with(
    schema: &Schema,
    record: &Record,
    targets: Option<&TargetSet>,
) -> Result<Vec<u8>, CodecError> {
    if record.fields.len() != schema.fields.len() {
        return Err(CodecError::FieldCount {
            expected: schema.fields.len(),
            found: record.fields.len(),
        });
    }

    let mut out = ByteWriter::with_capacity(64);
    for (position, (spec, field)) in schema.fields.iter().zip(&record.fields).enumerate() {
        let count = field.count().unwrap_or(spec.count as usize);
        if field.kind() != spec.kind || count != spec.count as usize {
            return Err(CodecError::SchemaMismatch {
                position,
                expected: (spec.kind.tag(), spec.count),
                found: (field.kind().tag(), count as u32),
            });
        }

        out.put_u8(spec.kind.tag());
        out.put_u32(spec.count);
        let len_at = out.reserve_u32();
        let start = out.len();
        encode_payload(&mut out, field, targets)?;
        let len = u32::try_from(out.len() - start).map_err(|_| CodecError::TooLarge)?;
        out.patch_u32(len_at, len);
    }
    Ok(out.into_inner())
}

fn encode_payload(out: &mut ByteWriter, field: &Field, targets: Option<&TargetSet>) -> Result<(), CodecError> {
    match field {
        Field::Int32Array(values) => {
            for &v in values {
                out.put_i32(v);
            }
        }
        Field::String(vector) => {
            if !vector.all_present() {
                return Err(CodecError::NullInString);
            }
            vector.encode_body(out, targets)?;
        }
        Field::ByteArray(arrays) => {
            for array in arrays {
                match array {
                    Some(bytes) => {
                        out.put_u8(FLAG_PRESENT);
                        out.put_u32(u32::try_from(bytes.len()).map_err(|_| CodecError::TooLarge)?);
                        out.put_bytes(bytes);
                    }
                    None => out.put_u8(FLAG_NULL),
                }
            }
        }
        Field::IntArrayNullable(arrays) => {
            for array in arrays {
                match array {
                    Some(values) => {
                        out.put_u8(FLAG_PRESENT);
                        out.put_u32(u32::try_from(values.len()).map_err(|_| CodecError::TooLarge)?);
                        for &v in values {
                            out.put_i32(v);
                        }
                    }
                    None => out.put_u8(FLAG_NULL),
                }
            }
        }
        Field::StringVectorNullable(vectors) => {
            for vector in vectors {
                match vector {
                    Some(vector) => {
                        out.put_u8(FLAG_PRESENT);
                        vector.encode_body(out, targets)?;
                    }
                    None => out.put_u8(FLAG_NULL),
                }
            }
        }
        Field::Skip(bytes) => out.put_bytes(bytes),
    }
    Ok(())
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode a record laid out by `schema`.
///
/// The whole buffer must be consumed. The first field whose header does
/// not match the schema aborts decoding before its payload is read.
pub fn decode(schema: &Schema, bytes: &[u8]) -> Result<Record, CodecError> {
    let mut input = ByteReader::new(bytes);
    let mut fields = Vec::with_capacity(schema.fields.len());

    for (position, spec) in schema.fields.iter().enumerate() {
        let tag = input.read_u8()?;
        let count = input.read_u32()?;
        if tag != spec.kind.tag() || count != spec.count {
            return Err(CodecError::SchemaMismatch {
                position,
                expected: (spec.kind.tag(), spec.count),
                found: (tag, count),
            });
        }

        let declared = input.read_u32()? as usize;
        let mut payload = input.sub_reader(declared)?;
        let field = decode_payload(&mut payload, spec)?;
        if !payload.is_empty() {
            return Err(CodecError::LengthMismatch {
                declared,
                consumed: payload.position(),
            });
        }
        fields.push(field);
    }

    input.finish()?;
    Ok(Record { fields })
}

fn decode_payload(input: &mut ByteReader<'_>, spec: &FieldSpec) -> Result<Field, CodecError> {
    let count = spec.count as usize;
    let field = match spec.kind {
        FieldKind::Int32Array => {
            let mut values = Vec::with_capacity(count.min(input.remaining() / 4));
            for _ in 0..count {
                values.push(input.read_i32()?);
            }
            Field::Int32Array(values)
        }
        FieldKind::String => {
            let vector = StringVector::decode_body(input)?;
            if vector.len() != count {
                return Err(CodecError::CountMismatch {
                    expected: count,
                    found: vector.len(),
                });
            }
            if !vector.all_present() {
                return Err(CodecError::NullInString);
            }
            Field::String(vector)
        }
        FieldKind::ByteArray => {
            let mut arrays = Vec::with_capacity(count.min(input.remaining()));
            for _ in 0..count {
                arrays.push(match read_flag(input)? {
                    false => None,
                    true => {
                        let len = input.read_len(1)?;
                        Some(input.take(len)?.to_vec())
                    }
                });
            }
            Field::ByteArray(arrays)
        }
        FieldKind::IntArrayNullable => {
            let mut arrays = Vec::with_capacity(count.min(input.remaining()));
            for _ in 0..count {
                arrays.push(match read_flag(input)? {
                    false => None,
                    true => {
                        let len = input.read_len(4)?;
                        let mut values = Vec::with_capacity(len);
                        for _ in 0..len {
                            values.push(input.read_i32()?);
                        }
                        Some(values)
                    }
                });
            }
            Field::IntArrayNullable(arrays)
        }
        FieldKind::StringVectorNullable => {
            let mut vectors = Vec::with_capacity(count.min(input.remaining()));
            for _ in 0..count {
                vectors.push(match read_flag(input)? {
                    false => None,
                    true => Some(StringVector::decode_body(input)?),
                });
            }
            Field::StringVectorNullable(vectors)
        }
        FieldKind::Skip => Field::Skip(input.take(input.remaining())?.to_vec()),
    };
    Ok(field)
}

fn read_flag(input: &mut ByteReader<'_>) -> Result<bool, CodecError> {
    match input.read_u8()? {
        FLAG_NULL => Ok(false),
        FLAG_PRESENT => Ok(true),
        other => Err(CodecError::BadNullFlag(other)),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::UTF_8;
    use proptest::prelude::*;

    const ALL_KINDS: Schema = Schema::new(
        "all_kinds",
        &[
            FieldSpec::new(FieldKind::Int32Array, 3),
            FieldSpec::new(FieldKind::String, 2),
            FieldSpec::new(FieldKind::ByteArray, 2),
            FieldSpec::new(FieldKind::IntArrayNullable, 2),
            FieldSpec::new(FieldKind::StringVectorNullable, 2),
            FieldSpec::new(FieldKind::Skip, 1),
        ],
    );

    fn sample() -> Record {
        Record::new(vec![
            Field::Int32Array(vec![1, -2, i32::MAX]),
            Field::String(StringVector::new(["id-1", "Name"])),
            Field::ByteArray(vec![Some(vec![0, 1, 2, 255]), None]),
            Field::IntArrayNullable(vec![None, Some(vec![7, 8])]),
            Field::StringVectorNullable(vec![
                Some(StringVector::from_options(vec![Some("a".into()), None])),
                None,
            ]),
            Field::Skip(vec![9, 9, 9]),
        ])
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let record = sample();
        let bytes = encode(&ALL_KINDS, &record).unwrap();
        assert_eq!(decode(&ALL_KINDS, &bytes).unwrap(), record);
    }

    #[test]
    fn test_int32_is_big_endian() {
        const ONE: Schema = Schema::new("one", &[FieldSpec::new(FieldKind::Int32Array, 1)]);
        let bytes = encode(&ONE, &Record::new(vec![Field::Int32Array(vec![0x0102_0304])])).unwrap();
        assert_eq!(bytes, vec![1, 0, 0, 0, 1, 0, 0, 0, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn test_count_mismatch_rejected() {
        const TWO: Schema = Schema::new("two", &[FieldSpec::new(FieldKind::Int32Array, 2)]);
        const THREE: Schema = Schema::new("three", &[FieldSpec::new(FieldKind::Int32Array, 3)]);
        let bytes = encode(&TWO, &Record::new(vec![Field::Int32Array(vec![1, 2])])).unwrap();
        assert!(matches!(
            decode(&THREE, &bytes),
            Err(CodecError::SchemaMismatch { position: 0, expected: (1, 3), found: (1, 2) })
        ));
    }

    #[test]
    fn test_encode_rejects_wrong_record() {
        let mut record = sample();
        record.fields[0] = Field::Int32Array(vec![1]);
        assert!(matches!(
            encode(&ALL_KINDS, &record),
            Err(CodecError::SchemaMismatch { position: 0, .. })
        ));

        record.fields.pop();
        assert!(matches!(encode(&ALL_KINDS, &record), Err(CodecError::FieldCount { .. })));
    }

    #[test]
    fn test_null_in_string_rejected() {
        const S: Schema = Schema::new("s", &[FieldSpec::new(FieldKind::String, 1)]);
        let record = Record::new(vec![Field::String(StringVector::from_options(vec![None]))]);
        assert!(matches!(encode(&S, &record), Err(CodecError::NullInString)));
    }

    #[test]
    fn test_truncated_buffer() {
        let bytes = encode(&ALL_KINDS, &sample()).unwrap();
        for cut in [1, 5, 9, 20, bytes.len() - 1] {
            assert!(decode(&ALL_KINDS, &bytes[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&ALL_KINDS, &sample()).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode(&ALL_KINDS, &bytes),
            Err(CodecError::TrailingBytes { count: 1 })
        ));
    }

    #[test]
    fn test_field_length_must_match_payload() {
        const ONE: Schema = Schema::new("one", &[FieldSpec::new(FieldKind::Int32Array, 1)]);
        // Declares 8 payload bytes for a single i32.
        let bytes = vec![1, 0, 0, 0, 1, 0, 0, 0, 8, 0, 0, 0, 1, 0, 0, 0, 2];
        assert!(matches!(
            decode(&ONE, &bytes),
            Err(CodecError::LengthMismatch { declared: 8, consumed: 4 })
        ));
    }

    #[test]
    fn test_lossy_target_still_encodes() {
        const S: Schema = Schema::new("s", &[FieldSpec::new(FieldKind::String, 1)]);
        let record = Record::new(vec![Field::String(StringVector::new(["Motörhead ☠"]))]);
        let targets = TargetSet::negotiate(&["latin1"], UTF_8);
        let bytes = encode_with(&S, &record, Some(&targets)).unwrap();
        let decoded = decode(&S, &bytes).unwrap();
        match &decoded.fields[0] {
            Field::String(v) => assert_eq!(v.get(0), Some("Motörhead ?")),
            other => panic!("unexpected field {:?}", other),
        }
    }

    fn text() -> impl Strategy<Value = String> {
        "[^\\x00]{0,12}"
    }

    fn field_strategy() -> impl Strategy<Value = Record> {
        (
            prop::collection::vec(any::<i32>(), 3),
            prop::collection::vec(text(), 2),
            prop::collection::vec(prop::option::of(prop::collection::vec(any::<u8>(), 0..16)), 2),
            prop::collection::vec(prop::option::of(prop::collection::vec(any::<i32>(), 0..8)), 2),
            prop::collection::vec(
                prop::option::of(prop::collection::vec(prop::option::of(text()), 0..6)),
                2,
            ),
            prop::collection::vec(any::<u8>(), 0..8),
        )
            .prop_map(|(ints, strings, bytes, int_arrays, vectors, skip)| {
                Record::new(vec![
                    Field::Int32Array(ints),
                    Field::String(StringVector::new(strings)),
                    Field::ByteArray(bytes),
                    Field::IntArrayNullable(int_arrays),
                    Field::StringVectorNullable(
                        vectors
                            .into_iter()
                            .map(|v| v.map(StringVector::from_options))
                            .collect(),
                    ),
                    Field::Skip(skip),
                ])
            })
    }

    proptest! {
        #[test]
        fn prop_roundtrip(record in field_strategy()) {
            let bytes = encode(&ALL_KINDS, &record).unwrap();
            prop_assert_eq!(decode(&ALL_KINDS, &bytes).unwrap(), record);
        }

        #[test]
        fn prop_header_mismatch_rejected(
            record in field_strategy(),
            position in 0usize..6,
            bump in 1u32..4,
        ) {
            // Decode against a schema that disagrees at exactly one position.
            let mut specs: Vec<FieldSpec> = ALL_KINDS.fields().to_vec();
            specs[position].count += bump;
            let leaked: &'static [FieldSpec] = Box::leak(specs.into_boxed_slice());
            let other = Schema::new("other", leaked);

            let bytes = encode(&ALL_KINDS, &record).unwrap();
            match decode(&other, &bytes) {
                Err(CodecError::SchemaMismatch { position: p, .. }) => prop_assert_eq!(p, position),
                other => prop_assert!(false, "expected mismatch, got {:?}", other),
            }
        }

        #[test]
        fn prop_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&ALL_KINDS, &bytes);
        }
    }
}
