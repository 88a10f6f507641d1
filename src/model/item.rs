//! Items
//!
//! A playable item with its metadata. Metadata is a set of name/value pairs;
//! its order carries no meaning, so equality ignores it.

use crate::codec::{
    single_vector, vector_field, CodecError, Field, FieldCursor, FieldKind, FieldSpec, Record,
    Schema, StringVector, WireRecord,
};

/// Well-known metadata names.
pub mod meta {
    /// Title.
    pub const TITLE: &str = "title";
    /// Artist.
    pub const ARTIST: &str = "artist";
    /// Album.
    pub const ALBUM: &str = "album";
    /// Length in seconds.
    pub const LENGTH: &str = "length";
    /// Rating, 0..=max_rating of the player.
    pub const RATING: &str = "rating";
}

/// Item metadata as fetched from the upstream controller.
#[derive(Clone, Debug, Default)]
pub struct Item {
    /// Item id.
    pub id: String,
    /// Name/value pairs.
    pub metadata: Vec<(String, String)>,
    /// Image reference (path or URI) the controller can resolve, if any.
    pub image: Option<String>,
}

impl Item {
    /// Create an item without metadata.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: Vec::new(),
            image: None,
        }
    }

    /// Add a metadata pair.
    pub fn with_meta(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((name.into(), value.into()));
        self
    }

    /// Set the image reference.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Look up a metadata value by name.
    pub fn meta(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn sorted_metadata(&self) -> Vec<&(String, String)> {
        let mut pairs: Vec<_> = self.metadata.iter().collect();
        pairs.sort();
        pairs
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.image == other.image
            && self.metadata.len() == other.metadata.len()
            && self.sorted_metadata() == other.sorted_metadata()
    }
}

impl Eq for Item {}

/// Largest image a client wants to receive, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DisplayLimits {
    /// Maximum width.
    pub width: u32,
    /// Maximum height.
    pub height: u32,
}

impl DisplayLimits {
    /// Create limits.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether the client accepts images at all.
    pub fn wants_images(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

// =============================================================================
// WIRE RECORD
// =============================================================================

/// An item as sent to clients, optionally carrying image bytes.
///
/// Broadcast active-item payloads never carry image data; only responses to
/// an explicit item request do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemPayload {
    /// The item.
    pub item: Item,
    /// Raw image bytes.
    pub image_data: Option<Vec<u8>>,
}

impl ItemPayload {
    /// Payload without image bytes.
    pub fn without_image(item: Item) -> Self {
        Self { item, image_data: None }
    }
}

impl WireRecord for ItemPayload {
    const SCHEMA: Schema = Schema::new(
        "item",
        &[
            FieldSpec::new(FieldKind::String, 1),
            FieldSpec::new(FieldKind::StringVectorNullable, 1),
            FieldSpec::new(FieldKind::StringVectorNullable, 1),
            FieldSpec::new(FieldKind::ByteArray, 1),
        ],
    );

    fn to_record(&self) -> Record {
        let flat = self
            .item
            .metadata
            .iter()
            .flat_map(|(n, v)| [n.as_str(), v.as_str()]);
        let image = self
            .item
            .image
            .as_deref()
            .map(|r| StringVector::new([r]));
        Record::new(vec![
            Field::String(StringVector::new([self.item.id.as_str()])),
            vector_field(flat),
            Field::StringVectorNullable(vec![image]),
            Field::ByteArray(vec![self.image_data.clone()]),
        ])
    }

    fn from_record(record: Record) -> Result<Self, CodecError> {
        let mut cursor = FieldCursor::new(record);
        let id = cursor.strings()?.into_iter().next().unwrap_or_default();
        let flat = single_vector(cursor.string_vectors()?);
        if flat.len() % 2 != 0 {
            return Err(CodecError::InvalidValue {
                field: "metadata",
                reason: format!("odd number of strings ({})", flat.len()),
            });
        }
        let mut metadata = Vec::with_capacity(flat.len() / 2);
        let mut it = flat.into_iter();
        while let (Some(name), Some(value)) = (it.next(), it.next()) {
            metadata.push((name, value));
        }
        let image = cursor
            .string_vectors()?
            .pop()
            .flatten()
            .and_then(|v| v.into_strings().into_iter().next());
        let image_data = cursor.byte_arrays()?.pop().flatten();
        Ok(Self {
            item: Item { id, metadata, image },
            image_data,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Item {
        Item::new("file:///music/a.flac")
            .with_meta(meta::TITLE, "Blue in Green")
            .with_meta(meta::ARTIST, "Miles Davis")
            .with_meta(meta::LENGTH, "337")
    }

    #[test]
    fn test_metadata_order_ignored() {
        let a = sample();
        let mut b = sample();
        b.metadata.reverse();
        assert_eq!(a, b);

        let c = sample().with_meta(meta::RATING, "4");
        assert_ne!(a, c);
    }

    #[test]
    fn test_item_roundtrip_with_image() {
        let payload = ItemPayload {
            item: sample().with_image("/covers/kind-of-blue.jpg"),
            image_data: Some(vec![0xFF, 0xD8, 0xFF, 0xE0]),
        };
        let decoded = ItemPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.item.meta(meta::ARTIST), Some("Miles Davis"));
    }

    #[test]
    fn test_item_without_image_has_null_fields() {
        let payload = ItemPayload::without_image(Item::new("x"));
        let decoded = ItemPayload::decode(&payload.encode().unwrap()).unwrap();
        assert!(decoded.item.image.is_none());
        assert!(decoded.image_data.is_none());
        assert!(decoded.item.metadata.is_empty());
    }

    #[test]
    fn test_odd_metadata_rejected() {
        let record = Record::new(vec![
            Field::String(StringVector::new(["x"])),
            vector_field(["title"]),
            Field::StringVectorNullable(vec![None]),
            Field::ByteArray(vec![None]),
        ]);
        let bytes = crate::codec::encode(&ItemPayload::SCHEMA, &record).unwrap();
        assert!(matches!(
            ItemPayload::decode(&bytes),
            Err(CodecError::InvalidValue { field: "metadata", .. })
        ));
    }
}
