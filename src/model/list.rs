//! Lists and Library
//!
//! Item lists (playlist, queue, any named list) and the library, which is a
//! list of lists. Both are truncated to a configurable length before being
//! put on the wire; truncation is made visible with a sentinel entry.

use crate::codec::{
    single_vector, CodecError, Field, FieldCursor, FieldKind, FieldSpec, Record, Schema,
    StringVector, WireRecord,
};

/// Display string of the sentinel entry appended to truncated lists.
pub const TRUNCATED_TITLE: &str = "(truncated)";

// =============================================================================
// ENTRIES
// =============================================================================

/// Reference to an item inside a list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ItemRef {
    /// Item id.
    pub id: String,
    /// Display title.
    pub title: String,
}

impl ItemRef {
    /// Create a reference.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// A named list, as listed in the library or nested in another list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ListEntry {
    /// List id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Bitset of `ListEntry::FLAG_*`.
    pub flags: u32,
}

impl ListEntry {
    /// The list can be modified by the player.
    pub const FLAG_EDITABLE: u32 = 1 << 0;
    /// The list is generated dynamically (smart playlist, radio).
    pub const FLAG_DYNAMIC: u32 = 1 << 1;
    /// The list is the player's currently active playlist.
    pub const FLAG_ACTIVE: u32 = 1 << 2;

    /// Create an entry.
    pub fn new(id: impl Into<String>, name: impl Into<String>, flags: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            flags,
        }
    }
}

/// Contents of one list as returned by the controller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListContents {
    /// Lists nested in this list.
    pub nested: Vec<ListEntry>,
    /// Items in this list.
    pub items: Vec<ItemRef>,
}

// =============================================================================
// TRUNCATION
// =============================================================================

/// Entry types that can stand in as a truncation sentinel.
pub trait Truncatable: Clone {
    /// Sentinel following `last`, the final entry that was kept.
    fn sentinel(last: &Self) -> Self;
}

impl Truncatable for ItemRef {
    fn sentinel(last: &Self) -> Self {
        ItemRef::new(last.id.clone(), TRUNCATED_TITLE)
    }
}

impl Truncatable for ListEntry {
    fn sentinel(last: &Self) -> Self {
        ListEntry::new(last.id.clone(), TRUNCATED_TITLE, 0)
    }
}

/// Keep at most `limit` entries; if any were dropped, append a sentinel.
///
/// The result of truncating a list longer than `limit` always has exactly
/// `limit + 1` entries.
pub fn truncate<T: Truncatable>(entries: &[T], limit: usize) -> Vec<T> {
    if entries.len() <= limit {
        return entries.to_vec();
    }
    let mut kept = entries[..limit].to_vec();
    // With a zero limit there is no kept entry; borrow the first id instead.
    let last = kept.last().unwrap_or(&entries[0]);
    let sentinel = T::sentinel(last);
    kept.push(sentinel);
    kept
}

// =============================================================================
// WIRE RECORDS
// =============================================================================

/// A list as sent to clients (playlist, queue, list-response).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPayload {
    /// List id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Nested lists.
    pub nested: Vec<ListEntry>,
    /// Items.
    pub items: Vec<ItemRef>,
}

impl ListPayload {
    /// Build a payload, truncating both nested lists and items to `limit`.
    pub fn build(id: impl Into<String>, name: impl Into<String>, contents: &ListContents, limit: usize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nested: truncate(&contents.nested, limit),
            items: truncate(&contents.items, limit),
        }
    }

    /// Build a payload for a flat item list such as the playlist or queue.
    pub fn from_items(id: impl Into<String>, name: impl Into<String>, items: &[ItemRef], limit: usize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nested: Vec::new(),
            items: truncate(items, limit),
        }
    }
}

impl WireRecord for ListPayload {
    const SCHEMA: Schema = Schema::new(
        "list",
        &[
            FieldSpec::new(FieldKind::String, 2),
            FieldSpec::new(FieldKind::StringVectorNullable, 2),
            FieldSpec::new(FieldKind::IntArrayNullable, 1),
            FieldSpec::new(FieldKind::StringVectorNullable, 2),
        ],
    );

    fn to_record(&self) -> Record {
        Record::new(vec![
            Field::String(StringVector::new([self.id.as_str(), self.name.as_str()])),
            entry_names(&self.nested),
            entry_flags(&self.nested),
            Field::StringVectorNullable(vec![
                Some(StringVector::new(self.items.iter().map(|i| i.id.as_str()))),
                Some(StringVector::new(self.items.iter().map(|i| i.title.as_str()))),
            ]),
        ])
    }

    fn from_record(record: Record) -> Result<Self, CodecError> {
        let mut cursor = FieldCursor::new(record);
        let mut header = cursor.strings()?.into_iter();
        let id = header.next().unwrap_or_default();
        let name = header.next().unwrap_or_default();
        let nested = zip_entries(cursor.string_vectors()?, cursor.int_arrays()?)?;
        let items = zip_items(cursor.string_vectors()?)?;
        Ok(Self { id, name, nested, items })
    }
}

/// The library: every named list a player exposes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LibraryPayload {
    /// Lists in library order.
    pub lists: Vec<ListEntry>,
}

impl LibraryPayload {
    /// Build a payload truncated to `limit`.
    pub fn build(lists: &[ListEntry], limit: usize) -> Self {
        Self {
            lists: truncate(lists, limit),
        }
    }
}

impl WireRecord for LibraryPayload {
    const SCHEMA: Schema = Schema::new(
        "library",
        &[
            FieldSpec::new(FieldKind::StringVectorNullable, 2),
            FieldSpec::new(FieldKind::IntArrayNullable, 1),
        ],
    );

    fn to_record(&self) -> Record {
        Record::new(vec![entry_names(&self.lists), entry_flags(&self.lists)])
    }

    fn from_record(record: Record) -> Result<Self, CodecError> {
        let mut cursor = FieldCursor::new(record);
        let lists = zip_entries(cursor.string_vectors()?, cursor.int_arrays()?)?;
        Ok(Self { lists })
    }
}

fn entry_names(entries: &[ListEntry]) -> Field {
    Field::StringVectorNullable(vec![
        Some(StringVector::new(entries.iter().map(|e| e.id.as_str()))),
        Some(StringVector::new(entries.iter().map(|e| e.name.as_str()))),
    ])
}

fn entry_flags(entries: &[ListEntry]) -> Field {
    Field::IntArrayNullable(vec![Some(entries.iter().map(|e| e.flags as i32).collect())])
}

fn split_pair(mut vectors: Vec<Option<StringVector>>) -> (Vec<String>, Vec<String>) {
    let second = vectors.pop().flatten();
    let first = vectors.pop().flatten();
    (
        single_vector(vec![first]),
        single_vector(vec![second]),
    )
}

fn zip_entries(
    names: Vec<Option<StringVector>>,
    flags: Vec<Option<Vec<i32>>>,
) -> Result<Vec<ListEntry>, CodecError> {
    let (ids, names) = split_pair(names);
    let flags = flags.into_iter().next().flatten().unwrap_or_default();
    if ids.len() != names.len() || (!flags.is_empty() && flags.len() != ids.len()) {
        return Err(CodecError::InvalidValue {
            field: "nested",
            reason: format!("{} ids, {} names, {} flags", ids.len(), names.len(), flags.len()),
        });
    }
    Ok(ids
        .into_iter()
        .zip(names)
        .enumerate()
        .map(|(i, (id, name))| ListEntry {
            id,
            name,
            flags: flags.get(i).copied().unwrap_or(0) as u32,
        })
        .collect())
}

fn zip_items(vectors: Vec<Option<StringVector>>) -> Result<Vec<ItemRef>, CodecError> {
    let (ids, titles) = split_pair(vectors);
    if ids.len() != titles.len() {
        return Err(CodecError::InvalidValue {
            field: "items",
            reason: format!("{} ids, {} titles", ids.len(), titles.len()),
        });
    }
    Ok(ids
        .into_iter()
        .zip(titles)
        .map(|(id, title)| ItemRef { id, title })
        .collect())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<ItemRef> {
        (0..n)
            .map(|i| ItemRef::new(format!("id{}", i), format!("Track {}", i)))
            .collect()
    }

    #[test]
    fn test_truncation_appends_sentinel() {
        let limit = 25;
        let source = items(limit + 10);
        let out = truncate(&source, limit);
        assert_eq!(out.len(), limit + 1);
        let sentinel = out.last().unwrap();
        assert_eq!(sentinel.title, TRUNCATED_TITLE);
        assert_eq!(sentinel.id, source[limit - 1].id);
        assert_eq!(&out[..limit], &source[..limit]);
    }

    #[test]
    fn test_no_truncation_at_limit() {
        let source = items(5);
        assert_eq!(truncate(&source, 5), source);
        assert_eq!(truncate(&source, 6), source);
    }

    #[test]
    fn test_zero_limit() {
        let out = truncate(&items(3), 0);
        assert_eq!(out, vec![ItemRef::new("id0", TRUNCATED_TITLE)]);
    }

    #[test]
    fn test_serialized_list_has_limit_plus_one() {
        let limit = 100;
        let contents = ListContents {
            nested: Vec::new(),
            items: items(limit + 10),
        };
        let payload = ListPayload::build("pl", "Playlist", &contents, limit);
        let decoded = ListPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded.items.len(), limit + 1);
        assert_eq!(decoded.items[limit].title, TRUNCATED_TITLE);
    }

    #[test]
    fn test_list_roundtrip_with_nested() {
        let payload = ListPayload {
            id: "lib:rock".into(),
            name: "Rock".into(),
            nested: vec![
                ListEntry::new("lib:rock:70s", "70s", ListEntry::FLAG_EDITABLE),
                ListEntry::new("lib:rock:80s", "80s", ListEntry::FLAG_DYNAMIC),
            ],
            items: items(3),
        };
        let decoded = ListPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_library_roundtrip() {
        let payload = LibraryPayload {
            lists: vec![
                ListEntry::new("a", "Favourites", ListEntry::FLAG_EDITABLE),
                ListEntry::new("b", "Radio", ListEntry::FLAG_DYNAMIC | ListEntry::FLAG_ACTIVE),
            ],
        };
        assert_eq!(LibraryPayload::decode(&payload.encode().unwrap()).unwrap(), payload);
    }

    #[test]
    fn test_mismatched_columns_rejected() {
        let record = Record::new(vec![
            Field::StringVectorNullable(vec![
                Some(StringVector::new(["a", "b"])),
                Some(StringVector::new(["only one"])),
            ]),
            Field::IntArrayNullable(vec![None]),
        ]);
        let bytes = crate::codec::encode(&LibraryPayload::SCHEMA, &record).unwrap();
        assert!(matches!(
            LibraryPayload::decode(&bytes),
            Err(CodecError::InvalidValue { .. })
        ));
    }
}
