//! Character Encoding Negotiation
//!
//! Strings travel in whatever encoding the receiving peer accepts. The
//! sender walks the receiver's list in order and picks the first encoding
//! that represents every string of a vector exactly; when none does, the
//! first listed encoding is used and unconvertible characters become
//! [`FALLBACK_CHAR`].
//!
//! Only ASCII-compatible encodings are supported, since strings are
//! NUL-terminated on the wire.

use std::borrow::Cow;

use encoding_rs::{Encoder, EncoderResult, Encoding, UTF_8};

use super::CodecError;

/// Replacement byte for characters the target encoding cannot represent.
pub const FALLBACK_CHAR: u8 = b'?';

/// Resolve an encoding label (e.g. `"UTF-8"`, `"latin1"`).
///
/// Fails for unknown labels and for encodings that are not ASCII
/// compatible.
pub fn lookup(label: &str) -> Result<&'static Encoding, CodecError> {
    Encoding::for_label(label.trim().as_bytes())
        .filter(|enc| enc.is_ascii_compatible())
        .ok_or_else(|| CodecError::UnsupportedEncoding(label.to_string()))
}

/// Validate an encoding name as read off the wire.
pub fn parse_wire_name(raw: &[u8]) -> Result<&'static Encoding, CodecError> {
    if raw.is_empty() || !raw.iter().all(|b| b.is_ascii_graphic()) {
        return Err(CodecError::BadEncodingName(
            String::from_utf8_lossy(raw).into_owned(),
        ));
    }
    // All-ASCII was checked above, so this cannot fail.
    let label = std::str::from_utf8(raw)
        .map_err(|_| CodecError::BadEncodingName(String::from_utf8_lossy(raw).into_owned()))?;
    lookup(label)
}

/// Encode `text` exactly, or return `None` if any character is lost.
pub fn encode_exact(encoding: &'static Encoding, text: &str) -> Option<Vec<u8>> {
    if text.contains('\0') {
        return None;
    }
    let (bytes, _, had_unmappable) = encoding.encode(text);
    if had_unmappable {
        None
    } else {
        Some(bytes.into_owned())
    }
}

/// Encode `text`, replacing anything unrepresentable with [`FALLBACK_CHAR`].
pub fn encode_lossy(encoding: &'static Encoding, text: &str) -> Vec<u8> {
    let text: Cow<'_, str> = if text.contains('\0') {
        Cow::Owned(text.replace('\0', "?"))
    } else {
        Cow::Borrowed(text)
    };

    let mut encoder = encoding.new_encoder();
    let mut out = Vec::with_capacity(worst_case_len(&encoder, text.len()));
    let mut src: &str = &text;
    loop {
        let (result, read) = encoder.encode_from_utf8_to_vec_without_replacement(src, &mut out, true);
        src = &src[read..];
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::OutputFull => {
                let extra = worst_case_len(&encoder, src.len());
                out.reserve(extra);
            }
            EncoderResult::Unmappable(_) => out.push(FALLBACK_CHAR),
        }
    }
    out
}

fn worst_case_len(encoder: &Encoder, len: usize) -> usize {
    encoder
        .max_buffer_length_from_utf8_without_replacement(len)
        .unwrap_or_else(|| len.saturating_mul(4))
        .max(16)
}

/// Decode bytes received in `encoding`. Malformed sequences become U+FFFD.
pub fn decode(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let (text, _had_errors) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

// =============================================================================
// TARGET SET
// =============================================================================

/// The ordered list of encodings one peer accepts.
///
/// Two peers with equal target sets always receive identical bytes for the
/// same content, which is what lets broadcast payloads be shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSet {
    encodings: Vec<&'static Encoding>,
    key: String,
}

impl TargetSet {
    /// Build a target set from the labels a peer sent.
    ///
    /// Unknown or unsupported labels are skipped; duplicates collapse to
    /// their first position. An empty result falls back to `fallback`.
    pub fn negotiate<S: AsRef<str>>(accepted: &[S], fallback: &'static Encoding) -> Self {
        let mut encodings: Vec<&'static Encoding> = Vec::with_capacity(accepted.len());
        for label in accepted {
            match lookup(label.as_ref()) {
                Ok(enc) if !encodings.contains(&enc) => encodings.push(enc),
                Ok(_) => {}
                Err(_) => tracing::debug!("Ignoring unsupported encoding {:?}", label.as_ref()),
            }
        }
        if encodings.is_empty() {
            encodings.push(fallback);
        }
        Self::from_encodings(encodings)
    }

    /// Target set containing a single encoding.
    pub fn single(encoding: &'static Encoding) -> Self {
        Self::from_encodings(vec![encoding])
    }

    fn from_encodings(encodings: Vec<&'static Encoding>) -> Self {
        let key = encodings
            .iter()
            .map(|enc| enc.name())
            .collect::<Vec<_>>()
            .join(",");
        Self { encodings, key }
    }

    /// Stable identity of this set, used as a cache key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Preferred encoding.
    pub fn primary(&self) -> &'static Encoding {
        self.encodings[0]
    }

    /// All encodings in preference order.
    pub fn encodings(&self) -> &[&'static Encoding] {
        &self.encodings
    }

    /// Convert a group of strings that must share one encoding.
    ///
    /// Returns the chosen encoding, the converted strings, and whether the
    /// conversion was lossy.
    pub fn convert<'s, I>(&self, texts: I) -> Converted
    where
        I: IntoIterator<Item = Option<&'s str>> + Clone,
    {
        for &encoding in &self.encodings {
            let exact: Option<Vec<Option<Vec<u8>>>> = texts
                .clone()
                .into_iter()
                .map(|t| match t {
                    Some(t) => encode_exact(encoding, t).map(Some),
                    None => Some(None),
                })
                .collect();
            if let Some(items) = exact {
                return Converted { encoding, items, lossy: false };
            }
        }

        let encoding = self.primary();
        let items = texts
            .into_iter()
            .map(|t| t.map(|t| encode_lossy(encoding, t)))
            .collect();
        Converted { encoding, items, lossy: true }
    }
}

impl Default for TargetSet {
    fn default() -> Self {
        Self::single(UTF_8)
    }
}

/// Result of [`TargetSet::convert`].
#[derive(Debug, Clone)]
pub struct Converted {
    /// Encoding every item was converted to.
    pub encoding: &'static Encoding,
    /// Converted bytes, without terminators.
    pub items: Vec<Option<Vec<u8>>>,
    /// Whether at least one character was replaced.
    pub lossy: bool,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

    #[test]
    fn test_lookup_rejects_utf16() {
        assert!(lookup("UTF-16LE").is_err());
        assert!(lookup("no-such-charset").is_err());
        assert_eq!(lookup("utf8").unwrap(), UTF_8);
    }

    #[test]
    fn test_wire_name_validation() {
        assert!(matches!(parse_wire_name(b""), Err(CodecError::BadEncodingName(_))));
        assert!(matches!(parse_wire_name(&[0xC3, 0xA9]), Err(CodecError::BadEncodingName(_))));
        assert!(matches!(parse_wire_name(b"KLINGON-8"), Err(CodecError::UnsupportedEncoding(_))));
        assert_eq!(parse_wire_name(b"UTF-8").unwrap(), UTF_8);
    }

    #[test]
    fn test_negotiate_skips_unknown_and_dedupes() {
        let set = TargetSet::negotiate(&["bogus", "latin1", "ISO-8859-1", "UTF-8"], UTF_8);
        assert_eq!(set.encodings(), &[WINDOWS_1252, UTF_8]);
        assert_eq!(set.key(), "windows-1252,UTF-8");
    }

    #[test]
    fn test_negotiate_empty_uses_fallback() {
        let set = TargetSet::negotiate::<&str>(&[], WINDOWS_1252);
        assert_eq!(set.primary(), WINDOWS_1252);
    }

    #[test]
    fn test_convert_picks_first_lossless() {
        // Latin-1 cannot hold the kanji, Shift_JIS can.
        let set = TargetSet::negotiate(&["ISO-8859-1", "Shift_JIS"], UTF_8);
        let out = set.convert([Some("track"), Some("日本")]);
        assert_eq!(out.encoding, SHIFT_JIS);
        assert!(!out.lossy);
    }

    #[test]
    fn test_convert_falls_back_lossy() {
        let set = TargetSet::negotiate(&["ISO-8859-1"], UTF_8);
        let out = set.convert([Some("a日b"), None]);
        assert_eq!(out.encoding, WINDOWS_1252);
        assert!(out.lossy);
        assert_eq!(out.items[0].as_deref(), Some(&b"a?b"[..]));
        assert_eq!(out.items[1], None);
    }

    #[test]
    fn test_interior_nul_is_replaced() {
        assert_eq!(encode_exact(UTF_8, "a\0b"), None);
        assert_eq!(encode_lossy(UTF_8, "a\0b"), b"a?b".to_vec());
    }

    #[test]
    fn test_decode_latin1() {
        assert_eq!(decode(WINDOWS_1252, &[0x63, 0x61, 0x66, 0xE9]), "café");
    }
}
