//! State Hashing for Change Detection
//!
//! Order-sensitive SHA-256 digests of player state. A fingerprint is a few
//! of these; comparing two fingerprints tells which sections changed.

use sha2::{Digest, Sha256};

/// 256-bit digest.
pub type StateHash = [u8; 32];

/// Which part of the state a digest covers.
///
/// Each domain seeds the hasher with its own tag, so a playlist and a queue
/// with the same entries hash differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashDomain {
    /// Basic status fields.
    Status,
    /// The playlist.
    Playlist,
    /// The queue.
    Queue,
}

impl HashDomain {
    fn tag(self) -> &'static [u8] {
        match self {
            HashDomain::Status => b"relay/status/1",
            HashDomain::Playlist => b"relay/playlist/1",
            HashDomain::Queue => b"relay/queue/1",
        }
    }
}

/// Incremental, order-sensitive hasher.
pub struct StateHasher {
    digest: Sha256,
}

impl StateHasher {
    /// Start a digest for `domain`.
    pub fn new(domain: HashDomain) -> Self {
        let mut digest = Sha256::new();
        digest.update(domain.tag());
        Self { digest }
    }

    /// Feed a length.
    pub fn update_u64(&mut self, value: u64) {
        self.digest.update(value.to_be_bytes());
    }

    /// Feed a signed value.
    pub fn update_i32(&mut self, value: i32) {
        self.digest.update(value.to_be_bytes());
    }

    /// Feed a flag.
    pub fn update_bool(&mut self, value: bool) {
        self.digest.update([u8::from(value)]);
    }

    /// Feed a string, length first so `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn update_str(&mut self, value: &str) {
        self.update_u64(value.len() as u64);
        self.digest.update(value.as_bytes());
    }

    /// Finish.
    pub fn finalize(self) -> StateHash {
        self.digest.finalize().into()
    }
}

/// First four bytes as hex, for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(domain: HashDomain, values: &[i32]) -> StateHash {
        let mut h = StateHasher::new(domain);
        for v in values {
            h.update_i32(*v);
        }
        h.finalize()
    }

    #[test]
    fn test_same_input_same_digest() {
        assert_eq!(digest(HashDomain::Status, &[1, 50, -1]), digest(HashDomain::Status, &[1, 50, -1]));
    }

    #[test]
    fn test_order_changes_digest() {
        assert_ne!(digest(HashDomain::Playlist, &[1, 2]), digest(HashDomain::Playlist, &[2, 1]));
    }

    #[test]
    fn test_domains_differ() {
        assert_ne!(digest(HashDomain::Playlist, &[7]), digest(HashDomain::Queue, &[7]));
    }

    #[test]
    fn test_string_boundaries_matter() {
        let hash = |parts: &[&str]| {
            let mut h = StateHasher::new(HashDomain::Queue);
            for p in parts {
                h.update_str(p);
            }
            h.finalize()
        };
        assert_ne!(hash(&["ab", "c"]), hash(&["a", "bc"]));
    }

    #[test]
    fn test_string_length_is_64_bit() {
        let mut fed = StateHasher::new(HashDomain::Queue);
        fed.update_str("abc");
        let mut manual = StateHasher::new(HashDomain::Queue);
        manual.update_u64(3);
        manual.digest.update(b"abc");
        assert_eq!(fed.finalize(), manual.finalize());
    }

    #[test]
    fn test_short_hex() {
        let hash = [0xab; 32];
        assert_eq!(short_hex(&hash), "abababab");
    }
}
