//! Content addressing for incremental uploads
//!
//! Blobs are named the way git names them in a SHA-256 repository: the digest
//! covers a `blob <len>\0` preamble followed by the raw bytes. The server uses
//! the same scheme, so a hash computed here can stand in for file contents it
//! already stores.

use crate::error::PagesError;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

/// Files at or below this size are always embedded. A placeholder round-trip
/// costs more than re-sending a few hundred bytes.
pub const INCREMENTAL_SIZE_THRESHOLD: u64 = 256;

/// Link target prefix the server resolves placeholders against
pub const BLOB_LINK_PREFIX: &str = "/git/blobs/";

/// Lowercase hex SHA-256 blob name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse a hash as sent back by the server. Accepts either case.
    pub fn parse(text: &str) -> Result<Self, PagesError> {
        if text.len() == 64 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(text.to_ascii_lowercase()))
        } else {
            Err(PagesError::MalformedHash(text.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Symlink target used for a placeholder entry
    pub fn blob_link(&self) -> String {
        format!("{}{}", BLOB_LINK_PREFIX, self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the git blob SHA-256 of `data`
pub fn git_blob_sha256(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(b"blob ");
    hasher.update(data.len().to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(data);
    ContentHash(format!("{:x}", hasher.finalize()))
}

/// Blobs the server declared it does not have.
///
/// Replaced wholesale every negotiation round; never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MustEmbedSet(HashSet<ContentHash>);

impl MustEmbedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a newline-delimited list of hashes from an unresolved-blobs response
    pub fn parse_unresolved(body: &[u8]) -> Result<Self, PagesError> {
        let mut set = HashSet::new();
        for line in body.split(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            set.insert(ContentHash::parse(line)?);
        }
        if set.is_empty() {
            return Err(PagesError::EmptyNegotiation);
        }
        Ok(Self(set))
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.0.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContentHash> {
        self.0.iter()
    }
}

impl FromIterator<ContentHash> for MustEmbedSet {
    fn from_iter<I: IntoIterator<Item = ContentHash>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
