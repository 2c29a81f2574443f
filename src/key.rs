//! Document keys with a precomputed hash.

use ahash::RandomState;
use bytes::Bytes;
use std::fmt;

/// Namespace a document key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DocNamespace {
    /// The default collection.
    #[default]
    DefaultCollection = 0,
    /// A named collection; the collection is encoded in the key bytes.
    Collections = 1,
    /// Engine-internal system events.
    System = 2,
}

/// Hash builder with fixed seeds so a key hashes to the same bucket for the
/// lifetime of the process (and across processes).
fn key_hasher() -> RandomState {
    RandomState::with_seeds(
        0xbb8c484891ec6c86,
        0x0522a25ae9c769f9,
        0xeed2797b9571bc75,
        0x4feb29c1fbbd59d0,
    )
}

/// A document identifier.
///
/// The hash is computed once at construction; equality compares the
/// namespace and the key bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    bytes: Bytes,
    namespace: DocNamespace,
    hash: u64,
}

impl DocKey {
    /// Create a key in the default collection.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self::with_namespace(bytes, DocNamespace::DefaultCollection)
    }

    /// Create a key in the given namespace.
    pub fn with_namespace(bytes: impl Into<Bytes>, namespace: DocNamespace) -> Self {
        let bytes = bytes.into();
        let hash = key_hasher().hash_one((namespace as u8, &bytes[..]));
        Self {
            bytes,
            namespace,
            hash,
        }
    }

    /// The key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The key namespace.
    #[inline]
    pub fn namespace(&self) -> DocNamespace {
        self.namespace
    }

    /// The precomputed hash.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Stored size of the key: the bytes plus one namespace byte.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len() + 1
    }
}

impl fmt::Debug for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DocKey({:?}, {:?})",
            String::from_utf8_lossy(&self.bytes),
            self.namespace
        )
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

impl From<&str> for DocKey {
    fn from(key: &str) -> Self {
        Self::new(Bytes::copy_from_slice(key.as_bytes()))
    }
}

impl From<&[u8]> for DocKey {
    fn from(key: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(key))
    }
}
