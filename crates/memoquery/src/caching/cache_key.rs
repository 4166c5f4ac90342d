use std::fmt::{self, Write};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::KeyError;

/// The identity of a query inside a [`QueryCache`](super::QueryCache).
///
/// A key consists of human-readable metadata describing the unit of work, and a SHA-256 hash of
/// that metadata. Two keys are equal if and only if their metadata is equal.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.hash[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl CacheKey {
    /// Create a [`CacheKeyBuilder`] that can be used to build a cache key out of the identifying
    /// fields of a query.
    pub fn builder() -> CacheKeyBuilder {
        CacheKeyBuilder {
            metadata: String::new(),
        }
    }

    /// Returns the human-readable metadata that forms the basis of the [`CacheKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Returns the full hex-formatted sha-256 hash of this key.
    pub fn hash_hex(&self) -> String {
        let mut hex = String::with_capacity(64);
        for b in &self.hash {
            // writing into a `String` never fails
            let _ = write!(hex, "{b:02x}");
        }
        hex
    }

    pub fn for_testing(key: impl Into<String>) -> Self {
        CacheKeyBuilder {
            metadata: key.into(),
        }
        .build()
    }
}

/// A builder for [`CacheKey`]s.
///
/// This builder implements the [`Write`](std::fmt::Write) trait, and the intention of it is to
/// accept human readable, but most importantly **stable**, input.
/// This input in then being hashed to form the [`CacheKey`].
///
/// **NOTE**: Only the identifying fields of a query may be written here. Per-call policy such as
/// [`QueryOptions`](super::QueryOptions) must stay out of the key, otherwise two calls differing
/// only in policy would never share a computation.
pub struct CacheKeyBuilder {
    metadata: String,
}

impl CacheKeyBuilder {
    /// Writes a `name: value` line into the [`CacheKey`].
    pub fn write_field(&mut self, name: &str, value: impl fmt::Display) -> Result<(), fmt::Error> {
        writeln!(self.metadata, "{name}: {value}")
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let hash = Sha256::digest(&self.metadata);

        CacheKey {
            metadata: self.metadata.into(),
            hash: hash.into(),
        }
    }
}

impl fmt::Write for CacheKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}

/// Turns a query into its [`CacheKey`].
///
/// Implementations must be pure and deterministic: equivalent queries have to produce equal keys,
/// as this is the only notion of equality the cache knows about.
pub trait KeySerializer<Q>: Send + Sync {
    fn serialize_key(&self, query: &Q) -> Result<CacheKey, KeyError>;
}

/// The default [`KeySerializer`], based on the [`Serialize`] impl of the query.
///
/// The key metadata consists of the query type name, followed by the JSON representation of the
/// query. Object keys are written in sorted order, so map fields such as a `HashMap` produce the
/// same key regardless of their iteration order. Fields that should not be part of the identity of a query, most importantly its
/// [`QueryOptions`](super::QueryOptions), have to be marked with `#[serde(skip)]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonKeySerializer;

impl<Q: Serialize> KeySerializer<Q> for JsonKeySerializer {
    fn serialize_key(&self, query: &Q) -> Result<CacheKey, KeyError> {
        let mut builder = CacheKey::builder();
        builder.write_field("query", std::any::type_name::<Q>())?;

        // going through `Value` sorts object keys
        let json = serde_json::to_value(query)?;
        builder.write_str(&json.to_string())?;

        Ok(builder.build())
    }
}
