use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not, Sub};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Per-call policy controlling how a query interacts with the cache.
///
/// This is a set of flags. The empty set, [`QueryOptions::NONE`], disables all cache interaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryOptions(u8);

impl QueryOptions {
    /// Neither read from nor write to the cache, always compute.
    pub const NONE: Self = Self(0);
    /// Register the computation in the cache so that concurrent and later callers share it.
    pub const SAVE_TO_CACHE: Self = Self(1 << 0);
    /// Recompute instead of replaying a failure that is found in the cache.
    pub const REQUERY_WHEN_ERROR_CACHED: Self = Self(1 << 1);
    /// The options used for queries that do not specify any.
    pub const DEFAULT: Self = Self(Self::SAVE_TO_CACHE.0 | Self::REQUERY_WHEN_ERROR_CACHED.0);

    const ALL: Self = Self::DEFAULT;
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::SAVE_TO_CACHE, "save_to_cache"),
        (Self::REQUERY_WHEN_ERROR_CACHED, "requery_when_error_cached"),
    ];

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Creates options from raw bits, dropping unknown flags.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Whether all the flags in `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set, meaning the cache is bypassed entirely.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn saves_to_cache(self) -> bool {
        self.contains(Self::SAVE_TO_CACHE)
    }

    pub const fn requeries_errors(self) -> bool {
        self.contains(Self::REQUERY_WHEN_ERROR_CACHED)
    }

    fn flag_names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::NONE),
            "default" => Some(Self::DEFAULT),
            _ => Self::NAMES
                .iter()
                .find(|(_, n)| *n == name)
                .map(|(flag, _)| *flag),
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("QueryOptions(NONE)");
        }
        f.write_str("QueryOptions(")?;
        for (i, name) in self.flag_names().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(&name.to_ascii_uppercase())?;
        }
        f.write_str(")")
    }
}

impl BitOr for QueryOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueryOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for QueryOptions {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Set difference: `QueryOptions::DEFAULT - QueryOptions::REQUERY_WHEN_ERROR_CACHED`.
impl Sub for QueryOptions {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl Not for QueryOptions {
    type Output = Self;

    fn not(self) -> Self {
        Self::from_bits_truncate(!self.0)
    }
}

/// Options are serialized as a list of flag names, like `[save_to_cache]`.
impl Serialize for QueryOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.flag_names())
    }
}

impl<'de> Deserialize<'de> for QueryOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(OptionsVisitor)
    }
}

struct OptionsVisitor;

impl<'de> de::Visitor<'de> for OptionsVisitor {
    type Value = QueryOptions;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#"a flag name or a list of "none", "default", "save_to_cache", or "requery_when_error_cached""#
        )
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        QueryOptions::from_name(v).ok_or_else(|| de::Error::unknown_variant(v, VARIANTS))
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut options = QueryOptions::NONE;
        while let Some(name) = seq.next_element::<String>()? {
            options |= QueryOptions::from_name(&name)
                .ok_or_else(|| de::Error::unknown_variant(&name, VARIANTS))?;
        }
        Ok(options)
    }
}

const VARIANTS: &[&str] = &[
    "none",
    "default",
    "save_to_cache",
    "requery_when_error_cached",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_contains_everything() {
        let default = QueryOptions::default();
        assert_eq!(default, QueryOptions::DEFAULT);
        assert!(default.saves_to_cache());
        assert!(default.requeries_errors());
        assert!(!default.is_none());
        assert_eq!(
            default,
            QueryOptions::SAVE_TO_CACHE | QueryOptions::REQUERY_WHEN_ERROR_CACHED
        );
    }

    #[test]
    fn test_set_operations() {
        let options = QueryOptions::DEFAULT - QueryOptions::REQUERY_WHEN_ERROR_CACHED;
        assert_eq!(options, QueryOptions::SAVE_TO_CACHE);
        assert!(!options.requeries_errors());

        let mut options = QueryOptions::NONE;
        assert!(options.is_none());
        options.insert(QueryOptions::REQUERY_WHEN_ERROR_CACHED);
        assert!(!options.saves_to_cache());
        assert!(options.requeries_errors());
        options.remove(QueryOptions::REQUERY_WHEN_ERROR_CACHED);
        assert!(options.is_none());

        assert_eq!(!QueryOptions::SAVE_TO_CACHE, QueryOptions::REQUERY_WHEN_ERROR_CACHED);
        assert_eq!(!QueryOptions::NONE, QueryOptions::DEFAULT);
        assert_eq!(
            QueryOptions::DEFAULT & QueryOptions::SAVE_TO_CACHE,
            QueryOptions::SAVE_TO_CACHE
        );
        assert_eq!(QueryOptions::from_bits_truncate(0xff), QueryOptions::DEFAULT);
        assert_eq!(QueryOptions::DEFAULT.bits(), 0b11);
    }

    #[test]
    fn test_debug() {
        assert_eq!(format!("{:?}", QueryOptions::NONE), "QueryOptions(NONE)");
        assert_eq!(
            format!("{:?}", QueryOptions::DEFAULT),
            "QueryOptions(SAVE_TO_CACHE | REQUERY_WHEN_ERROR_CACHED)"
        );
    }

    #[test]
    fn test_serde() {
        let options: QueryOptions = serde_yaml::from_str("[save_to_cache]").unwrap();
        assert_eq!(options, QueryOptions::SAVE_TO_CACHE);

        let options: QueryOptions = serde_yaml::from_str("none").unwrap();
        assert_eq!(options, QueryOptions::NONE);

        let options: QueryOptions = serde_yaml::from_str("[]").unwrap();
        assert_eq!(options, QueryOptions::NONE);

        let options: QueryOptions = serde_yaml::from_str("default").unwrap();
        assert_eq!(options, QueryOptions::DEFAULT);

        assert!(serde_yaml::from_str::<QueryOptions>("[save_everything]").is_err());

        let json = serde_json::to_string(&QueryOptions::DEFAULT).unwrap();
        assert_eq!(json, r#"["save_to_cache","requery_when_error_cached"]"#);
    }
}
