use std::fmt;

/// Default size of the scratch buffer used to move source data around.
const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024;

/// Options for creating a lazy seek stream.
///
/// Can be loaded from TOML; all fields are optional:
///
/// ```toml
/// writable = false
/// chunk_size = "64K"
/// memory_limit = "1G"
/// ```
#[derive(Clone, serde::Deserialize, serde::Serialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Options {
    /// Allow writing to the stream.
    ///
    /// When false, the stream is read-only and writes as well as
    /// truncation fail with [crate::LazySeekError::Unsupported].
    pub writable: bool,

    /// Size of the scratch buffer used when pulling source data
    /// into the backing store or skipping over source data.
    pub chunk_size: ByteValue,

    /// Largest source the implicit in-memory backing store accepts.
    ///
    /// Defaults to the largest possible in-memory buffer. Larger
    /// sources require an explicit backing store.
    pub memory_limit: Option<ByteValue>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            writable: true,
            chunk_size: ByteValue(DEFAULT_CHUNK_SIZE),
            memory_limit: None,
        }
    }
}

impl Options {
    /// Options for a stream that refuses writes.
    pub fn read_only() -> Self {
        Self {
            writable: false,
            ..Default::default()
        }
    }

    /// Limit on the size of the in-memory backing store, in bytes.
    pub fn memory_limit(&self) -> u64 {
        match &self.memory_limit {
            Some(ByteValue(limit)) => *limit,
            None => isize::MAX as u64,
        }
    }

    /// Size of the scratch buffer, never 0.
    pub(crate) fn chunk_size(&self) -> usize {
        usize::try_from(self.chunk_size.0)
            .unwrap_or(usize::MAX)
            .clamp(1, isize::MAX as usize)
    }
}

/// A byte value that can be parsed from human-readable units or plain numbers.
///
/// Units are binary: "1K" is 1024 bytes, "1M" 1024*1024 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteValue(pub u64);

impl ByteValue {
    /// Parse a string containing a number with optional unit suffix.
    pub fn parse(input: &str) -> Result<u64, parse_size::Error> {
        parse_size::Config::new()
            .with_binary()
            .parse_size(input.trim())
    }
}

impl fmt::Display for ByteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for ByteValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ByteValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct ByteValueVisitor;

        impl<'de> Visitor<'de> for ByteValueVisitor {
            type Value = ByteValue;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter
                    .write_str("a number or string with byte units (e.g., 1000, \"1K\", \"1MB\")")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(ByteValue(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(de::Error::custom("negative values are not allowed"));
                }
                Ok(ByteValue(value as u64))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let bytes = ByteValue::parse(value).map_err(de::Error::custom)?;
                Ok(ByteValue(bytes))
            }
        }

        deserializer.deserialize_any(ByteValueVisitor)
    }
}
