//! Serde support for [`Compression`](crate::Compression), by name.

use crate::Compression;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as DeError};
use std::str::FromStr;

impl Serialize for Compression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Compression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Compression::from_str(&value).map_err(|err| D::Error::custom(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[derive(serde::Deserialize)]
    struct Settings {
        codec: Compression,
    }

    #[rstest]
    #[case(r#"{"codec":"zst"}"#, Compression::Zstd)]
    #[case(r#"{"codec":"gzip"}"#, Compression::Gzip)]
    #[case(r#"{"codec":"none"}"#, Compression::None)]
    fn deserializes_aliases(#[case] json: &str, #[case] expected: Compression) {
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.codec, expected);
    }

    #[test]
    fn rejects_unknown_codec() {
        assert!(serde_json::from_str::<Settings>(r#"{"codec":"lz4"}"#).is_err());
    }

    #[test]
    fn serializes_canonical_name() {
        assert_eq!(serde_json::to_string(&Compression::Bzip2).unwrap(), r#""bzip2""#);
    }
}
