// SPDX-License-Identifier: Apache-2.0

//! Byte sizes in configuration files, written as either a plain number of
//! bytes or a human string like `"4 KiB"`/`"1 GiB"` (spec.md §6: the core
//! itself only ever sees a resolved `u64`; this module is the YAML-facing
//! convenience, mirroring the teacher's `otap_df_config::byte_units`).

use byte_unit::Byte;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Value {
    Number(u64),
    String(String),
}

fn to_bytes(value: Value) -> Result<u64, String> {
    match value {
        Value::Number(n) => Ok(n),
        Value::String(text) => text.parse::<Byte>().map(|b| b.as_u64()).map_err(|e| e.to_string()),
    }
}

/// Deserialize a required byte size.
pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    to_bytes(value).map_err(DeError::custom)
}

/// Deserialize an optional byte size.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    value.map(to_bytes).transpose().map_err(DeError::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "deserialize")]
        value: u64,
        #[serde(default, deserialize_with = "deserialize_option")]
        optional: Option<u64>,
    }

    #[test]
    fn parses_plain_number_as_bytes() {
        let h: Holder = serde_yaml::from_str("value: 4096").unwrap();
        assert_eq!(h.value, 4096);
    }

    #[test]
    fn parses_human_units() {
        let h: Holder = serde_yaml::from_str("value: '4 KiB'").unwrap();
        assert_eq!(h.value, 4096);
    }

    #[test]
    fn missing_optional_is_none() {
        let h: Holder = serde_yaml::from_str("value: 1").unwrap();
        assert_eq!(h.optional, None);
    }
}
