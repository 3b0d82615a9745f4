//! Canonical JSON encoding for payloads, metadata and projection rows.
//!
//! Arrays stay arrays (no forced objects), slashes and unicode are not
//! escaped, and float values keep their fractional form (`0.0` does not
//! collapse to `0`). `serde_json` already guarantees all of this; these
//! helpers pin the behavior in one place and add the object checks the
//! store relies on.

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

pub fn encode(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn encode_object(map: &Map<String, Value>) -> Result<String> {
    Ok(serde_json::to_string(map)?)
}

pub fn decode(raw: &str) -> Result<Value> {
    Ok(serde_json::from_str(raw)?)
}

pub fn decode_object(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::MetadataInvalidObjectType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slashes_and_unicode_are_not_escaped() {
        let value = json!({"url": "http://a/b", "name": "héllo"});

        assert_eq!(
            encode(&value).unwrap(),
            r#"{"name":"héllo","url":"http://a/b"}"#
        );
    }

    #[test]
    fn arrays_stay_arrays() {
        let value = json!(["John", "Jane"]);

        assert_eq!(encode(&value).unwrap(), r#"["John","Jane"]"#);
    }

    #[test]
    fn integer_valued_floats_keep_their_fraction() {
        let value = json!({"ratio": 0.0});

        assert_eq!(encode(&value).unwrap(), r#"{"ratio":0.0}"#);

        let back = decode(r#"{"ratio":0.0}"#).unwrap();
        assert_eq!(encode(&back).unwrap(), r#"{"ratio":0.0}"#);
    }

    #[test]
    fn decode_object_rejects_non_objects() {
        assert!(matches!(
            decode_object("[1,2]").unwrap_err(),
            StoreError::MetadataInvalidObjectType
        ));
    }
}
