// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus value / JSON document translation.
//!
//! Byte blobs (`ay`) are represented as `{"_type":"bytes","data":"<base64>"}`
//! so that binary payloads round-trip unambiguously in both directions. The
//! tagged form is detected before the generic object handler.
//!
//! Integer policy: JSON integers representable as `i64` become `i` when they
//! fit 32 bits, `x` otherwise; only values above `i64::MAX` take the unsigned
//! branch (`u`/`t`).

use crate::value::BusValue;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde_json::json;

/// Diagnostic sentinel emitted for a wire value outside the supported set.
pub const UNSUPPORTED_TYPE: &str = "unsupported type";

/// Key marking the tagged byte-blob object form.
const BYTES_TAG: &str = "bytes";

/// Lenient decoder: padding already stripped by the caller, partial trailing
/// chunks tolerated.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Encode bytes with the standard alphabet and `=` padding.
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode base64, skipping whitespace and unknown characters and stopping at
/// the first `=` padding character.
pub fn base64_decode(input: &str) -> Vec<u8> {
    let mut filtered = String::with_capacity(input.len());
    for c in input.chars() {
        if c == '=' {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '+' || c == '/' {
            filtered.push(c);
        }
    }
    // A lone trailing character carries fewer than 8 bits, drop it.
    if filtered.len() % 4 == 1 {
        filtered.pop();
    }
    LENIENT.decode(filtered.as_bytes()).unwrap_or_default()
}

/// Convert a bus value into its JSON representation.
pub fn bus_to_json(value: &BusValue) -> serde_json::Value {
    match value {
        BusValue::Str(s) => json!(s),
        BusValue::Bool(b) => json!(b),
        BusValue::F64(d) => json!(d),
        BusValue::U8(v) => json!(v),
        BusValue::I16(v) => json!(v),
        BusValue::U16(v) => json!(v),
        BusValue::I32(v) => json!(v),
        BusValue::U32(v) => json!(v),
        BusValue::I64(v) => json!(v),
        BusValue::U64(v) => json!(v),
        BusValue::Bytes(b) => json!({
            "_type": BYTES_TAG,
            "data": base64_encode(b),
        }),
        BusValue::StrArray(items) => json!(items),
        BusValue::I32Array(items) => json!(items),
        BusValue::VariantArray(items) => {
            serde_json::Value::Array(items.iter().map(bus_to_json).collect())
        }
        BusValue::StrDict(map) => json!(map),
        BusValue::I32Dict(map) => json!(map),
        BusValue::VariantDict(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), bus_to_json(v))).collect(),
        ),
        BusValue::Unsupported => json!(UNSUPPORTED_TYPE),
    }
}

/// Convert a JSON value into a bus value.
pub fn json_to_bus(json: &serde_json::Value) -> BusValue {
    match json {
        serde_json::Value::String(s) => BusValue::Str(s.clone()),
        serde_json::Value::Bool(b) => BusValue::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                if v >= i64::from(i32::MIN) && v <= i64::from(i32::MAX) {
                    BusValue::I32(v as i32)
                } else {
                    BusValue::I64(v)
                }
            } else if let Some(v) = n.as_u64() {
                if v <= u64::from(u32::MAX) {
                    BusValue::U32(v as u32)
                } else {
                    BusValue::U64(v)
                }
            } else {
                BusValue::F64(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::Object(map) => {
            // Tagged blob form, tested before the generic object handler
            if let Some(data) = bytes_object_data(map) {
                return BusValue::Bytes(base64_decode(data));
            }
            BusValue::VariantDict(
                map.iter().map(|(k, v)| (k.clone(), json_to_bus(v))).collect(),
            )
        }
        serde_json::Value::Array(items) => {
            BusValue::VariantArray(items.iter().map(json_to_bus).collect())
        }
        // D-Bus has no null basic type
        serde_json::Value::Null => BusValue::Str(String::new()),
    }
}

fn bytes_object_data(map: &serde_json::Map<String, serde_json::Value>) -> Option<&str> {
    if map.get("_type").and_then(|t| t.as_str()) != Some(BYTES_TAG) {
        return None;
    }
    map.get("data").and_then(|d| d.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_base64_known_vector() {
        assert_eq!(base64_encode(&[0x00, 0xFF, 0x10]), "AP8Q");
        assert_eq!(base64_decode("AP8Q"), vec![0x00, 0xFF, 0x10]);
    }

    #[test]
    fn test_base64_padding_and_whitespace() {
        assert_eq!(base64_encode(b"a"), "YQ==");
        assert_eq!(base64_decode("YQ=="), b"a");
        // Whitespace and unknown characters are skipped
        assert_eq!(base64_decode(" Y Q=\n="), b"a");
        // Decoding stops at the first padding character
        assert_eq!(base64_decode("YQ==YWJj"), b"a");
    }

    #[test]
    fn test_base64_empty() {
        assert_eq!(base64_encode(&[]), "");
        assert!(base64_decode("").is_empty());
    }

    #[test]
    fn test_blob_roundtrip() {
        let blob = BusValue::Bytes(vec![0x00, 0xFF, 0x10]);
        let j = bus_to_json(&blob);
        assert_eq!(j, serde_json::json!({"_type": "bytes", "data": "AP8Q"}));
        assert_eq!(json_to_bus(&j), blob);
    }

    #[test]
    fn test_bytes_tag_tested_before_generic_object() {
        // An object that merely resembles the tagged form stays a dictionary
        let j = serde_json::json!({"_type": "bytes", "data": 5});
        match json_to_bus(&j) {
            BusValue::VariantDict(map) => assert_eq!(map.len(), 2),
            other => panic!("expected dict, got: {:?}", other),
        }

        let j = serde_json::json!({"_type": "text", "data": "AP8Q"});
        assert!(matches!(json_to_bus(&j), BusValue::VariantDict(_)));
    }

    #[test]
    fn test_integer_width_policy() {
        assert_eq!(json_to_bus(&serde_json::json!(5)), BusValue::I32(5));
        assert_eq!(json_to_bus(&serde_json::json!(-5)), BusValue::I32(-5));
        assert_eq!(
            json_to_bus(&serde_json::json!(3_000_000_000u64)),
            BusValue::I64(3_000_000_000)
        );
        assert_eq!(
            json_to_bus(&serde_json::json!(-3_000_000_000i64)),
            BusValue::I64(-3_000_000_000)
        );
        assert_eq!(
            json_to_bus(&serde_json::json!(u64::MAX)),
            BusValue::U64(u64::MAX)
        );
        assert_eq!(json_to_bus(&serde_json::json!(1.5)), BusValue::F64(1.5));
    }

    #[test]
    fn test_null_becomes_empty_string() {
        assert_eq!(
            json_to_bus(&serde_json::Value::Null),
            BusValue::Str(String::new())
        );
    }

    #[test]
    fn test_unsupported_sentinel() {
        assert_eq!(
            bus_to_json(&BusValue::Unsupported),
            serde_json::json!("unsupported type")
        );
    }

    #[test]
    fn test_json_roundtrip_composite() {
        let j = serde_json::json!({
            "name": "sensor-1",
            "online": true,
            "reading": 21.5,
            "count": 42,
            "tags": ["a", "b"],
            "nested": {"k": "v"},
        });
        let bus = json_to_bus(&j);
        assert_eq!(bus_to_json(&bus), j);
    }

    #[test]
    fn test_wire_json_roundtrip() {
        // OBus -> JSON -> OBus across the marshaller and the wire conversion
        let original = BusValue::VariantDict(BTreeMap::from([
            ("blob".to_string(), BusValue::Bytes(vec![1, 2, 3])),
            ("label".to_string(), BusValue::Str("x".into())),
            (
                "list".to_string(),
                BusValue::VariantArray(vec![BusValue::I32(1), BusValue::Bool(false)]),
            ),
        ]));
        let wire = original.to_wire();
        let back = BusValue::from_wire(&wire);
        assert_eq!(bus_to_json(&back), bus_to_json(&original));
    }

    #[test]
    fn test_str_dict_and_i32_dict_json_shape() {
        let sd = BusValue::StrDict(BTreeMap::from([("k".to_string(), "v".to_string())]));
        assert_eq!(bus_to_json(&sd), serde_json::json!({"k": "v"}));

        let id = BusValue::I32Dict(BTreeMap::from([("n".to_string(), 7)]));
        assert_eq!(bus_to_json(&id), serde_json::json!({"n": 7}));
    }
}
