// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dynamic bus value type.
//!
//! `BusValue` is the tagged union carried between the D-Bus side and the
//! JSON document model. It covers the D-Bus basic types, byte blobs (`ay`),
//! the homogeneous arrays `as`/`ai`, variant arrays (`av`), the string-keyed
//! dictionaries `a{ss}`/`a{si}`/`a{sv}`, and nested variants (`v`, which
//! collapse into the contained value). Anything else becomes `Unsupported`
//! and surfaces as a diagnostic sentinel in JSON output.

use std::collections::{BTreeMap, HashMap};
use zbus::zvariant::{Array, Dict, OwnedValue, Signature, Value};

/// A dynamic value that can hold any supported D-Bus type.
#[derive(Debug, Clone, PartialEq)]
pub enum BusValue {
    // Basic types
    Str(String),
    Bool(bool),
    F64(f64),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),

    // Containers
    Bytes(Vec<u8>),
    StrArray(Vec<String>),
    I32Array(Vec<i32>),
    VariantArray(Vec<BusValue>),
    StrDict(BTreeMap<String, String>),
    I32Dict(BTreeMap<String, i32>),
    VariantDict(BTreeMap<String, BusValue>),

    /// A wire value outside the supported type set.
    Unsupported,
}

impl BusValue {
    /// Try to get as string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Check whether this value is the unsupported sentinel.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported)
    }

    /// Convert a wire value into a `BusValue`.
    ///
    /// Total: anything outside the supported type set maps to
    /// [`BusValue::Unsupported`] rather than failing.
    pub fn from_wire(value: &Value<'_>) -> BusValue {
        match value {
            Value::Str(s) => BusValue::Str(s.to_string()),
            Value::Bool(b) => BusValue::Bool(*b),
            Value::F64(d) => BusValue::F64(*d),
            Value::U8(v) => BusValue::U8(*v),
            Value::I16(v) => BusValue::I16(*v),
            Value::U16(v) => BusValue::U16(*v),
            Value::I32(v) => BusValue::I32(*v),
            Value::U32(v) => BusValue::U32(*v),
            Value::I64(v) => BusValue::I64(*v),
            Value::U64(v) => BusValue::U64(*v),
            // Nested variant: collapse into the contained value
            Value::Value(inner) => BusValue::from_wire(inner),
            Value::Array(_) => Self::array_from_wire(value),
            Value::Dict(_) => Self::dict_from_wire(value),
            _ => BusValue::Unsupported,
        }
    }

    fn array_from_wire(value: &Value<'_>) -> BusValue {
        let Ok(owned) = value.try_clone() else {
            return BusValue::Unsupported;
        };
        match value.value_signature().as_str() {
            "ay" => match Vec::<u8>::try_from(owned) {
                Ok(bytes) => BusValue::Bytes(bytes),
                Err(_) => BusValue::Unsupported,
            },
            "as" => match Vec::<String>::try_from(owned) {
                Ok(items) => BusValue::StrArray(items),
                Err(_) => BusValue::Unsupported,
            },
            "ai" => match Vec::<i32>::try_from(owned) {
                Ok(items) => BusValue::I32Array(items),
                Err(_) => BusValue::Unsupported,
            },
            "av" => match Vec::<OwnedValue>::try_from(owned) {
                Ok(items) => {
                    BusValue::VariantArray(items.iter().map(|v| BusValue::from_wire(v)).collect())
                }
                Err(_) => BusValue::Unsupported,
            },
            _ => BusValue::Unsupported,
        }
    }

    fn dict_from_wire(value: &Value<'_>) -> BusValue {
        let Ok(owned) = value.try_clone() else {
            return BusValue::Unsupported;
        };
        match value.value_signature().as_str() {
            "a{ss}" => match HashMap::<String, String>::try_from(owned) {
                Ok(map) => BusValue::StrDict(map.into_iter().collect()),
                Err(_) => BusValue::Unsupported,
            },
            "a{si}" => match HashMap::<String, i32>::try_from(owned) {
                Ok(map) => BusValue::I32Dict(map.into_iter().collect()),
                Err(_) => BusValue::Unsupported,
            },
            "a{sv}" => match HashMap::<String, OwnedValue>::try_from(owned) {
                Ok(map) => BusValue::VariantDict(
                    map.iter()
                        .map(|(k, v)| (k.clone(), BusValue::from_wire(v)))
                        .collect(),
                ),
                Err(_) => BusValue::Unsupported,
            },
            _ => BusValue::Unsupported,
        }
    }

    /// Convert into a wire value for a method-call argument.
    ///
    /// `Unsupported` degrades to an empty string; it never round-trips and
    /// only exists as a diagnostic.
    pub fn to_wire(&self) -> Value<'static> {
        match self {
            BusValue::Str(s) => Value::from(s.clone()),
            BusValue::Bool(b) => Value::Bool(*b),
            BusValue::F64(d) => Value::F64(*d),
            BusValue::U8(v) => Value::U8(*v),
            BusValue::I16(v) => Value::I16(*v),
            BusValue::U16(v) => Value::U16(*v),
            BusValue::I32(v) => Value::I32(*v),
            BusValue::U32(v) => Value::U32(*v),
            BusValue::I64(v) => Value::I64(*v),
            BusValue::U64(v) => Value::U64(*v),
            BusValue::Bytes(b) => Value::from(b.clone()),
            BusValue::StrArray(items) => Value::from(items.clone()),
            BusValue::I32Array(items) => Value::from(items.clone()),
            BusValue::VariantArray(items) => {
                let mut arr = Array::new(Signature::from_static_str_unchecked("v"));
                for item in items {
                    let _ = arr.append(Value::Value(Box::new(item.to_wire())));
                }
                Value::Array(arr)
            }
            BusValue::StrDict(map) => {
                let mut dict = Dict::new(
                    Signature::from_static_str_unchecked("s"),
                    Signature::from_static_str_unchecked("s"),
                );
                for (k, v) in map {
                    let _ = dict.append(Value::from(k.clone()), Value::from(v.clone()));
                }
                Value::Dict(dict)
            }
            BusValue::I32Dict(map) => {
                let mut dict = Dict::new(
                    Signature::from_static_str_unchecked("s"),
                    Signature::from_static_str_unchecked("i"),
                );
                for (k, v) in map {
                    let _ = dict.append(Value::from(k.clone()), Value::I32(*v));
                }
                Value::Dict(dict)
            }
            BusValue::VariantDict(map) => {
                let mut dict = Dict::new(
                    Signature::from_static_str_unchecked("s"),
                    Signature::from_static_str_unchecked("v"),
                );
                for (k, v) in map {
                    let _ = dict.append(
                        Value::from(k.clone()),
                        Value::Value(Box::new(v.to_wire())),
                    );
                }
                Value::Dict(dict)
            }
            BusValue::Unsupported => Value::from(String::new()),
        }
    }
}
