// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT topic filter matching and validation.
//!
//! # Wildcard Syntax
//!
//! - `+` matches exactly one topic level (any characters except `/`)
//! - `#` matches zero or more topic levels (must be at end of filter)
//!
//! # Examples
//!
//! ```text
//! Filter "sensors/+/temperature" matches:
//!   "sensors/room1/temperature"
//!   "sensors/room2/temperature"
//! But NOT:
//!   "sensors/room1/humidity"
//!   "sensors/building/room1/temperature"
//!
//! Filter "sensors/#" matches:
//!   "sensors/room1/temperature"
//!   "sensors/building/room1/humidity"
//!   "sensors"
//! ```

/// Check if a subscription filter matches a concrete topic.
///
/// The filter may contain MQTT wildcards:
/// - `+` matches a single level
/// - `#` matches zero or more levels (must be at end)
///
/// The topic must be a concrete topic name (no wildcards).
pub fn topic_filter_match(filter: &str, topic: &str) -> bool {
    if filter.is_empty() || topic.is_empty() {
        return false;
    }

    // Fast path: exact match
    if filter == topic {
        return true;
    }

    // No wildcards and not an exact match
    if !filter.contains('+') && !filter.contains('#') {
        return false;
    }

    filter_segments_match(filter, topic)
}

/// Match a filter against a concrete topic, segment by segment.
fn filter_segments_match(filter: &str, topic: &str) -> bool {
    let filter_segments: Vec<&str> = filter.split('/').collect();
    let topic_segments: Vec<&str> = topic.split('/').collect();

    let mut fi = 0; // filter index
    let mut ti = 0; // topic index

    while fi < filter_segments.len() {
        let seg = filter_segments[fi];

        if seg == "#" {
            // # must be the last segment and matches everything remaining
            return fi == filter_segments.len() - 1;
        }

        if ti >= topic_segments.len() {
            // Topic has fewer segments than the filter requires
            return false;
        }

        if seg == "+" {
            // + matches exactly one segment, advance both indices
        } else if seg != topic_segments[ti] {
            // Literal segment must match exactly
            return false;
        }

        fi += 1;
        ti += 1;
    }

    // Filter consumed, topic must also be fully consumed
    ti == topic_segments.len()
}

fn has_valid_chars(topic: &str) -> bool {
    topic
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+' | '#'))
}

/// Validate a publish (outbound) topic.
///
/// Publish topics must not contain wildcards and must not start with `$`
/// (reserved for broker-internal topics).
pub fn is_valid_publish_topic(topic: &str) -> bool {
    if topic.is_empty() || topic.starts_with('$') {
        return false;
    }
    if topic.contains('+') || topic.contains('#') {
        return false;
    }
    has_valid_chars(topic)
}

/// Validate a subscribe (inbound) topic filter.
///
/// `+` is allowed as a whole segment at any level; `#` is allowed only as
/// the final segment.
pub fn is_valid_subscribe_topic(topic: &str) -> bool {
    if topic.is_empty() || topic.starts_with('$') {
        return false;
    }
    if !has_valid_chars(topic) {
        return false;
    }

    let segments: Vec<&str> = topic.split('/').collect();
    for (i, seg) in segments.iter().enumerate() {
        if seg.contains('#') {
            // # must be a whole segment, and the last one
            if *seg != "#" || i != segments.len() - 1 {
                return false;
            }
        }
        if seg.contains('+') && *seg != "+" {
            // + must occupy a whole segment
            return false;
        }
    }
    true
}
