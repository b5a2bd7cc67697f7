// Copyright 2020 Joyent, Inc.

//! Flattening of an HTTP header map into a single metadata string.
//!
//! Invocation metadata is a flat string-to-string map, so the headers of a
//! request or response travel as one value. Each header becomes
//! `name&__header_equals__&value` and the entries are joined with
//! `&__header_delim__&`. Both literals are part of the wire format shared with
//! existing callers and must not change.
//!
//! `decode(&encode(h)) == h` holds for every map whose names and values do not
//! contain either delimiter.

use std::collections::BTreeMap;

use thiserror::Error;

/// Separates one header entry from the next.
pub const HEADER_DELIM: &str = "&__header_delim__&";

/// Separates a header name from its value within an entry.
pub const HEADER_EQUALS: &str = "&__header_equals__&";

/// Header names are kept exactly as received (case-sensitive).
pub type HeaderMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeaderError {
    #[error("header entry {entry:?} has no name/value separator")]
    MissingSeparator { entry: String },
}

/// Whether `text` can travel as a header name or value without being
/// mistaken for a delimiter on decode.
pub fn is_encodable(text: &str) -> bool {
    !text.contains(HEADER_DELIM) && !text.contains(HEADER_EQUALS)
}

pub fn encode(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| [name.as_str(), HEADER_EQUALS, value].concat())
        .collect::<Vec<String>>()
        .join(HEADER_DELIM)
}

/// Decode an encoded header string. The empty string is the empty map. When
/// a name repeats, the last entry wins.
pub fn decode(encoded: &str) -> Result<HeaderMap, HeaderError> {
    if encoded.is_empty() {
        return Ok(HeaderMap::new());
    }

    encoded
        .split(HEADER_DELIM)
        .map(|entry| match entry.split_once(HEADER_EQUALS) {
            Some((name, value)) => Ok((name.to_string(), value.to_string())),
            None => Err(HeaderError::MissingSeparator {
                entry: entry.to_string(),
            }),
        })
        .collect()
}
