// Copyright 2020 Joyent, Inc.

//! Validation of handler results into invocation responses.
//!
//! A handler returns a loosely-typed value. It is accepted only if it is a
//! JSON object, or a string holding one, of the form
//!
//! ```text
//! { "statusCode": <integer>,
//!   "headers": { <name>: <string>, ... },   (optional)
//!   "isBase64Encoded": <bool>,              (optional)
//!   "body": <string> }                      (optional)
//! ```
//!
//! A `null` optional field counts as absent.

use std::convert::TryFrom;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::header::{self, HeaderMap};
use crate::message::{
    InvocationResponse, Metadata, META_HEADERS, META_IS_BASE64_ENCODED,
    META_STATUS_CODE,
};

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResult {
    Structured(Map<String, Value>),
    /// A string expected to hold a serialized object.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("result must be an object or a string, got {0}")]
    UnsupportedValue(&'static str),
    #[error("result string is not a serialized object")]
    UnparsableString,
    #[error("statusCode is missing")]
    MissingStatusCode,
    #[error("statusCode is not an integer")]
    StatusCodeNotInteger,
    #[error("statusCode {0} is out of range")]
    StatusCodeOutOfRange(u64),
    #[error("headers is not an object")]
    HeadersNotMapping,
    #[error("value of header {0:?} is not a string")]
    HeaderValueNotString(String),
    #[error("header {0:?} contains a reserved header delimiter")]
    HeaderDelimiter(String),
    #[error("isBase64Encoded is not a boolean")]
    Base64FlagNotBool,
    #[error("body is not a string")]
    BodyNotString,
    #[error("response of {size} bytes exceeds maximum of {max}")]
    ResponseTooLarge { size: usize, max: usize },
}

impl TryFrom<Value> for HandlerResult {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<HandlerResult, SchemaError> {
        match value {
            Value::Object(fields) => Ok(HandlerResult::Structured(fields)),
            Value::String(raw) => Ok(HandlerResult::Raw(raw)),
            other => Err(SchemaError::UnsupportedValue(kind_of(&other))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Check `result` against the response shape and encode it for the
/// transport. The result itself is left untouched.
pub fn normalize(result: &HandlerResult) -> Result<InvocationResponse, SchemaError> {
    let parsed;
    let fields = match result {
        HandlerResult::Structured(fields) => fields,
        HandlerResult::Raw(raw) => {
            parsed = match serde_json::from_str(raw) {
                Ok(Value::Object(fields)) => fields,
                _ => return Err(SchemaError::UnparsableString),
            };
            &parsed
        }
    };

    let status_code = match fields.get("statusCode") {
        None => return Err(SchemaError::MissingStatusCode),
        Some(code) => match (code.as_i64(), code.as_u64()) {
            (Some(code), _) => code,
            (None, Some(big)) => return Err(SchemaError::StatusCodeOutOfRange(big)),
            (None, None) => return Err(SchemaError::StatusCodeNotInteger),
        },
    };

    let mut headers = match present(fields, "headers") {
        None => HeaderMap::new(),
        Some(Value::Object(map)) => string_headers(map)?,
        Some(_) => return Err(SchemaError::HeadersNotMapping),
    };

    let is_base64_encoded = match present(fields, "isBase64Encoded") {
        None => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => return Err(SchemaError::Base64FlagNotBool),
    };

    let body = match present(fields, "body") {
        None => None,
        Some(Value::String(body)) => Some(body.as_str()),
        Some(_) => return Err(SchemaError::BodyNotString),
    };

    if let Some(body) = body {
        let has_content_type = headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case(CONTENT_TYPE));
        if !has_content_type {
            headers.insert(CONTENT_TYPE.to_string(), content_type_of(body).to_string());
        }
    }

    let mut metadata = Metadata::new();
    metadata.insert(META_STATUS_CODE.to_string(), status_code.to_string());
    if !headers.is_empty() {
        metadata.insert(META_HEADERS.to_string(), header::encode(&headers));
    }
    if let Some(flag) = is_base64_encoded {
        metadata.insert(META_IS_BASE64_ENCODED.to_string(), flag.to_string());
    }

    Ok(InvocationResponse {
        metadata,
        payload: body.map(|b| b.as_bytes().to_vec()).unwrap_or_default(),
    })
}

fn present<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|value| !value.is_null())
}

/// Header names and values must be strings that survive the metadata
/// encoding unchanged.
fn string_headers(map: &Map<String, Value>) -> Result<HeaderMap, SchemaError> {
    map.iter()
        .map(|(name, value)| match value {
            Value::String(s) if header::is_encodable(name) && header::is_encodable(s) => {
                Ok((name.clone(), s.clone()))
            }
            Value::String(_) => Err(SchemaError::HeaderDelimiter(name.clone())),
            _ => Err(SchemaError::HeaderValueNotString(name.clone())),
        })
        .collect()
}

/// A body that parses as JSON is labelled as JSON, anything else as text.
fn content_type_of(body: &str) -> &'static str {
    if serde_json::from_str::<Value>(body).is_ok() {
        CONTENT_TYPE_JSON
    } else {
        CONTENT_TYPE_TEXT
    }
}
