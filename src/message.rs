// Copyright 2020 Joyent, Inc.

//! Invocation messages exchanged with the transport.
//!
//! Both messages carry a flat string metadata map and a raw byte payload. In
//! their JSON form the payload is standard base64.

use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};

use crate::header::{self, HeaderError, HeaderMap};

/// The only invocation type this crate serves.
pub const HTTP_TYPE: &str = "HTTP";

pub const META_PATH: &str = "path";
pub const META_HTTP_METHOD: &str = "httpMethod";
pub const META_IS_BASE64_ENCODED: &str = "isBase64Encoded";
pub const META_QUERY_STRING: &str = "queryStringParameters";
pub const META_HEADERS: &str = "headers";
pub const META_INVOKE_ID: &str = "invokeId";
pub const META_STATUS_CODE: &str = "statusCode";

pub type Metadata = HashMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, with = "base64_payload")]
    pub payload: Vec<u8>,
}

impl InvocationRequest {
    /// An HTTP invocation of `method` on the function service `name`. An
    /// empty `method` selects the default route.
    pub fn http(name: &str, method: &str) -> InvocationRequest {
        InvocationRequest {
            kind: String::from(HTTP_TYPE),
            name: String::from(name),
            method: String::from(method),
            metadata: Metadata::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> InvocationRequest {
        self.metadata.insert(String::from(key), String::from(value));
        self
    }

    pub fn with_headers(self, headers: &HeaderMap) -> InvocationRequest {
        self.with_metadata(META_HEADERS, &header::encode(headers))
    }

    pub fn with_payload<B: Into<Vec<u8>>>(mut self, payload: B) -> InvocationRequest {
        self.payload = payload.into();
        self
    }

    pub fn meta(&self, key: &str) -> &str {
        self.metadata.get(key).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, with = "base64_payload")]
    pub payload: Vec<u8>,
}

impl InvocationResponse {
    pub fn status_code(&self) -> Option<i64> {
        self.metadata
            .get(META_STATUS_CODE)
            .and_then(|code| code.parse().ok())
    }

    /// Decoded response headers; empty when the metadata carries none.
    pub fn headers(&self) -> Result<HeaderMap, HeaderError> {
        match self.metadata.get(META_HEADERS) {
            Some(encoded) => header::decode(encoded),
            None => Ok(HeaderMap::new()),
        }
    }
}

mod base64_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
