// Copyright 2020 Joyent, Inc.

//! The HTTP event handed to a function handler.
//!
//! An [`Event`] is rebuilt from the metadata and payload of every
//! [`InvocationRequest`] and serializes with the familiar API-gateway field
//! names (`httpMethod`, `queryStringParameters`, `requestContext`, ...).

use std::collections::BTreeMap;
use std::str;

use serde_derive::Serialize;
use thiserror::Error;
use url::form_urlencoded;

use crate::header::{self, HeaderError, HeaderMap};
use crate::message::{
    InvocationRequest, META_HEADERS, META_HTTP_METHOD, META_INVOKE_ID,
    META_IS_BASE64_ENCODED, META_PATH, META_QUERY_STRING,
};

pub type QueryParameters = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub resource: String,
    pub path: String,
    pub http_method: String,
    pub headers: HeaderMap,
    pub query_string_parameters: QueryParameters,
    /// Nothing in an invocation request carries path parameters; always empty.
    pub path_parameters: BTreeMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
    pub request_context: RequestContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub stage: String,
    pub request_id: String,
    pub resource_path: String,
    pub http_method: String,
    pub api_id: String,
    pub source_ip: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("request body is not valid UTF-8: {0}")]
    Body(#[from] str::Utf8Error),
    #[error("request headers are malformed: {0}")]
    Headers(#[from] HeaderError),
    #[error("isBase64Encoded must be \"true\" or \"false\", got {0:?}")]
    Base64Flag(String),
}

impl Event {
    /// Build the event for `request`. Metadata keys that are absent are
    /// treated as empty strings.
    pub fn from_request(request: &InvocationRequest) -> Result<Event, EventError> {
        let path = request.meta(META_PATH).to_string();
        let http_method = request.meta(META_HTTP_METHOD).to_string();
        let body = str::from_utf8(&request.payload)?.to_string();
        let is_base64_encoded = parse_flag(request.meta(META_IS_BASE64_ENCODED))?;
        let query_string_parameters = parse_query(request.meta(META_QUERY_STRING));
        let headers = header::decode(request.meta(META_HEADERS))?;

        let request_context = RequestContext {
            stage: String::new(),
            request_id: request.meta(META_INVOKE_ID).to_string(),
            resource_path: path.clone(),
            http_method: http_method.clone(),
            api_id: String::new(),
            source_ip: String::new(),
        };

        Ok(Event {
            resource: path.clone(),
            path,
            http_method,
            headers,
            query_string_parameters,
            path_parameters: BTreeMap::new(),
            body,
            is_base64_encoded,
            request_context,
        })
    }
}

fn parse_flag(flag: &str) -> Result<bool, EventError> {
    match flag {
        "" | "false" => Ok(false),
        "true" => Ok(true),
        other => Err(EventError::Base64Flag(other.to_string())),
    }
}

/// Standard URL query decoding; repeated keys accumulate in order.
pub fn parse_query(query: &str) -> QueryParameters {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut params = QueryParameters::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(Vec::new)
            .push(value.into_owned());
    }
    params
}
