// Copyright 2020 Joyent, Inc.

//! Invocation failures and the responses they turn into.
//!
//! Every failure that happens while serving an HTTP invocation becomes an
//! ordinary [`InvocationResponse`] with a JSON error body:
//!
//! | failure | status |
//! |---|---|
//! | no handler for the requested method | 404 |
//! | handler returned an error or panicked | 500 |
//! | request could not be decoded into an event | 502 |
//! | handler result violates the response shape | 502 |
//!
//! Only [`DispatchError`] escapes to the transport.

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventError;
use crate::message::{InvocationResponse, Metadata, META_STATUS_CODE};
use crate::response::SchemaError;

/// Handler failure summaries are cut to this many characters.
const MAX_SUMMARY_CHARS: usize = 256;

/// Sent in place of an error body that fails to serialize.
const FALLBACK_BODY: &[u8] = br#"{"errorCode":"500","message":"failed to encode error body"}"#;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Failure {
    #[error("no router")]
    RouteNotFound { method: String },
    #[error("function invocation error: {0}")]
    HandlerInvocation(String),
    #[error("function response error: {0}")]
    ResponseSchema(#[from] SchemaError),
    #[error("malformed request: {0}")]
    MalformedRequest(#[from] EventError),
}

/// The JSON payload of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_code: String,
    pub message: String,
}

/// A request that cannot be served as an HTTP invocation at all.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("unsupported invocation type {0:?}, only \"HTTP\" is supported")]
    UnsupportedType(String),
}

impl Failure {
    /// A handler failure with its description shortened for the wire.
    pub fn handler(cause: &str) -> Failure {
        let summary = match cause.char_indices().nth(MAX_SUMMARY_CHARS) {
            Some((end, _)) => format!("{}...", &cause[..end]),
            None => cause.to_string(),
        };
        Failure::HandlerInvocation(summary)
    }

    pub fn status(&self) -> u16 {
        match self {
            Failure::RouteNotFound { .. } => 404,
            Failure::HandlerInvocation(_) => 500,
            Failure::ResponseSchema(_) | Failure::MalformedRequest(_) => 502,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error_code: self.status().to_string(),
            message: self.to_string(),
        }
    }

    pub fn into_response(self) -> InvocationResponse {
        let body = self.body();
        let mut metadata = Metadata::new();
        metadata.insert(META_STATUS_CODE.to_string(), body.error_code.clone());

        let payload = serde_json::to_vec(&body).unwrap_or_else(|_| FALLBACK_BODY.to_vec());

        InvocationResponse { metadata, payload }
    }
}
