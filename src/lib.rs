// Copyright 2020 Joyent, Inc.

//! Fast Function: HTTP-shaped function invocation over Fast RPC
//!
//! A function service exposes a set of named handlers, each written against
//! an HTTP request/response shape. Callers reach them through a generic
//! invocation message carried by the [Fast](https://github.com/joyent/node-fast)
//! protocol:
//!
//! ```text
//! InvocationRequest  { type, name, method, metadata: map<string,string>, payload: bytes }
//! InvocationResponse { metadata: map<string,string>, payload: bytes }
//! ```
//!
//! Serving one invocation:
//!
//! * the request metadata and payload are rebuilt into an [`event::Event`]
//!   (`path`, `httpMethod`, `headers`, `queryStringParameters`, `body`, ...),
//! * `method` selects a handler from the [`registry::FunctionRegistry`]; an
//!   empty `method` selects the handler registered first,
//! * the handler's result is validated against the HTTP response shape and
//!   encoded back into metadata (`statusCode`, `headers`, `isBase64Encoded`)
//!   and payload (the body),
//! * any failure along the way becomes a response with a JSON error body
//!   (404 no route, 500 handler failure, 502 bad request or result).
//!
//! Metadata is a flat string map, so header maps are flattened with the
//! delimiters described in [`header`].
//!
//! Protocol definition
//!
//! Fast protocol messages have the following structure:
//!
//! * VERSION   1-byte integer.  The only supported value is "1".
//!
//! * TYPE      1-byte integer.  The only supported value is TYPE_JSON (0x1),
//!           indicating that the data payload is an encoded JSON object.
//!
//! * STATUS    1-byte integer.  The only supported values are:
//!
//!     * STATUS_DATA  0x1  indicates a "data" message
//!
//!     * STATUS_END   0x2  indicates an "end" message
//!
//!     * STATUS_ERROR 0x3  indicates an "error" message
//!
//! * MSGID1...MSGID4    4-byte big-endian unsigned integer, a unique identifier
//!                    for this message
//!
//! * CRC1...CRC4        4-byte big-endian unsigned integer representing the CRC16
//!                     value of the data payload
//!
//! * DLEN0...DLEN4      4-byte big-endian unsigned integer representing the number
//!                    of bytes of data payload that follow
//!
//! * DATA0...DATAN      Data payload.  This is a JSON-encoded object (for TYPE =
//!                    TYPE_JSON).  The encoding length in bytes is given by the
//!                    DLEN0...DLEN4 bytes.
//!
//! Message IDs: each Fast message has a message id, which is scoped to the Fast
//! connection.  These are allocated sequentially from a circular 31-bit space.

#![allow(missing_docs)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod header;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod response;
pub mod server;
