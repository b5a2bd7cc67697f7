// Copyright 2020 Joyent, Inc.

//! Fast framing for invocation messages.
//!
//! Every frame is a 15-byte header followed by a JSON data payload of the
//! form `{"m": {"uts": <micros>, "name": <string>}, "d": <value>}`. An
//! invocation travels in a DATA frame named [`INVOKE_METHOD`] whose `d` is an
//! [`InvocationRequest`](crate::message::InvocationRequest); the reply is a
//! DATA frame carrying the
//! [`InvocationResponse`](crate::message::InvocationResponse) followed by an
//! END frame, or a single ERROR frame.

use std::io::{Error, ErrorKind};
use std::{io, str};

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, BytesMut};
use chrono::Utc;
use crc16::{State, ARC};
use num::{FromPrimitive, ToPrimitive};
use num_derive::{FromPrimitive, ToPrimitive};
use serde_derive::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::DEFAULT_MAX_MESSAGE_LENGTH;

/// Name of the Fast RPC method that carries invocations.
pub const INVOKE_METHOD: &str = "invoke";

/*
 * Message IDs: each Fast message has a message id, which is scoped to the Fast
 * connection.  We allocate these sequentially from a circular 31-bit space.
 */
const FP_MSGID_MAX: u32 = i32::max_value() as u32;

const FP_OFF_TYPE: usize = 0x1;
const FP_OFF_STATUS: usize = 0x2;
const FP_OFF_MSGID: usize = 0x3;
const FP_OFF_DATALEN: usize = 0xb;
const FP_OFF_DATA: usize = 0xf;

pub const FP_HEADER_SZ: usize = FP_OFF_DATA;

const FP_VERSION_1: u8 = 0x1;
const FP_VERSION_CURRENT: u8 = FP_VERSION_1;

#[derive(Debug)]
pub enum FastParseError {
    NotEnoughBytes(usize),
    IOError(Error),
}

impl From<io::Error> for FastParseError {
    fn from(error: io::Error) -> Self {
        FastParseError::IOError(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive, ToPrimitive)]
pub enum FastMessageType {
    Json = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive, ToPrimitive)]
pub enum FastMessageStatus {
    Data = 1,
    End = 2,
    Error = 3,
}

struct FastMessageHeader {
    msg_type: FastMessageType,
    status: FastMessageStatus,
    id: u32,
    data_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastMessageMetaData {
    pub uts: i64,
    pub name: String,
}

impl FastMessageMetaData {
    pub fn new(n: String) -> FastMessageMetaData {
        FastMessageMetaData {
            uts: Utc::now().timestamp_micros(),
            name: n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastMessageData {
    pub m: FastMessageMetaData,
    pub d: Value,
}

impl FastMessageData {
    pub fn new(n: String, d: Value) -> FastMessageData {
        FastMessageData {
            m: FastMessageMetaData::new(n),
            d,
        }
    }
}

/// The `d` value of an ERROR frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastMessageServerError {
    pub name: String,
    pub message: String,
}

impl FastMessageServerError {
    pub fn new(name: &str, message: String) -> Self {
        FastMessageServerError {
            name: String::from(name),
            message,
        }
    }
}

impl From<FastMessageServerError> for Error {
    fn from(error: FastMessageServerError) -> Self {
        Error::new(ErrorKind::Other, format!("{}: {}", error.name, error.message))
    }
}

/// Allocates message ids for one connection.
#[derive(Debug, Default)]
pub struct FastMessageId(u32);

impl FastMessageId {
    pub fn new() -> Self {
        FastMessageId(0)
    }

    pub fn next_id(&mut self) -> u32 {
        self.0 = self.0 % FP_MSGID_MAX + 1;
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FastMessage {
    pub msg_type: FastMessageType,
    pub status: FastMessageStatus,
    pub id: u32,
    /// Size of the encoded frame; only known for parsed messages.
    pub msg_size: Option<usize>,
    pub data: FastMessageData,
}

impl FastMessage {
    pub fn parse(buf: &[u8]) -> Result<FastMessage, FastParseError> {
        FastMessage::check_buffer_size(buf)?;
        let header = FastMessage::parse_header(buf)?;

        FastMessage::validate_data_length(buf, header.data_len)?;
        // The CRC is not checked: node-fast peers compute it with an old,
        // buggy crc library, so honest frames can carry a mismatching value.
        let raw_data = &buf[FP_OFF_DATA..FP_OFF_DATA + header.data_len];
        let data = FastMessage::parse_data(raw_data)?;

        Ok(FastMessage {
            msg_type: header.msg_type,
            status: header.status,
            id: header.id,
            msg_size: Some(FP_HEADER_SZ + header.data_len),
            data,
        })
    }

    /// Data length announced by the frame header at the start of `buf`.
    pub fn peek_data_len(buf: &[u8]) -> Option<usize> {
        if buf.len() < FP_HEADER_SZ {
            None
        } else {
            Some(BigEndian::read_u32(&buf[FP_OFF_DATALEN..FP_OFF_DATALEN + 4]) as usize)
        }
    }

    fn check_buffer_size(buf: &[u8]) -> Result<(), FastParseError> {
        if buf.len() < FP_HEADER_SZ {
            Err(FastParseError::NotEnoughBytes(buf.len()))
        } else {
            Ok(())
        }
    }

    fn parse_header(buf: &[u8]) -> Result<FastMessageHeader, FastParseError> {
        let msg_type = FromPrimitive::from_u8(buf[FP_OFF_TYPE]).ok_or_else(|| {
            let msg = "Failed to parse message type";
            Error::new(ErrorKind::InvalidData, msg)
        })?;
        let status = FromPrimitive::from_u8(buf[FP_OFF_STATUS]).ok_or_else(|| {
            let msg = "Failed to parse message status";
            Error::new(ErrorKind::InvalidData, msg)
        })?;
        let msg_id = BigEndian::read_u32(&buf[FP_OFF_MSGID..FP_OFF_MSGID + 4]);
        let data_len =
            BigEndian::read_u32(&buf[FP_OFF_DATALEN..FP_OFF_DATALEN + 4]) as usize;

        Ok(FastMessageHeader {
            msg_type,
            status,
            id: msg_id,
            data_len,
        })
    }

    fn validate_data_length(buf: &[u8], data_length: usize) -> Result<(), FastParseError> {
        if buf.len() < (FP_HEADER_SZ + data_length) {
            Err(FastParseError::NotEnoughBytes(buf.len()))
        } else {
            Ok(())
        }
    }

    fn parse_data(data_buf: &[u8]) -> Result<FastMessageData, FastParseError> {
        match str::from_utf8(data_buf) {
            Ok(data_str) => serde_json::from_str(data_str).map_err(|_e| {
                let msg = "Failed to parse data payload as JSON";
                FastParseError::IOError(Error::new(ErrorKind::InvalidData, msg))
            }),
            Err(_) => {
                let msg = "Failed to parse data payload as UTF-8";
                Err(FastParseError::IOError(Error::new(ErrorKind::InvalidData, msg)))
            }
        }
    }

    pub fn data(msg_id: u32, data: FastMessageData) -> FastMessage {
        FastMessage {
            msg_type: FastMessageType::Json,
            status: FastMessageStatus::Data,
            id: msg_id,
            msg_size: None,
            data,
        }
    }

    pub fn end(msg_id: u32, method: String) -> FastMessage {
        FastMessage {
            msg_type: FastMessageType::Json,
            status: FastMessageStatus::End,
            id: msg_id,
            msg_size: None,
            data: FastMessageData::new(method, Value::Array(vec![])),
        }
    }

    pub fn error(msg_id: u32, method: String, error: FastMessageServerError) -> FastMessage {
        FastMessage {
            msg_type: FastMessageType::Json,
            status: FastMessageStatus::Error,
            id: msg_id,
            msg_size: None,
            data: FastMessageData::new(
                method,
                json!({ "name": error.name, "message": error.message }),
            ),
        }
    }
}

/// Codec for a stream of Fast frames, rejecting frames whose data exceeds
/// `max_message_length`.
#[derive(Debug, Clone)]
pub struct FastRpc {
    max_message_length: usize,
}

impl FastRpc {
    pub fn new(max_message_length: usize) -> Self {
        FastRpc { max_message_length }
    }
}

impl Default for FastRpc {
    fn default() -> Self {
        FastRpc::new(DEFAULT_MAX_MESSAGE_LENGTH)
    }
}

impl Decoder for FastRpc {
    type Item = Vec<FastMessage>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        let mut msgs: Self::Item = Vec::new();

        while !buf.is_empty() {
            if let Some(data_len) = FastMessage::peek_data_len(buf) {
                if data_len > self.max_message_length {
                    let msg = format!(
                        "Fast message data length {} exceeds maximum of {}",
                        data_len, self.max_message_length
                    );
                    return Err(Error::new(ErrorKind::InvalidData, msg));
                }
            }

            match FastMessage::parse(buf) {
                Ok(parsed_msg) => {
                    let msg_size = parsed_msg
                        .msg_size
                        .unwrap_or(FP_HEADER_SZ);
                    buf.advance(msg_size);
                    msgs.push(parsed_msg);
                }
                Err(FastParseError::NotEnoughBytes(_)) => break,
                Err(FastParseError::IOError(e)) => return Err(e),
            }
        }

        if msgs.is_empty() {
            Ok(None)
        } else {
            Ok(Some(msgs))
        }
    }
}

impl Encoder<Vec<FastMessage>> for FastRpc {
    type Error = Error;

    fn encode(&mut self, item: Vec<FastMessage>, buf: &mut BytesMut) -> Result<(), Error> {
        item.iter()
            .try_for_each(|msg| encode_msg(msg, buf))
            .map_err(|e| Error::new(ErrorKind::Other, e))
    }
}

pub fn encode_msg(msg: &FastMessage, buf: &mut BytesMut) -> Result<(), String> {
    let m_msg_type_u8 = ToPrimitive::to_u8(&msg.msg_type);
    let m_status_u8 = ToPrimitive::to_u8(&msg.status);
    match (m_msg_type_u8, m_status_u8) {
        (Some(msg_type_u8), Some(status_u8)) => {
            let data_str = serde_json::to_string(&msg.data)
                .map_err(|e| format!("Failed to serialize message data: {}", e))?;
            let data_len = data_str.len();
            buf.reserve(FP_HEADER_SZ + data_len);
            buf.put_u8(FP_VERSION_CURRENT);
            buf.put_u8(msg_type_u8);
            buf.put_u8(status_u8);
            buf.put_u32(msg.id);
            buf.put_u32(State::<ARC>::calculate(data_str.as_bytes()) as u32);
            buf.put_u32(data_len as u32);
            buf.put_slice(data_str.as_bytes());
            Ok(())
        }
        (None, Some(_)) => Err(String::from("Invalid message type")),
        (Some(_), None) => Err(String::from("Invalid status")),
        (None, None) => Err(String::from("Invalid message type and status")),
    }
}
