// Copyright 2020 Joyent, Inc.

//! Calling a function service over Fast.

use std::io::{Error, ErrorKind};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::config::DEFAULT_MAX_MESSAGE_LENGTH;
use crate::message::{InvocationRequest, InvocationResponse, META_INVOKE_ID};
use crate::protocol::{
    self, FastMessage, FastMessageData, FastMessageId, FastMessageServerError,
    FastMessageStatus, FastParseError, INVOKE_METHOD,
};

enum BufferAction {
    Keep,
    Done,
}

/// Send `request` as a new Fast message and return the message id it was
/// sent with. An `invokeId` is generated when the request does not carry one.
pub async fn send(
    request: &InvocationRequest,
    msg_id: &mut FastMessageId,
    stream: &mut TcpStream,
) -> Result<u32, Error> {
    let mut request = request.clone();
    request
        .metadata
        .entry(META_INVOKE_ID.to_string())
        .or_insert_with(|| Uuid::new_v4().to_string());

    let args = serde_json::to_value(&request)
        .map_err(|e| Error::new(ErrorKind::InvalidInput, e))?;
    let id = msg_id.next_id();
    let msg = FastMessage::data(id, FastMessageData::new(INVOKE_METHOD.to_string(), args));

    let mut write_buf = BytesMut::new();
    protocol::encode_msg(&msg, &mut write_buf)
        .map_err(|e| Error::new(ErrorKind::Other, e))?;
    stream.write_all(&write_buf).await?;
    Ok(id)
}

/// Read the frames answering message `id` until its END or ERROR frame,
/// handing every DATA and ERROR frame to `response_handler`. A frame for any
/// other id, or one larger than the default maximum message length, is an
/// error. Returns the number of bytes read.
pub async fn receive<F>(
    stream: &mut TcpStream,
    id: u32,
    mut response_handler: F,
) -> Result<usize, Error>
where
    F: FnMut(&FastMessage) -> Result<(), Error>,
{
    let mut msg_buf = BytesMut::with_capacity(4096);
    let mut total_bytes = 0;

    loop {
        let byte_count = stream.read_buf(&mut msg_buf).await?;
        if byte_count == 0 {
            let msg = "connection closed before the end of the response";
            return Err(Error::new(ErrorKind::UnexpectedEof, msg));
        }
        total_bytes += byte_count;

        if let BufferAction::Done =
            parse_and_handle_messages(&mut msg_buf, id, &mut response_handler)?
        {
            return Ok(total_bytes);
        }
    }
}

fn parse_and_handle_messages<F>(
    read_buf: &mut BytesMut,
    id: u32,
    response_handler: &mut F,
) -> Result<BufferAction, Error>
where
    F: FnMut(&FastMessage) -> Result<(), Error>,
{
    loop {
        if let Some(data_len) = FastMessage::peek_data_len(read_buf) {
            if data_len > DEFAULT_MAX_MESSAGE_LENGTH {
                let msg = format!(
                    "Fast message data length {} exceeds maximum of {}",
                    data_len, DEFAULT_MAX_MESSAGE_LENGTH
                );
                return Err(Error::new(ErrorKind::InvalidData, msg));
            }
        }

        match FastMessage::parse(read_buf) {
            Ok(fm) => {
                read_buf.advance(fm.msg_size.unwrap_or(protocol::FP_HEADER_SZ));
                if fm.id != id {
                    let msg = format!("received message id {}, expected {}", fm.id, id);
                    return Err(Error::new(ErrorKind::InvalidData, msg));
                }
                match fm.status {
                    FastMessageStatus::End => return Ok(BufferAction::Done),
                    FastMessageStatus::Error => {
                        response_handler(&fm)?;
                        return Ok(BufferAction::Done);
                    }
                    FastMessageStatus::Data => response_handler(&fm)?,
                }
            }
            Err(FastParseError::NotEnoughBytes(_)) => return Ok(BufferAction::Keep),
            Err(FastParseError::IOError(e)) => return Err(e),
        }
    }
}

/// Invoke a function and wait for its response. A transport-level refusal
/// (an ERROR frame) is returned as an `Err`; HTTP failures such as a 404 are
/// ordinary responses.
pub async fn call(
    request: &InvocationRequest,
    msg_id: &mut FastMessageId,
    stream: &mut TcpStream,
) -> Result<InvocationResponse, Error> {
    let id = send(request, msg_id, stream).await?;

    let mut response = None;
    let mut refusal = None;
    receive(stream, id, |msg| {
        match msg.status {
            FastMessageStatus::Data => {
                let decoded: InvocationResponse = serde_json::from_value(msg.data.d.clone())
                    .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
                response = Some(decoded);
            }
            FastMessageStatus::Error => {
                let server_error: FastMessageServerError =
                    serde_json::from_value(msg.data.d.clone())
                        .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
                refusal = Some(server_error);
            }
            FastMessageStatus::End => (),
        }
        Ok(())
    })
    .await?;

    if let Some(server_error) = refusal {
        return Err(Error::from(server_error));
    }
    response.ok_or_else(|| Error::new(ErrorKind::InvalidData, "no response data received"))
}
