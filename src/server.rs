// Copyright 2020 Joyent, Inc.

//! Serving invocations on a Fast connection.
//!
//! Frames are answered in the order they arrive. Each invocation runs on
//! tokio's blocking pool and is bounded by the configured invoke timeout. A
//! handler that overruns its deadline keeps its blocking thread until it
//! returns; only the caller is released.
//!
//! Replies obey the same `max_message_length` as requests. A response whose
//! frame data would exceed it is replaced by a 502 error response.

use std::io::Error;
use std::sync::Arc;
use std::time::Duration;

use futures::{future, StreamExt, TryStreamExt};
use slog::{debug, error, o, warn, Drain, Logger};
use tokio::net::TcpStream;
use tokio::{task, time};
use tokio_util::codec::Framed;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, Failure};
use crate::response::SchemaError;
use crate::message::{InvocationRequest, InvocationResponse, META_INVOKE_ID};
use crate::protocol::{
    FastMessage, FastMessageData, FastMessageServerError, FastMessageStatus, FastRpc,
    INVOKE_METHOD,
};

/// Build the task that serves `socket` until the peer disconnects or sends
/// an undecodable frame.
pub fn make_task(
    socket: TcpStream,
    dispatcher: Arc<Dispatcher>,
    config: &Config,
    log: Option<&Logger>,
) -> impl future::Future<Output = ()> + Send + 'static {
    let root = log
        .cloned()
        .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
    let peer = socket
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| String::from("unknown"));
    let log = root.new(o!("service" => config.name.clone(), "peer" => peer));
    let timeout = config.invoke_timeout();
    let max_len = config.max_message_length;

    let (tx, rx) = Framed::new(socket, FastRpc::new(config.max_message_length)).split();
    let task_log = log.clone();

    async move {
        let responses = rx.and_then(move |msgs| {
            let dispatcher = Arc::clone(&dispatcher);
            let log = task_log.clone();
            async move { Ok::<_, Error>(respond(msgs, dispatcher, timeout, max_len, &log).await) }
        }).boxed();

        if let Err(e) = responses.forward(tx).await {
            error!(log, "failed to process connection"; "err" => %e);
        }
        debug!(log, "connection closed");
    }
}

/// Answer every frame in `msgs`, in order. A response whose frame data
/// exceeds `max_len` bytes is answered with a 502 instead.
pub async fn respond(
    msgs: Vec<FastMessage>,
    dispatcher: Arc<Dispatcher>,
    timeout: Option<Duration>,
    max_len: usize,
    log: &Logger,
) -> Vec<FastMessage> {
    let mut response = Vec::with_capacity(msgs.len() * 2);
    for msg in msgs {
        response.extend(respond_one(msg, Arc::clone(&dispatcher), timeout, max_len, log).await);
    }
    response
}

async fn respond_one(
    msg: FastMessage,
    dispatcher: Arc<Dispatcher>,
    timeout: Option<Duration>,
    max_len: usize,
    log: &Logger,
) -> Vec<FastMessage> {
    let id = msg.id;
    let method = msg.data.m.name.clone();
    let fail = |name: &str, message: String| {
        vec![FastMessage::error(
            id,
            method.clone(),
            FastMessageServerError::new(name, message),
        )]
    };

    if msg.status != FastMessageStatus::Data {
        warn!(log, "ignoring non-data frame"; "msg_id" => id);
        return vec![];
    }

    if method != INVOKE_METHOD {
        warn!(log, "unsupported function"; "method" => &method, "msg_id" => id);
        return fail(
            "UnsupportedMethodError",
            format!("Unsupported function: {}", method),
        );
    }

    let request: InvocationRequest = match serde_json::from_value(msg.data.d) {
        Ok(request) => request,
        Err(e) => {
            warn!(log, "failed to parse invocation request"; "err" => %e, "msg_id" => id);
            return fail("InvalidRequestError", e.to_string());
        }
    };

    let response = match invoke(request, dispatcher, timeout, log).await {
        Ok(response) => response,
        Err(e @ DispatchError::UnsupportedType(_)) => {
            return fail("UnsupportedTypeError", e.to_string())
        }
    };

    let data = match reply_data(&method, &response) {
        Ok((data, size)) if size > max_len => {
            warn!(log, "response exceeds maximum message length";
                "msg_id" => id, "size" => size, "max" => max_len);
            let too_large = Failure::from(SchemaError::ResponseTooLarge { size, max: max_len });
            reply_data(&method, &too_large.into_response()).map(|(data, _)| data)
        }
        other => other.map(|(data, _)| data),
    };

    match data {
        Ok(data) => vec![FastMessage::data(id, data), FastMessage::end(id, method.clone())],
        Err(e) => fail("InternalError", e.to_string()),
    }
}

/// The DATA frame payload for `response` and its encoded length.
fn reply_data(
    method: &str,
    response: &InvocationResponse,
) -> Result<(FastMessageData, usize), serde_json::Error> {
    let data = FastMessageData::new(method.to_string(), serde_json::to_value(response)?);
    let size = serde_json::to_vec(&data)?.len();
    Ok((data, size))
}

/// Dispatch `request` off the async runtime, enforcing `timeout`.
pub async fn invoke(
    request: InvocationRequest,
    dispatcher: Arc<Dispatcher>,
    timeout: Option<Duration>,
    log: &Logger,
) -> Result<InvocationResponse, DispatchError> {
    let invoke_id = request.meta(META_INVOKE_ID).to_string();
    let handle = task::spawn_blocking(move || dispatcher.dispatch(&request));

    let joined = match timeout {
        Some(limit) => match time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(log, "function invocation timed out";
                    "invoke_id" => &invoke_id, "timeout_ms" => limit.as_millis() as u64);
                let cause = format!("timed out after {}ms", limit.as_millis());
                return Ok(Failure::handler(&cause).into_response());
            }
        },
        None => handle.await,
    };

    joined.unwrap_or_else(|e| {
        error!(log, "invocation task failed"; "invoke_id" => &invoke_id, "err" => %e);
        Ok(Failure::handler("invocation task failed").into_response())
    })
}
