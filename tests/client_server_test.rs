// Copyright 2020 Joyent, Inc.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use slog::{info, o, Drain, Level, LevelFilter, Logger};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::block_on;

use fast_function::client;
use fast_function::config::Config;
use fast_function::dispatch::Dispatcher;
use fast_function::error::ErrorBody;
use fast_function::message::{
    InvocationRequest, META_HTTP_METHOD, META_INVOKE_ID, META_PATH, META_QUERY_STRING,
};
use fast_function::protocol::FastMessageId;
use fast_function::registry::{handler_fn, FunctionRegistry, HandlerError};
use fast_function::server;

fn registry() -> FunctionRegistry {
    FunctionRegistry::builder()
        .register(
            "echo",
            handler_fn(|event, ctx| {
                let body = json!({
                    "path": event.path,
                    "httpMethod": event.http_method,
                    "query": event.query_string_parameters,
                    "headers": event.headers,
                    "body": event.body,
                    "requestId": event.request_context.request_id,
                    "functionName": ctx.function_name,
                });
                Ok(json!({
                    "statusCode": 200,
                    "headers": {"X-Handler": "echo"},
                    "body": body.to_string(),
                }))
            }),
        )
        .register(
            "text",
            handler_fn(|_event, _ctx| Ok(json!({"statusCode": 201, "body": "created"}))),
        )
        .register(
            "fail",
            handler_fn(|_event, _ctx| Err(HandlerError::from("out of ink"))),
        )
        .register(
            "bad-status",
            handler_fn(|_event, _ctx| Ok(json!({"statusCode": "200"}))),
        )
        .register(
            "slow",
            handler_fn(|_event, _ctx| {
                thread::sleep(Duration::from_millis(1000));
                Ok(json!({"statusCode": 200}))
            }),
        )
        .build()
}

#[tokio::main]
async fn run_server(ready: mpsc::Sender<SocketAddr>) {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let root_log = Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            Level::Info,
        ))
        .fuse(),
        o!("build-id" => "0.1.0"),
    );

    let config = Config {
        address: "127.0.0.1:0".parse().unwrap(),
        invoke_timeout_ms: Some(200),
        ..Config::default()
    };
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry()), root_log.clone()));

    let listener = TcpListener::bind(config.address).await.expect("failed to bind");
    let addr = listener.local_addr().expect("no local address");
    info!(root_log, "listening for fast requests"; "address" => addr);
    ready.send(addr).expect("test thread went away");

    while let Ok((stream, _)) = listener.accept().await {
        let task = server::make_task(stream, Arc::clone(&dispatcher), &config, Some(&root_log));
        tokio::spawn(task);
    }
}

fn start_server() -> SocketAddr {
    let (tx, rx) = mpsc::channel();
    let _h_server = thread::spawn(move || run_server(tx));
    rx.recv().expect("server failed to start")
}

fn http(method: &str) -> InvocationRequest {
    InvocationRequest::http("books", method)
        .with_metadata(META_PATH, "/books")
        .with_metadata(META_HTTP_METHOD, "POST")
        .with_metadata(META_QUERY_STRING, "a=1&b=2")
}

fn error_body(payload: &[u8]) -> ErrorBody {
    serde_json::from_slice(payload).unwrap()
}

async fn run_client(addr: SocketAddr) -> Result<(), Box<dyn StdError>> {
    let mut stream = TcpStream::connect(&addr).await?;
    let mut msg_id = FastMessageId::new();

    // Explicit route, every request field visible to the handler.
    let mut headers = BTreeMap::new();
    headers.insert(String::from("Accept"), String::from("*/*"));
    let request = http("echo")
        .with_headers(&headers)
        .with_metadata(META_INVOKE_ID, "inv-7")
        .with_payload(r#"{"title":"dune"}"#);
    let response = client::call(&request, &mut msg_id, &mut stream).await?;
    assert_eq!(response.status_code(), Some(200));
    let response_headers = response.headers()?;
    assert_eq!(response_headers["Content-Type"], "application/json");
    assert_eq!(response_headers["X-Handler"], "echo");
    let echoed: Value = serde_json::from_slice(&response.payload)?;
    assert_eq!(
        echoed,
        json!({
            "path": "/books",
            "httpMethod": "POST",
            "query": {"a": ["1"], "b": ["2"]},
            "headers": {"Accept": "*/*"},
            "body": "{\"title\":\"dune\"}",
            "requestId": "inv-7",
            "functionName": "books",
        })
    );

    // The client fills in an invoke id when none is given.
    let response = client::call(&http(""), &mut msg_id, &mut stream).await?;
    let echoed: Value = serde_json::from_slice(&response.payload)?;
    assert!(!echoed["requestId"].as_str().unwrap_or("").is_empty());

    let response = client::call(&http("text"), &mut msg_id, &mut stream).await?;
    assert_eq!(response.status_code(), Some(201));
    assert_eq!(response.headers()?["Content-Type"], "text/plain");
    assert_eq!(response.payload, b"created".to_vec());

    let response = client::call(&http("missing"), &mut msg_id, &mut stream).await?;
    assert_eq!(response.status_code(), Some(404));
    let body = error_body(&response.payload);
    assert_eq!(body.error_code, "404");
    assert_eq!(body.message, "no router");

    let response = client::call(&http("fail"), &mut msg_id, &mut stream).await?;
    assert_eq!(response.status_code(), Some(500));
    assert!(error_body(&response.payload).message.contains("out of ink"));

    let response = client::call(&http("bad-status"), &mut msg_id, &mut stream).await?;
    assert_eq!(response.status_code(), Some(502));

    let response = client::call(&http("slow"), &mut msg_id, &mut stream).await?;
    assert_eq!(response.status_code(), Some(500));
    assert!(error_body(&response.payload).message.contains("timed out"));

    // A non-HTTP invocation is refused but the connection stays usable.
    let mut mqtt = http("echo");
    mqtt.kind = String::from("MQTT");
    let refused = client::call(&mqtt, &mut msg_id, &mut stream).await;
    assert_eq!(refused.map_err(|e| e.kind()).unwrap_err(), ErrorKind::Other);

    let response = client::call(&http("text"), &mut msg_id, &mut stream).await?;
    assert_eq!(response.status_code(), Some(201));

    let std_stream = stream.into_std()?;
    std_stream.shutdown(Shutdown::Both)?;

    Ok(())
}

#[test]
fn client_server_comms() {
    let addr = start_server();
    let result = block_on(run_client(addr));
    assert!(result.is_ok(), "client failed: {:?}", result.err());
}

async fn run_large_payloads(addr: SocketAddr) -> Result<(), Box<dyn StdError>> {
    let mut stream = TcpStream::connect(&addr).await?;
    let mut msg_id = FastMessageId::new();

    for i in 1..20 {
        let body = "a".repeat(i * 10_000);
        let request = http("echo").with_payload(body.clone());
        let response = client::call(&request, &mut msg_id, &mut stream).await?;
        let echoed: Value = serde_json::from_slice(&response.payload)?;
        assert_eq!(echoed["body"].as_str().map(str::len), Some(body.len()));
    }

    Ok(())
}

#[test]
fn large_payloads_round_trip() {
    let addr = start_server();
    let result = block_on(run_large_payloads(addr));
    assert!(result.is_ok(), "client failed: {:?}", result.err());
}
