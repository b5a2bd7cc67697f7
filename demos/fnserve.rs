// Copyright 2020 Joyent, Inc.

use std::net::SocketAddr;
use std::process;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::prelude::*;
use clap::{crate_version, value_t, App, Arg, ArgMatches};
use serde_json::{json, Value};
use slog::{debug, error, info, o, Drain, Logger};
use tokio::net::TcpListener;

use fast_function::config::{self, Config};
use fast_function::dispatch::Dispatcher;
use fast_function::event::Event;
use fast_function::registry::{handler_fn, Context, FunctionRegistry, HandlerError};
use fast_function::server;

static APP: &str = "fnserve";

fn parse_opts<'a, 'b>(app: String) -> ArgMatches<'a> {
    App::new(app)
        .about("Serve sample HTTP functions over Fast")
        .version(crate_version!())
        .arg(
            Arg::with_name("name")
                .help("Service name used in log records")
                .long("name")
                .env("SERVICE_NAME")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("address")
                .help("Listen address (Default: 127.0.0.1:2030)")
                .long("address")
                .short("a")
                .env("SERVICE_ADDRESS")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("timeout")
                .help("Invocation timeout in milliseconds, 0 disables it (Default: 30000)")
                .long("timeout")
                .short("t")
                .takes_value(true),
        )
        .get_matches()
}

fn build_config(matches: &ArgMatches) -> Config {
    let defaults = Config::default();
    let address = value_t!(matches, "address", SocketAddr).unwrap_or(defaults.address);
    let invoke_timeout_ms = match value_t!(matches, "timeout", u64) {
        Ok(0) => None,
        Ok(ms) => Some(ms),
        Err(_) => Some(config::DEFAULT_INVOKE_TIMEOUT_MS),
    };

    Config {
        name: matches
            .value_of("name")
            .map(String::from)
            .unwrap_or(defaults.name),
        address,
        invoke_timeout_ms,
        ..defaults
    }
}

fn hello_handler(event: &Event, ctx: &Context) -> Result<Value, HandlerError> {
    let who = event
        .query_string_parameters
        .get("name")
        .and_then(|names| names.first())
        .map(String::as_str)
        .unwrap_or("world");
    Ok(json!({
        "statusCode": 200,
        "body": format!("hello, {} (from {})", who, ctx.function_name),
    }))
}

fn echo_handler(event: &Event, _ctx: &Context) -> Result<Value, HandlerError> {
    let body = serde_json::to_string(event)?;
    Ok(json!({
        "statusCode": 200,
        "headers": {"X-Request-Id": event.request_context.request_id},
        "body": body,
    }))
}

fn date_handler(_event: &Event, _ctx: &Context) -> Result<Value, HandlerError> {
    let now = Utc::now();
    let body = json!({
        "timestamp": now.timestamp_millis(),
        "iso8601": now.to_rfc3339(),
    });
    Ok(Value::String(
        json!({"statusCode": 200, "body": body.to_string()}).to_string(),
    ))
}

fn registry(log: &Logger) -> FunctionRegistry {
    let slow_log = log.new(o!("function" => "slow"));
    FunctionRegistry::builder()
        .register("hello", hello_handler)
        .register("echo", echo_handler)
        .register("date", date_handler)
        .register(
            "slow",
            handler_fn(move |event, _ctx| {
                let delay = event
                    .query_string_parameters
                    .get("ms")
                    .and_then(|v| v.first())
                    .and_then(|ms| ms.parse().ok())
                    .unwrap_or(1000);
                debug!(slow_log, "sleeping"; "ms" => delay);
                thread::sleep(Duration::from_millis(delay));
                Ok(json!({"statusCode": 204}))
            }),
        )
        .register(
            "fail",
            handler_fn(|_event, _ctx| Err(HandlerError::from("this function always fails"))),
        )
        .build()
}

#[tokio::main]
async fn main() {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let root_log = Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => "0.1.0"),
    );

    let matches = parse_opts(APP.to_string());
    let config = build_config(&matches);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        process::exit(1);
    }

    let registry = registry(&root_log);
    let functions: Vec<&str> = registry.names().collect();
    info!(root_log, "loaded functions"; "functions" => functions.join(","));
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), root_log.clone()));

    let listener = TcpListener::bind(config.address).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind {}: {}", config.address, e);
        process::exit(1)
    });
    info!(root_log, "listening for fast requests"; "address" => config.address);

    loop {
        match listener.accept().await {
            Ok((socket, _)) => {
                let task =
                    server::make_task(socket, Arc::clone(&dispatcher), &config, Some(&root_log));
                tokio::spawn(task);
            }
            Err(e) => error!(root_log, "failed to accept socket"; "err" => %e),
        }
    }
}
