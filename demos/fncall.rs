// Copyright 2020 Joyent, Inc.

use std::net::SocketAddr;
use std::process;

use clap::{crate_version, value_t, App, Arg, ArgMatches};
use tokio::net::TcpStream;

use fast_function::header::HeaderMap;
use fast_function::message::{
    InvocationRequest, META_HTTP_METHOD, META_IS_BASE64_ENCODED, META_PATH,
    META_QUERY_STRING,
};
use fast_function::protocol::FastMessageId;
use fast_function::client;

static APP: &str = "fncall";
static DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u32 = 2030;

pub fn parse_opts<'a, 'b>(app: String) -> ArgMatches<'a> {
    App::new(app)
        .about("Command-line tool for invoking an HTTP function over Fast")
        .version(crate_version!())
        .arg(
            Arg::with_name("host")
                .help("DNS name or IP address for remote server")
                .long("host")
                .short("h")
                .takes_value(true)
                .required(false),
        )
        .arg(
            Arg::with_name("port")
                .help("TCP port for remote server (Default: 2030)")
                .long("port")
                .short("p")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("service")
                .help("Function service name")
                .long("service")
                .short("s")
                .takes_value(true)
                .default_value("fast-function"),
        )
        .arg(
            Arg::with_name("method")
                .help("Function to invoke; the service default when omitted")
                .long("method")
                .short("m")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("path")
                .help("Request path")
                .long("path")
                .takes_value(true)
                .default_value("/"),
        )
        .arg(
            Arg::with_name("http_method")
                .help("HTTP method")
                .long("request")
                .short("X")
                .takes_value(true)
                .default_value("GET"),
        )
        .arg(
            Arg::with_name("query")
                .help("Query string, e.g. a=1&b=2")
                .long("query")
                .short("q")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("header")
                .help("Request header as name:value")
                .long("header")
                .short("H")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("data")
                .help("Request body")
                .long("data")
                .short("d")
                .takes_value(true),
        )
        .get_matches()
}

fn parse_headers(matches: &ArgMatches) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for raw in matches.values_of("header").into_iter().flatten() {
        match raw.split_once(':') {
            Some((name, value)) => {
                headers.insert(name.trim().to_string(), value.trim().to_string());
            }
            None => {
                eprintln!("Ignoring malformed header (expected name:value): {}", raw);
            }
        }
    }
    headers
}

fn build_request(matches: &ArgMatches) -> InvocationRequest {
    let service = matches.value_of("service").unwrap_or("fast-function");
    let method = matches.value_of("method").unwrap_or("");
    let mut request = InvocationRequest::http(service, method)
        .with_metadata(META_PATH, matches.value_of("path").unwrap_or("/"))
        .with_metadata(
            META_HTTP_METHOD,
            &matches.value_of("http_method").unwrap_or("GET").to_uppercase(),
        )
        .with_metadata(META_IS_BASE64_ENCODED, "false")
        .with_metadata(META_QUERY_STRING, matches.value_of("query").unwrap_or(""))
        .with_payload(matches.value_of("data").unwrap_or(""));

    let headers = parse_headers(matches);
    if !headers.is_empty() {
        request = request.with_headers(&headers);
    }
    request
}

#[tokio::main]
async fn main() {
    let matches = parse_opts(APP.to_string());
    let host = String::from(matches.value_of("host").unwrap_or(DEFAULT_HOST));
    let port = value_t!(matches, "port", u32).unwrap_or(DEFAULT_PORT);
    let addr = [host, String::from(":"), port.to_string()]
        .concat()
        .parse::<SocketAddr>()
        .unwrap_or_else(|e| {
            eprintln!(
                "Failed to parse host and port as valid socket address: \
                 {}",
                e
            );
            process::exit(1)
        });

    let request = build_request(&matches);

    let mut stream = TcpStream::connect(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to connect to server: {}", e);
        process::exit(1)
    });

    let mut msg_id = FastMessageId::new();

    match client::call(&request, &mut msg_id, &mut stream).await {
        Ok(response) => {
            match response.status_code() {
                Some(code) => println!("status: {}", code),
                None => println!("status: (missing)"),
            }
            match response.headers() {
                Ok(headers) => {
                    for (name, value) in headers {
                        println!("{}: {}", name, value);
                    }
                }
                Err(e) => eprintln!("Malformed response headers: {}", e),
            }
            println!();
            println!("{}", String::from_utf8_lossy(&response.payload));
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1)
        }
    }
}
