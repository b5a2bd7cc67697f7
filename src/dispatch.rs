// Copyright 2020 Joyent, Inc.

//! Routing an invocation to its handler.
//!
//! An HTTP invocation goes through `Received -> Routed -> Invoking ->
//! {Succeeded, Failed} -> Encoded` exactly once; nothing is retried. Both
//! branches end in a well-formed [`InvocationResponse`].

use std::any::Any;
use std::convert::TryFrom;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use slog::{debug, error, info, warn, Logger};

use crate::error::{DispatchError, Failure};
use crate::event::Event;
use crate::message::{InvocationRequest, InvocationResponse, HTTP_TYPE, META_INVOKE_ID};
use crate::registry::{Context, FunctionRegistry, Handler};
use crate::response::{self, HandlerResult};

pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    log: Logger,
}

impl Dispatcher {
    pub fn new(registry: Arc<FunctionRegistry>, log: Logger) -> Dispatcher {
        Dispatcher { registry, log }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Serve one invocation. Every HTTP invocation yields a response, failed
    /// ones included; an `Err` means the request is not an HTTP invocation.
    pub fn dispatch(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, DispatchError> {
        if request.kind != HTTP_TYPE {
            error!(self.log, "unsupported invocation type";
                "type" => &request.kind, "name" => &request.name);
            return Err(DispatchError::UnsupportedType(request.kind.clone()));
        }

        let invoke_id = request.meta(META_INVOKE_ID);
        let log = self.log.new(slog::o!(
            "invoke_id" => invoke_id.to_string(),
            "name" => request.name.clone()
        ));

        match self.dispatch_http(request, &log) {
            Ok(response) => Ok(response),
            Err(failure) => {
                match &failure {
                    Failure::RouteNotFound { method } => {
                        info!(log, "no route to method"; "method" => method)
                    }
                    Failure::HandlerInvocation(_) => (),
                    Failure::ResponseSchema(e) => {
                        warn!(log, "function response rejected"; "err" => %e)
                    }
                    Failure::MalformedRequest(e) => {
                        warn!(log, "failed to decode request"; "err" => %e)
                    }
                }
                Ok(failure.into_response())
            }
        }
    }

    fn dispatch_http(
        &self,
        request: &InvocationRequest,
        log: &Logger,
    ) -> Result<InvocationResponse, Failure> {
        let (method, handler) = self.route(&request.method)?;
        let event = Event::from_request(request)?;
        let ctx = Context {
            invoke_id: request.meta(META_INVOKE_ID).to_string(),
            function_name: request.name.clone(),
            method: method.to_string(),
        };

        debug!(log, "invoking function"; "method" => method,
            "path" => &event.path, "http_method" => &event.http_method);

        let value = invoke_guarded(handler, &event, &ctx).map_err(|cause| {
            error!(log, "error when invoking function";
                "method" => method, "err" => &cause);
            Failure::handler(&cause)
        })?;

        let result = HandlerResult::try_from(value)?;
        Ok(response::normalize(&result)?)
    }

    /// An empty method selects the default route.
    fn route<'a>(
        &'a self,
        method: &'a str,
    ) -> Result<(&'a str, &'a dyn Handler), Failure> {
        let found = if method.is_empty() {
            self.registry.default_route()
        } else {
            self.registry
                .lookup(method)
                .map(|handler| (method, handler))
        };

        found.ok_or_else(|| Failure::RouteNotFound {
            method: method.to_string(),
        })
    }
}

/// Run the handler, turning both returned errors and panics into a
/// description of the cause.
fn invoke_guarded(
    handler: &dyn Handler,
    event: &Event,
    ctx: &Context,
) -> Result<serde_json::Value, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.invoke(event, ctx))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("handler panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::{json, Value};
    use slog::{o, Discard};

    use crate::error::ErrorBody;
    use crate::message::{META_HEADERS, META_PATH, META_QUERY_STRING};
    use crate::registry::{handler_fn, HandlerError};
    use crate::response::{CONTENT_TYPE, CONTENT_TYPE_JSON};

    fn dispatcher() -> Dispatcher {
        let registry = FunctionRegistry::builder()
            .register(
                "echo",
                handler_fn(|event, _ctx| {
                    Ok(json!({"statusCode": 200, "body": event.body}))
                }),
            )
            .register(
                "context",
                handler_fn(|event, ctx| {
                    let body = json!({
                        "invokeId": ctx.invoke_id,
                        "functionName": ctx.function_name,
                        "method": ctx.method,
                        "query": event.query_string_parameters,
                    });
                    Ok(json!({"statusCode": 200, "body": body.to_string()}))
                }),
            )
            .register(
                "fail",
                handler_fn(|_event, _ctx| Err(HandlerError::from("database unavailable"))),
            )
            .register(
                "panic",
                handler_fn(|_event, _ctx| -> Result<Value, HandlerError> {
                    panic!("handler blew up")
                }),
            )
            .register(
                "string-status",
                handler_fn(|_event, _ctx| Ok(json!({"statusCode": "200"}))),
            )
            .register("no-status", handler_fn(|_event, _ctx| Ok(json!({"body": "x"}))))
            .register(
                "reflect-header",
                handler_fn(|event, _ctx| {
                    Ok(json!({"statusCode": 200, "headers": {"X-Echo": event.body}}))
                }),
            )
            .register(
                "raw",
                handler_fn(|_event, _ctx| {
                    Ok(Value::String(String::from(r#"{"statusCode": 202, "body": "queued"}"#)))
                }),
            )
            .build();
        Dispatcher::new(Arc::new(registry), Logger::root(Discard, o!()))
    }

    fn body_of(resp: &InvocationResponse) -> ErrorBody {
        serde_json::from_slice(&resp.payload).unwrap()
    }

    #[test]
    fn routes_to_named_handler() {
        let req = InvocationRequest::http("svc", "echo").with_payload(r#"{"a":1}"#);
        let resp = dispatcher().dispatch(&req).unwrap();
        assert_eq!(resp.status_code(), Some(200));
        assert_eq!(resp.payload, br#"{"a":1}"#.to_vec());
        assert_eq!(
            resp.headers().unwrap().get(CONTENT_TYPE).map(String::as_str),
            Some(CONTENT_TYPE_JSON)
        );
    }

    #[test]
    fn empty_method_uses_first_registered() {
        let req = InvocationRequest::http("svc", "").with_payload("plain");
        let resp = dispatcher().dispatch(&req).unwrap();
        assert_eq!(resp.status_code(), Some(200));
        assert_eq!(resp.payload, b"plain".to_vec());
    }

    #[test]
    fn handler_sees_context_and_event() {
        let req = InvocationRequest::http("books", "context")
            .with_metadata(META_INVOKE_ID, "inv-42")
            .with_metadata(META_QUERY_STRING, "a=1&b=2");
        let resp = dispatcher().dispatch(&req).unwrap();
        let body: Value = serde_json::from_slice(&resp.payload).unwrap();
        assert_eq!(
            body,
            json!({
                "invokeId": "inv-42",
                "functionName": "books",
                "method": "context",
                "query": {"a": ["1"], "b": ["2"]},
            })
        );
    }

    #[test]
    fn unknown_method_is_not_found() {
        // The payload is not UTF-8; routing happens before the event is built.
        let req = InvocationRequest::http("svc", "nope")
            .with_metadata(META_HEADERS, "garbage")
            .with_payload(vec![0xff]);
        let resp = dispatcher().dispatch(&req).unwrap();
        assert_eq!(resp.status_code(), Some(404));
        assert_eq!(
            body_of(&resp),
            ErrorBody {
                error_code: String::from("404"),
                message: String::from("no router"),
            }
        );
    }

    #[test]
    fn empty_registry_is_not_found() {
        let dispatcher = Dispatcher::new(
            Arc::new(FunctionRegistry::builder().build()),
            Logger::root(Discard, o!()),
        );
        let resp = dispatcher.dispatch(&InvocationRequest::http("svc", "")).unwrap();
        assert_eq!(resp.status_code(), Some(404));
    }

    #[test]
    fn handler_errors_are_internal_errors() {
        let resp = dispatcher()
            .dispatch(&InvocationRequest::http("svc", "fail"))
            .unwrap();
        assert_eq!(resp.status_code(), Some(500));
        let body = body_of(&resp);
        assert_eq!(body.error_code, "500");
        assert!(body.message.contains("database unavailable"));
    }

    #[test]
    fn handler_panics_are_internal_errors() {
        let resp = dispatcher()
            .dispatch(&InvocationRequest::http("svc", "panic"))
            .unwrap();
        assert_eq!(resp.status_code(), Some(500));
        assert!(body_of(&resp).message.contains("handler blew up"));
    }

    #[test]
    fn schema_violations_are_bad_gateway() {
        let d = dispatcher();
        for method in &["string-status", "no-status"] {
            let resp = d.dispatch(&InvocationRequest::http("svc", method)).unwrap();
            assert_eq!(resp.status_code(), Some(502), "method {}", method);
            assert_eq!(body_of(&resp).error_code, "502");
        }
    }

    #[test]
    fn reflected_header_delimiters_are_bad_gateway() {
        let req = InvocationRequest::http("svc", "reflect-header")
            .with_payload("v&__header_delim__&Set-Cookie&__header_equals__&admin=1");
        let resp = dispatcher().dispatch(&req).unwrap();
        assert_eq!(resp.status_code(), Some(502));
        assert!(resp.metadata.get(META_HEADERS).is_none());
        assert_eq!(
            body_of(&resp).message,
            "function response error: header \"X-Echo\" contains a reserved header delimiter"
        );
    }

    #[test]
    fn undecodable_request_is_bad_gateway() {
        let req = InvocationRequest::http("svc", "echo").with_payload(vec![0xc3, 0x28]);
        let resp = dispatcher().dispatch(&req).unwrap();
        assert_eq!(resp.status_code(), Some(502));
    }

    #[test]
    fn raw_string_results_are_accepted() {
        let req = InvocationRequest::http("svc", "raw").with_metadata(META_PATH, "/q");
        let resp = dispatcher().dispatch(&req).unwrap();
        assert_eq!(resp.status_code(), Some(202));
        assert_eq!(resp.payload, b"queued".to_vec());
    }

    #[test]
    fn non_http_types_are_rejected() {
        let mut req = InvocationRequest::http("svc", "echo");
        req.kind = String::from("MQTT");
        assert_eq!(
            dispatcher().dispatch(&req),
            Err(DispatchError::UnsupportedType(String::from("MQTT")))
        );
    }
}
