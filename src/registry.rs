// Copyright 2020 Joyent, Inc.

//! The set of function handlers a service exposes.
//!
//! A [`FunctionRegistry`] is assembled once with a [`RegistryBuilder`] before
//! the first invocation is accepted and is read-only afterwards, so it can be
//! shared between connections behind an `Arc` without locking. How handler
//! code is located is up to whoever builds the registry.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use serde_derive::Serialize;
use serde_json::Value;

use crate::event::Event;

pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Invocation details passed alongside the event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub invoke_id: String,
    /// Function service name supplied by the caller.
    pub function_name: String,
    /// Name of the handler the invocation was routed to.
    pub method: String,
}

/// A function handler. The returned value is checked against the HTTP
/// response shape before it is trusted; see [`crate::response`].
pub trait Handler: Send + Sync {
    fn invoke(&self, event: &Event, ctx: &Context) -> Result<Value, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Event, &Context) -> Result<Value, HandlerError> + Send + Sync,
{
    fn invoke(&self, event: &Event, ctx: &Context) -> Result<Value, HandlerError> {
        self(event, ctx)
    }
}

/// Pins a closure to the handler signature so its argument and error types
/// can be inferred at the call site.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&Event, &Context) -> Result<Value, HandlerError> + Send + Sync,
{
    f
}

pub struct FunctionRegistry {
    entries: Vec<(String, Box<dyn Handler>)>,
    index: HashMap<String, usize>,
}

impl FunctionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn Handler> {
        self.index
            .get(name)
            .map(|&i| self.entries[i].1.as_ref())
    }

    /// The route used when a request names no method: the handler that was
    /// registered first.
    pub fn default_route(&self) -> Option<(&str, &dyn Handler)> {
        self.entries
            .first()
            .map(|(name, handler)| (name.as_str(), handler.as_ref()))
    }

    /// Handler names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<(String, Box<dyn Handler>)>,
    index: HashMap<String, usize>,
}

impl RegistryBuilder {
    pub fn new() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Register `handler` under `name`. Registering a name again replaces its
    /// handler but keeps its original position.
    pub fn register<H>(mut self, name: &str, handler: H) -> RegistryBuilder
    where
        H: Handler + 'static,
    {
        match self.index.get(name) {
            Some(&i) => self.entries[i].1 = Box::new(handler),
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push((name.to_string(), Box::new(handler)));
            }
        }
        self
    }

    pub fn build(self) -> FunctionRegistry {
        FunctionRegistry {
            entries: self.entries,
            index: self.index,
        }
    }
}
