//! Fire-and-forget remote procedure dispatch.
//!
//! A message is `{method, args, kwargs}`. There is no request id and no
//! response path: senders serialize a call, receivers look the method up in a
//! [`Dispatcher`] and invoke the bound handler against a local context.
//! Failures stay at message scope so one bad entry never aborts a batch.

use crate::error::{ReplicationError, Result};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl RpcMessage {
    pub fn new(method: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            method: method.into(),
            args,
            kwargs,
        }
    }

    pub fn positional(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(method, args, Map::new())
    }

    /// Decodes the positional argument at `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.args.get(index).ok_or_else(|| ReplicationError::InvalidParams {
            method: self.method.clone(),
            reason: format!("missing positional argument {}", index),
        })?;
        self.decode(value, || format!("argument {}", index))
    }

    /// Like [`RpcMessage::arg`] but falls back to `default` when the argument is absent.
    pub fn arg_or<T: DeserializeOwned>(&self, index: usize, default: T) -> Result<T> {
        match self.args.get(index) {
            Some(value) => self.decode(value, || format!("argument {}", index)),
            None => Ok(default),
        }
    }

    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.kwargs.get(name) {
            Some(value) => self.decode(value, || format!("keyword {}", name)).map(Some),
            None => Ok(None),
        }
    }

    fn decode<T: DeserializeOwned>(&self, value: &Value, what: impl FnOnce() -> String) -> Result<T> {
        T::deserialize(value).map_err(|e| ReplicationError::InvalidParams {
            method: self.method.clone(),
            reason: format!("{}: {}", what(), e),
        })
    }
}

/// Something that accepts outbound calls.
pub trait RpcSink {
    fn push_message(&mut self, message: RpcMessage);

    fn send(&mut self, method: &str, args: Vec<Value>, kwargs: Map<String, Value>) {
        self.push_message(RpcMessage::new(method, args, kwargs));
    }
}

impl RpcSink for Vec<RpcMessage> {
    fn push_message(&mut self, message: RpcMessage) {
        self.push(message);
    }
}

pub type Handler<C> = Box<dyn Fn(&mut C, &RpcMessage) -> Result<()> + Send + Sync>;

/// Name to handler registry. `C` is the local context handlers act on
/// (for screen replay this is the drawing surface).
pub struct Dispatcher<C: ?Sized> {
    handlers: HashMap<String, Handler<C>>,
}

impl<C: ?Sized> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Binds `name` to `handler`, replacing any earlier binding.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut C, &RpcMessage) -> Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.handlers.insert(name.clone(), Box::new(handler)).is_some() {
            debug!("Replaced handler for {}", name);
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn serialize(name: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> RpcMessage {
        RpcMessage::new(name, args, kwargs)
    }

    /// Invokes the handler for one message.
    pub fn call(&self, ctx: &mut C, message: &RpcMessage) -> Result<()> {
        let handler = self
            .handlers
            .get(&message.method)
            .ok_or_else(|| ReplicationError::MethodNotFound(message.method.clone()))?;
        handler(ctx, message)
    }

    /// Dispatches a raw payload: either one message object or an ordered array
    /// of them. Every failure is logged and skipped. Returns how many messages
    /// were handled successfully.
    pub fn dispatch(&self, ctx: &mut C, payload: &Value) -> usize {
        match payload {
            Value::Array(entries) => entries
                .iter()
                .filter(|entry| log_outcome(self.dispatch_value(ctx, entry)))
                .count(),
            single => usize::from(log_outcome(self.dispatch_value(ctx, single))),
        }
    }

    /// Dispatches already-decoded messages in order.
    pub fn dispatch_all(&self, ctx: &mut C, messages: &[RpcMessage]) -> usize {
        messages
            .iter()
            .filter(|message| log_outcome(self.call(ctx, message)))
            .count()
    }

    fn dispatch_value(&self, ctx: &mut C, value: &Value) -> Result<()> {
        let message = RpcMessage::deserialize(value)
            .map_err(|e| ReplicationError::protocol(format!("malformed rpc message: {}", e)))?;
        self.call(ctx, &message)
    }
}

fn log_outcome(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Dispatch failed: {}", e);
            false
        }
    }
}

impl<C: ?Sized> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recording_dispatcher() -> Dispatcher<Vec<String>> {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("log", |log: &mut Vec<String>, msg: &RpcMessage| {
            let text: String = msg.arg(0)?;
            log.push(text);
            Ok(())
        });
        dispatcher.register("fail", |_: &mut Vec<String>, msg: &RpcMessage| {
            Err(ReplicationError::InvalidParams {
                method: msg.method.clone(),
                reason: "always fails".to_string(),
            })
        });
        dispatcher
    }

    #[test]
    fn test_serialize_message_shape() {
        let mut kwargs = Map::new();
        kwargs.insert("fontsize".to_string(), json!(24));
        let msg = Dispatcher::<()>::serialize("draw.text", vec![json!("hi")], kwargs);

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"method": "draw.text", "args": ["hi"], "kwargs": {"fontsize": 24}})
        );
    }

    #[test]
    fn test_single_dispatch() {
        let dispatcher = recording_dispatcher();
        let mut log = Vec::new();

        let handled = dispatcher.dispatch(&mut log, &json!({"method": "log", "args": ["one"]}));
        assert_eq!(handled, 1);
        assert_eq!(log, vec!["one".to_string()]);
    }

    #[test]
    fn test_unknown_method() {
        let dispatcher = recording_dispatcher();
        let mut log = Vec::new();

        let err = dispatcher
            .call(&mut log, &RpcMessage::positional("nope", vec![]))
            .unwrap_err();
        assert!(matches!(err, ReplicationError::MethodNotFound(name) if name == "nope"));
    }

    #[test]
    fn test_batch_survives_malformed_entry() {
        let dispatcher = recording_dispatcher();
        let mut log = Vec::new();

        let batch = json!([
            {"method": "log", "args": ["first"]},
            {"args": ["no method field"]},
            {"method": "log", "args": ["second"]},
        ]);
        let handled = dispatcher.dispatch(&mut log, &batch);

        assert_eq!(handled, 2);
        assert_eq!(log, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_batch_continues_after_unknown_and_failing_handlers() {
        let dispatcher = recording_dispatcher();
        let mut log = Vec::new();

        let batch = vec![
            RpcMessage::positional("missing", vec![]),
            RpcMessage::positional("fail", vec![]),
            RpcMessage::positional("log", vec![json!("kept")]),
        ];
        assert_eq!(dispatcher.dispatch_all(&mut log, &batch), 1);
        assert_eq!(log, vec!["kept".to_string()]);
    }

    #[test]
    fn test_register_overwrites() {
        let mut dispatcher = recording_dispatcher();
        dispatcher.register("log", |log: &mut Vec<String>, _: &RpcMessage| {
            log.push("replaced".to_string());
            Ok(())
        });

        let mut log = Vec::new();
        dispatcher.dispatch(&mut log, &json!({"method": "log", "args": ["ignored"]}));
        assert_eq!(log, vec!["replaced".to_string()]);
    }

    #[test]
    fn test_argument_decoding() {
        let msg = RpcMessage::positional("draw.line", vec![json!([1, 2]), json!("bad")]);

        let point: (i32, i32) = msg.arg(0).unwrap();
        assert_eq!(point, (1, 2));

        assert!(msg.arg::<u32>(1).is_err());
        assert!(msg.arg::<u32>(5).is_err());
        assert_eq!(msg.arg_or::<u32>(5, 7).unwrap(), 7);
        assert_eq!(msg.kwarg::<u32>("width").unwrap(), None);
    }
}
