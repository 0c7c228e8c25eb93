//! Callback marshalling: local stand-ins for functions living on the sandboxed side.
//!
//! Invoking a proxy caches its `this` value, serializes its arguments against
//! the same context's cache, and queues a one-way [`CallbackMessage`]. Nothing
//! is awaited and nothing is returned; if the context has been torn down the
//! call is silently dropped.

use std::sync::Weak;

use tokio::sync::mpsc;

use crate::bridge::protocol::{CallbackId, CallbackMessage, ContextId};
use crate::cache::{ContextRegistry, lock_cache};
use crate::object::Realm;
use crate::serialize::Serializer;
use crate::value::Value;

/// Callback delivery addressed to one context.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCallback {
    pub context: ContextId,
    pub message: CallbackMessage,
}

pub type CallbackReceiver = mpsc::UnboundedReceiver<OutboundCallback>;

/// Sending half of the outbound callback queue.
///
/// Cloned into every proxy. Unbounded so a proxy never blocks the native code
/// that fired it.
#[derive(Clone)]
pub struct CallbackSender {
    tx: mpsc::UnboundedSender<OutboundCallback>,
}

impl CallbackSender {
    pub fn new(tx: mpsc::UnboundedSender<OutboundCallback>) -> Self {
        Self { tx }
    }

    /// Queues a delivery. Returns false if the receiving side is gone.
    pub fn send(&self, callback: OutboundCallback) -> bool {
        self.tx.send(callback).is_ok()
    }
}

pub fn callback_channel() -> (CallbackSender, CallbackReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CallbackSender::new(tx), rx)
}

/// Builds callback proxies bound to a context.
///
/// Holds the registry weakly: proxies can end up stored inside cached objects,
/// and a strong reference would keep every cache alive through that cycle.
#[derive(Clone)]
pub struct CallbackMarshaller {
    registry: Weak<ContextRegistry>,
    outbox: CallbackSender,
}

impl CallbackMarshaller {
    pub fn new(registry: Weak<ContextRegistry>, outbox: CallbackSender) -> Self {
        Self { registry, outbox }
    }

    /// Returns a callable that forwards its invocations to `callback_id` in `context`.
    pub fn make_proxy(&self, callback_id: CallbackId, context: ContextId, realm: &Realm) -> Value {
        let marshaller = self.clone();
        let proxy = realm.new_function(move |this, args| {
            marshaller.fire(callback_id, context, this, &args);
            Ok(Value::Undefined)
        });
        Value::from(proxy)
    }

    fn fire(&self, callback_id: CallbackId, context: ContextId, this: &Value, args: &[Value]) {
        let Some(cache) = self
            .registry
            .upgrade()
            .and_then(|registry| registry.get(context))
        else {
            tracing::debug!(%context, %callback_id, "Context closed, dropping callback");
            return;
        };

        let message = {
            let mut cache = lock_cache(&cache);
            let context_id = cache.add(this);
            let args = Serializer::new(&mut cache).serialize_all(args);
            CallbackMessage {
                callback_id,
                context_id,
                args,
            }
        };

        tracing::trace!(%context, %callback_id, "Queueing callback");
        if !self.outbox.send(OutboundCallback { context, message }) {
            tracing::debug!(%context, %callback_id, "Callback receiver gone, dropping callback");
        }
    }
}
