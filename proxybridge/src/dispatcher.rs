//! Message dispatcher - the single entry point for inbound requests.
//!
//! Every request first resolves (or creates) the object cache of the context it
//! came from, then runs synchronously and is answered with an [`Envelope`].
//! There is no outstanding-request table: the host transport blocks the caller
//! until `handle` returns.
//!
//! Cache locks are taken only around resolve/serialize/deserialize steps and
//! released before native code runs, so getters, setters and functions may
//! fire callback proxies for the same context.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use crate::bridge::protocol::{
    ContextId, Envelope, Handle, LookupResult, PropertyInfo, ProxyRequest, ResponsePayload,
    WireSpec,
};
use crate::cache::{ContextRegistry, SharedCache, lock_cache};
use crate::callback::{CallbackMarshaller, CallbackReceiver, callback_channel};
use crate::deserialize::Deserializer;
use crate::error::{ProxyError, Result};
use crate::object::{Realm, invoke, set_property};
use crate::serialize::Serializer;
use crate::value::Value;

pub struct ProxyDispatcher {
    realm: Realm,
    registry: Arc<ContextRegistry>,
    marshaller: CallbackMarshaller,
}

impl ProxyDispatcher {
    /// Creates a dispatcher exposing `realm`'s global object as handle 0 of every context.
    ///
    /// The returned receiver yields callback deliveries; hand it to the host transport.
    pub fn new(realm: Realm) -> (Self, CallbackReceiver) {
        let registry = Arc::new(ContextRegistry::new(Value::from(realm.global().clone())));
        let (outbox, callbacks) = callback_channel();
        let marshaller = CallbackMarshaller::new(Arc::downgrade(&registry), outbox);
        let dispatcher = Self {
            realm,
            registry,
            marshaller,
        };
        (dispatcher, callbacks)
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    /// Handles one request.
    ///
    /// Returns `None` for unknown operation kinds: they are neither rejected
    /// nor answered.
    pub fn handle(&self, request: &ProxyRequest, context: ContextId) -> Option<Envelope> {
        let cache = self.registry.ensure(context);
        tracing::trace!(%context, kind = request.kind(), "Handling request");

        let outcome = match request {
            ProxyRequest::GetProperty {
                object_id,
                property,
            } => self.get_property(&cache, *object_id, property),
            ProxyRequest::SetProperty {
                object_id,
                property,
                value,
            } => self.set_property(&cache, context, *object_id, property, value),
            ProxyRequest::CallFunction {
                function_id,
                context_id,
                args,
            } => self.call_function(&cache, context, *function_id, *context_id, args),
            ProxyRequest::LookupObject { object_id } => self.lookup_object(&cache, *object_id),
            ProxyRequest::Unknown => {
                tracing::warn!(%context, "Ignoring request with unknown operation type");
                return None;
            }
        };

        Some(match outcome {
            Ok(result) => Envelope::success(result),
            Err(e) => {
                tracing::debug!(%context, kind = request.kind(), error = %e, "Request failed");
                Envelope::failure(e.to_string())
            }
        })
    }

    /// Parses and handles a raw request as delivered by the host.
    ///
    /// Malformed known operations get an error envelope; unknown kinds get nothing.
    pub fn handle_value(&self, raw: serde_json::Value, context: ContextId) -> Option<Envelope> {
        match serde_json::from_value::<ProxyRequest>(raw) {
            Ok(request) => self.handle(&request, context),
            Err(e) => {
                self.registry.ensure(context);
                tracing::warn!(%context, error = %e, "Malformed request");
                Some(Envelope::failure(
                    ProxyError::MalformedRequest(e.to_string()).to_string(),
                ))
            }
        }
    }

    /// Lifecycle-end signal: drops the context's cache and every handle it minted.
    pub fn close_context(&self, context: ContextId) -> bool {
        self.registry.destroy(context)
    }

    /// Guard that closes `context` when dropped.
    pub fn context_guard(&self, context: ContextId) -> ContextGuard {
        ContextGuard {
            context: Some(context),
            registry: Arc::downgrade(&self.registry),
        }
    }

    fn get_property(
        &self,
        cache: &SharedCache,
        object_id: Handle,
        property: &str,
    ) -> Result<Option<ResponsePayload>> {
        let target = lock_cache(cache).resolve(object_id)?;
        let value = self
            .realm
            .get_property(&target, property)
            .map_err(|e| ProxyError::property_access(property, e))?;
        Ok(Some(self.serialize(cache, &value)))
    }

    fn set_property(
        &self,
        cache: &SharedCache,
        context: ContextId,
        object_id: Handle,
        property: &str,
        spec: &WireSpec,
    ) -> Result<Option<ResponsePayload>> {
        let (target, value) = {
            let cache = lock_cache(cache);
            let target = cache.resolve(object_id)?;
            let value = Deserializer::new(&cache, &self.realm, &self.marshaller, context)
                .deserialize(spec)?;
            (target, value)
        };
        set_property(&target, property, value)
            .map_err(|e| ProxyError::property_assign(property, e))?;
        Ok(None)
    }

    fn call_function(
        &self,
        cache: &SharedCache,
        context: ContextId,
        function_id: Handle,
        context_id: Handle,
        arg_specs: &[WireSpec],
    ) -> Result<Option<ResponsePayload>> {
        let (function, receiver, args) = {
            let cache = lock_cache(cache);
            let function = cache.resolve(function_id)?;
            let receiver = cache.resolve(context_id)?;
            let args = Deserializer::new(&cache, &self.realm, &self.marshaller, context)
                .deserialize_all(arg_specs)?;
            (function, receiver, args)
        };
        let result = invoke(&function, &receiver, args).map_err(ProxyError::invocation)?;
        Ok(Some(self.serialize(cache, &result)))
    }

    fn lookup_object(
        &self,
        cache: &SharedCache,
        object_id: Handle,
    ) -> Result<Option<ResponsePayload>> {
        let target = lock_cache(cache).resolve(object_id)?;
        let lookup = match &target {
            Value::Object(obj) => {
                let properties = obj
                    .own_property_names()
                    .into_iter()
                    .map(|(name, enumerable)| (name, PropertyInfo { enumerable }))
                    .collect();
                let parent_handle = obj
                    .prototype()
                    .map(|parent| lock_cache(cache).add(&Value::from(parent)));
                LookupResult {
                    properties,
                    is_function: obj.is_callable(),
                    parent_handle,
                    root_kind: self.realm.root_kind(obj),
                }
            }
            Value::Array(arr) => {
                let mut properties: IndexMap<String, PropertyInfo> = (0..arr.len())
                    .map(|index| (index.to_string(), PropertyInfo { enumerable: true }))
                    .collect();
                properties.insert("length".to_string(), PropertyInfo { enumerable: false });
                let parent = Value::from(self.realm.array_prototype().clone());
                LookupResult {
                    properties,
                    is_function: false,
                    parent_handle: Some(lock_cache(cache).add(&parent)),
                    root_kind: None,
                }
            }
            Value::Undefined | Value::Null => {
                return Err(ProxyError::NotAnObject { handle: object_id });
            }
            _ => LookupResult {
                properties: IndexMap::new(),
                is_function: false,
                parent_handle: None,
                root_kind: None,
            },
        };
        Ok(Some(ResponsePayload::Lookup(lookup)))
    }

    fn serialize(&self, cache: &SharedCache, value: &Value) -> ResponsePayload {
        let mut cache = lock_cache(cache);
        ResponsePayload::Spec(Serializer::new(&mut cache).serialize(value))
    }
}

/// Closes a context when dropped, unless disarmed.
///
/// Ties cache teardown to the lifetime of whatever the host uses to track the
/// context (a tab handle, a connection).
pub struct ContextGuard {
    context: Option<ContextId>,
    registry: Weak<ContextRegistry>,
}

impl ContextGuard {
    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    pub fn disarm(&mut self) {
        self.context = None;
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(context) = self.context
            && let Some(registry) = self.registry.upgrade()
        {
            registry.destroy(context);
        }
    }
}
