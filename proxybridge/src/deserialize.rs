//! [`WireSpec`] → live value.
//!
//! Inverse of the serializer for one payload: a per-call memo keyed by spec id
//! makes every occurrence of the same array/object spec rebuild to the same
//! value, so aliasing and cycles inside the payload survive the trip.
//!
//! `object` specs are rebuilt from their `properties` map only. The serializer
//! never emits that map (it sends a bare `objectId`), so an object spec coming
//! straight from [`Serializer`](crate::serialize::Serializer) rebuilds to a new,
//! empty plain object rather than to the cached original. Callers that want the
//! cached object must send `lookupSavedObject`.

use std::collections::HashMap;

use crate::bridge::protocol::{ContextId, Literal, SpecId, WireSpec};
use crate::cache::ObjectCache;
use crate::callback::CallbackMarshaller;
use crate::error::{ProxyError, Result};
use crate::object::Realm;
use crate::value::{ArrayRef, Pattern, Value};

pub struct Deserializer<'a> {
    cache: &'a ObjectCache,
    realm: &'a Realm,
    marshaller: &'a CallbackMarshaller,
    context: ContextId,
    memo: HashMap<SpecId, Value>,
}

impl<'a> Deserializer<'a> {
    pub fn new(
        cache: &'a ObjectCache,
        realm: &'a Realm,
        marshaller: &'a CallbackMarshaller,
        context: ContextId,
    ) -> Self {
        Self {
            cache,
            realm,
            marshaller,
            context,
            memo: HashMap::new(),
        }
    }

    pub fn deserialize(&mut self, spec: &WireSpec) -> Result<Value> {
        match spec {
            WireSpec::Value { value } => Ok(literal_value(value)),
            WireSpec::LookupSavedObject { object_id } => self.cache.resolve(*object_id),
            WireSpec::Callback { callback_id } => Ok(self.marshaller.make_proxy(
                *callback_id,
                self.context,
                self.realm,
            )),
            WireSpec::SpecRef { spec_id } => self
                .memo
                .get(spec_id)
                .cloned()
                .ok_or(ProxyError::UnknownSpecReference(*spec_id)),
            WireSpec::Array { spec_id, items } => {
                if let Some(existing) = self.memo.get(spec_id) {
                    return Ok(existing.clone());
                }
                let arr = ArrayRef::default();
                self.memo.insert(*spec_id, Value::from(arr.clone()));
                for item in items {
                    let value = self.deserialize(item)?;
                    arr.push(value);
                }
                Ok(Value::from(arr))
            }
            WireSpec::Object {
                spec_id,
                properties,
                ..
            } => {
                if let Some(existing) = spec_id.and_then(|id| self.memo.get(&id)) {
                    return Ok(existing.clone());
                }
                let obj = self.realm.new_object();
                if let Some(id) = spec_id {
                    self.memo.insert(*id, Value::from(obj.clone()));
                }
                for (key, item) in properties.iter().flatten() {
                    let value = self.deserialize(item)?;
                    obj.insert(key.clone(), value);
                }
                Ok(Value::from(obj))
            }
        }
    }

    pub fn deserialize_all(&mut self, specs: &[WireSpec]) -> Result<Vec<Value>> {
        specs.iter().map(|spec| self.deserialize(spec)).collect()
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Undefined => Value::Undefined,
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(n) => Value::Float(*n),
        Literal::NonFinite { number } => Value::Float(number.value()),
        Literal::Str(s) => Value::Str(s.clone()),
        Literal::Date { date } => Value::Date(*date),
        Literal::Pattern { pattern, flags } => Value::Pattern(Pattern::new(pattern, flags)),
    }
}
