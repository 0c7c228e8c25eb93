//! Live value → [`WireSpec`].
//!
//! Arrays are expanded eagerly. Every other compound value (plain object or
//! callable) is cached and sent as an opaque handle; the remote side has to ask
//! for properties one at a time.
//!
//! One [`Serializer`] is one serialization pass: its memo maps source identity
//! to the spec already emitted, so a sequence seen twice (or containing itself)
//! is sent once and referenced afterwards by `specRef`.

use std::collections::HashMap;

use crate::bridge::protocol::{Literal, SpecId, WireSpec};
use crate::cache::ObjectCache;
use crate::value::Value;

#[derive(Debug, Clone)]
enum Seen {
    Array(SpecId),
    Object(WireSpec),
}

pub struct Serializer<'a> {
    cache: &'a mut ObjectCache,
    memo: HashMap<usize, Seen>,
    next_spec_id: u32,
}

impl<'a> Serializer<'a> {
    pub fn new(cache: &'a mut ObjectCache) -> Self {
        Self {
            cache,
            memo: HashMap::new(),
            next_spec_id: 0,
        }
    }

    pub fn serialize(&mut self, value: &Value) -> WireSpec {
        match value {
            Value::Array(arr) => {
                let identity = arr.identity();
                match self.memo.get(&identity) {
                    Some(Seen::Array(spec_id)) => return WireSpec::SpecRef { spec_id: *spec_id },
                    Some(Seen::Object(spec)) => return spec.clone(),
                    None => {}
                }

                let spec_id = SpecId::new(self.next_spec_id);
                self.next_spec_id += 1;
                // Registered before recursing so self-references resolve to this spec.
                self.memo.insert(identity, Seen::Array(spec_id));

                let items = arr
                    .snapshot()
                    .iter()
                    .map(|item| self.serialize(item))
                    .collect();
                WireSpec::Array { spec_id, items }
            }
            Value::Object(obj) => {
                let identity = obj.identity();
                if let Some(Seen::Object(spec)) = self.memo.get(&identity) {
                    return spec.clone();
                }
                let spec = WireSpec::object(self.cache.add(value));
                self.memo.insert(identity, Seen::Object(spec.clone()));
                spec
            }
            primitive => WireSpec::value(literal(primitive)),
        }
    }

    /// Serializes a list (call arguments) sharing one memo.
    pub fn serialize_all(&mut self, values: &[Value]) -> Vec<WireSpec> {
        values.iter().map(|value| self.serialize(value)).collect()
    }
}

fn literal(value: &Value) -> Literal {
    match value {
        Value::Undefined => Literal::Undefined,
        Value::Null => Literal::Null,
        Value::Bool(b) => Literal::Bool(*b),
        Value::Int(n) => Literal::Int(*n),
        Value::Float(n) => Literal::number(*n),
        Value::Str(s) => Literal::Str(s.clone()),
        Value::Date(ms) => Literal::Date { date: *ms },
        Value::Pattern(p) => Literal::Pattern {
            pattern: p.source.clone(),
            flags: p.flags.clone(),
        },
        Value::Array(_) | Value::Object(_) => {
            unreachable!("compound values are handled by Serializer::serialize")
        }
    }
}
