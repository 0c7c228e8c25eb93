//! Privileged object model: objects, callables, prototype chains and realms.
//!
//! Locks are never held across a call into native code (getters, setters,
//! functions) or while walking to a parent object, so natives are free to
//! re-enter the dispatcher or fire callback proxies.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;

use crate::bridge::protocol::RootKind;
use crate::error::HostError;
use crate::value::{ArrayRef, Value};

/// Native function body: `(this, args) -> result`.
pub type NativeFn = Arc<dyn Fn(&Value, Vec<Value>) -> Result<Value, HostError> + Send + Sync>;

/// Own property slot.
#[derive(Clone)]
pub enum Property {
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
    },
    Accessor {
        get: Option<NativeFn>,
        set: Option<NativeFn>,
        enumerable: bool,
    },
}

impl Property {
    /// Writable, enumerable data property.
    pub fn data(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: true,
            enumerable: true,
        }
    }

    /// Writable, non-enumerable data property.
    pub fn hidden(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: true,
            enumerable: false,
        }
    }

    /// Enumerable data property that rejects assignment.
    pub fn read_only(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: false,
            enumerable: true,
        }
    }

    pub fn accessor(get: Option<NativeFn>, set: Option<NativeFn>) -> Self {
        Self::Accessor {
            get,
            set,
            enumerable: true,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data {
                value,
                writable,
                enumerable,
            } => f
                .debug_struct("Data")
                .field("value", value)
                .field("writable", writable)
                .field("enumerable", enumerable)
                .finish(),
            Self::Accessor {
                get,
                set,
                enumerable,
            } => f
                .debug_struct("Accessor")
                .field("get", &get.is_some())
                .field("set", &set.is_some())
                .field("enumerable", enumerable)
                .finish(),
        }
    }
}

#[derive(Clone)]
pub enum ObjectKind {
    Plain,
    Function(NativeFn),
}

pub struct HostObject {
    properties: IndexMap<String, Property>,
    prototype: Option<ObjectRef>,
    kind: ObjectKind,
}

/// Shared reference to a [`HostObject`], compared by identity.
#[derive(Clone)]
pub struct ObjectRef(Arc<Mutex<HostObject>>);

impl ObjectRef {
    pub fn new(prototype: Option<ObjectRef>) -> Self {
        Self::with_kind(prototype, ObjectKind::Plain)
    }

    pub fn function<F>(prototype: Option<ObjectRef>, f: F) -> Self
    where
        F: Fn(&Value, Vec<Value>) -> Result<Value, HostError> + Send + Sync + 'static,
    {
        Self::with_kind(prototype, ObjectKind::Function(Arc::new(f)))
    }

    fn with_kind(prototype: Option<ObjectRef>, kind: ObjectKind) -> Self {
        Self(Arc::new(Mutex::new(HostObject {
            properties: IndexMap::new(),
            prototype,
            kind,
        })))
    }

    fn lock(&self) -> MutexGuard<'_, HostObject> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.lock().kind, ObjectKind::Function(_))
    }

    pub fn prototype(&self) -> Option<ObjectRef> {
        self.lock().prototype.clone()
    }

    /// Replaces the parent. Rejects a parent whose own chain already reaches `self`.
    pub fn set_prototype(&self, prototype: Option<ObjectRef>) -> Result<(), HostError> {
        let mut cursor = prototype.clone();
        while let Some(obj) = cursor {
            if obj.ptr_eq(self) {
                return Err(HostError::new("cyclic prototype chain"));
            }
            cursor = obj.prototype();
        }
        self.lock().prototype = prototype;
        Ok(())
    }

    pub fn define(&self, key: impl Into<String>, property: Property) {
        self.lock().properties.insert(key.into(), property);
    }

    /// Defines a writable, enumerable data property.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.define(key, Property::data(value));
    }

    pub fn get_own(&self, key: &str) -> Option<Property> {
        self.lock().properties.get(key).cloned()
    }

    /// Own property names in definition order, with their enumerability.
    pub fn own_property_names(&self) -> Vec<(String, bool)> {
        self.lock()
            .properties
            .iter()
            .map(|(name, prop)| (name.clone(), prop.is_enumerable()))
            .collect()
    }

    /// First property named `key` along the prototype chain.
    fn find_property(&self, key: &str) -> Option<Property> {
        let mut cursor = Some(self.clone());
        while let Some(obj) = cursor {
            if let Some(prop) = obj.get_own(key) {
                return Some(prop);
            }
            cursor = obj.prototype();
        }
        None
    }

    /// Property read with prototype lookup; accessors run against `receiver`.
    pub fn get(&self, key: &str, receiver: &Value) -> Result<Value, HostError> {
        match self.find_property(key) {
            Some(Property::Data { value, .. }) => Ok(value),
            Some(Property::Accessor { get: Some(get), .. }) => get(receiver, Vec::new()),
            Some(Property::Accessor { get: None, .. }) | None => Ok(Value::Undefined),
        }
    }

    /// Property write.
    ///
    /// Own writable data is updated in place; accessors anywhere on the chain
    /// route to their setter; non-writable data anywhere on the chain rejects;
    /// otherwise a new own enumerable data property is created.
    pub fn set(&self, key: &str, value: Value, receiver: &Value) -> Result<(), HostError> {
        match self.find_property(key) {
            Some(Property::Data {
                writable: false, ..
            }) => Err(HostError::new(format!(
                "cannot assign to read only property '{key}'"
            ))),
            Some(Property::Accessor { set: Some(set), .. }) => {
                set(receiver, vec![value])?;
                Ok(())
            }
            Some(Property::Accessor { set: None, .. }) => Err(HostError::new(format!(
                "cannot set property '{key}' which has only a getter"
            ))),
            Some(Property::Data { .. }) | None => {
                let mut inner = self.lock();
                match inner.properties.get_mut(key) {
                    Some(Property::Data { value: slot, .. }) => *slot = value,
                    _ => {
                        inner
                            .properties
                            .insert(key.to_string(), Property::data(value));
                    }
                }
                Ok(())
            }
        }
    }

    /// Invokes the object as a function. Plain objects are not callable.
    pub fn call(&self, this: &Value, args: Vec<Value>) -> Result<Value, HostError> {
        let native = match &self.lock().kind {
            ObjectKind::Function(f) => Arc::clone(f),
            ObjectKind::Plain => return Err(HostError::new("object is not a function")),
        };
        native(this, args)
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_callable() {
            "Function"
        } else {
            "Object"
        };
        write!(f, "{kind}@{:#x}", self.identity())
    }
}

/// Reads `key` from any value.
///
/// Arrays expose `length` and integer indices, strings expose `length`,
/// other primitives have no properties, `undefined`/`null` raise.
pub fn get_property(target: &Value, key: &str) -> Result<Value, HostError> {
    match target {
        Value::Object(obj) => obj.get(key, target),
        Value::Array(arr) => {
            if key == "length" {
                return Ok(Value::Int(arr.len() as i64));
            }
            Ok(key
                .parse::<usize>()
                .ok()
                .and_then(|index| arr.get(index))
                .unwrap_or(Value::Undefined))
        }
        Value::Str(s) if key == "length" => Ok(Value::Int(s.encode_utf16().count() as i64)),
        Value::Undefined | Value::Null => Err(HostError::new(format!(
            "cannot read properties of {} (reading '{key}')",
            target.type_name()
        ))),
        _ => Ok(Value::Undefined),
    }
}

/// Assigns `key` on any value. Only objects and arrays accept writes.
pub fn set_property(target: &Value, key: &str, value: Value) -> Result<(), HostError> {
    match target {
        Value::Object(obj) => obj.set(key, value, target),
        Value::Array(arr) => {
            if key == "length" {
                return match value {
                    Value::Int(len) => match usize::try_from(len) {
                        Ok(len) => arr.truncate_or_pad(len),
                        Err(_) => Err(HostError::new("invalid array length")),
                    },
                    _ => Err(HostError::new("invalid array length")),
                };
            }
            match key.parse::<usize>() {
                Ok(index) => arr.set(index, value),
                Err(_) if is_digits(key) => Err(HostError::new("invalid array index")),
                Err(_) => Err(HostError::new(format!(
                    "arrays accept only index and length assignments, got '{key}'"
                ))),
            }
        }
        _ => Err(HostError::new(format!(
            "cannot set properties of {} (setting '{key}')",
            target.type_name()
        ))),
    }
}

fn is_digits(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

/// Calls `callee` with an explicit receiver. Only callables may be invoked.
pub fn invoke(callee: &Value, this: &Value, args: Vec<Value>) -> Result<Value, HostError> {
    match callee {
        Value::Object(obj) if obj.is_callable() => obj.call(this, args),
        other => Err(HostError::new(format!("{} is not a function", other.type_name()))),
    }
}

/// Type-system roots and global object of one privileged environment.
#[derive(Clone, Debug)]
pub struct Realm {
    object_prototype: ObjectRef,
    function_prototype: ObjectRef,
    array_prototype: ObjectRef,
    global: ObjectRef,
}

impl Realm {
    pub fn new() -> Self {
        let object_prototype = ObjectRef::new(None);
        let function_prototype = ObjectRef::function(Some(object_prototype.clone()), |_, _| {
            Ok(Value::Undefined)
        });
        let array_prototype = ObjectRef::new(Some(object_prototype.clone()));
        let global = ObjectRef::new(Some(object_prototype.clone()));

        let realm = Self {
            object_prototype,
            function_prototype,
            array_prototype,
            global,
        };
        realm.install_builtins();
        realm
    }

    fn install_builtins(&self) {
        let has_own = self.new_function(|this, args| {
            let key = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::Bool(
                this.as_object().is_some_and(|obj| obj.get_own(key).is_some()),
            ))
        });
        self.object_prototype
            .define("hasOwnProperty", Property::hidden(has_own));

        let to_string = self.new_function(|this, _| {
            Ok(Value::from(format!("[object {}]", type_tag(this))))
        });
        self.object_prototype
            .define("toString", Property::hidden(to_string));

        // `fn.call(thisArg, ...args)`
        let call = self.new_function(|this, mut args| {
            let receiver = if args.is_empty() {
                Value::Undefined
            } else {
                args.remove(0)
            };
            invoke(this, &receiver, args)
        });
        self.function_prototype.define("call", Property::hidden(call));

        // `arr.push(...items)` returns the new length.
        let push = self.new_function(|this, args| match this {
            Value::Array(arr) => {
                for item in args {
                    arr.push(item);
                }
                Ok(Value::Int(arr.len() as i64))
            }
            _ => Err(HostError::new("push called on a non-array receiver")),
        });
        self.array_prototype.define("push", Property::hidden(push));
    }

    /// Like [`get_property`], but names an array does not own resolve through
    /// the realm's array prototype.
    pub fn get_property(&self, target: &Value, key: &str) -> Result<Value, HostError> {
        match target {
            Value::Array(_) if key != "length" && key.parse::<usize>().is_err() => {
                self.array_prototype.get(key, target)
            }
            _ => get_property(target, key),
        }
    }

    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    pub fn object_prototype(&self) -> &ObjectRef {
        &self.object_prototype
    }

    pub fn function_prototype(&self) -> &ObjectRef {
        &self.function_prototype
    }

    /// Parent of every array in this realm.
    pub fn array_prototype(&self) -> &ObjectRef {
        &self.array_prototype
    }

    pub fn new_object(&self) -> ObjectRef {
        ObjectRef::new(Some(self.object_prototype.clone()))
    }

    pub fn new_function<F>(&self, f: F) -> ObjectRef
    where
        F: Fn(&Value, Vec<Value>) -> Result<Value, HostError> + Send + Sync + 'static,
    {
        ObjectRef::function(Some(self.function_prototype.clone()), f)
    }

    pub fn new_array(&self, items: Vec<Value>) -> ArrayRef {
        ArrayRef::new(items)
    }

    pub fn root_kind(&self, obj: &ObjectRef) -> Option<RootKind> {
        if obj.ptr_eq(&self.object_prototype) {
            Some(RootKind::Object)
        } else if obj.ptr_eq(&self.function_prototype) {
            Some(RootKind::Function)
        } else if obj.ptr_eq(&self.array_prototype) {
            Some(RootKind::Array)
        } else {
            None
        }
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        Value::Array(_) => "Array",
        Value::Object(obj) if obj.is_callable() => "Function",
        Value::Date(_) => "Date",
        Value::Pattern(_) => "RegExp",
        _ => "Object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_roots_form_a_chain() {
        let realm = Realm::new();
        assert!(realm.object_prototype().prototype().is_none());
        assert!(
            realm
                .function_prototype()
                .prototype()
                .unwrap()
                .ptr_eq(realm.object_prototype())
        );
        assert!(
            realm
                .global()
                .prototype()
                .unwrap()
                .ptr_eq(realm.object_prototype())
        );
        assert_eq!(
            realm.root_kind(realm.object_prototype()),
            Some(RootKind::Object)
        );
        assert_eq!(
            realm.root_kind(realm.function_prototype()),
            Some(RootKind::Function)
        );
        assert_eq!(realm.root_kind(realm.global()), None);
    }

    #[test]
    fn get_walks_prototype_chain() {
        let realm = Realm::new();
        let parent = realm.new_object();
        parent.insert("inherited", 1i64);
        let child = ObjectRef::new(Some(parent));

        let receiver = Value::from(child.clone());
        assert_eq!(child.get("inherited", &receiver).unwrap(), Value::Int(1));
        assert_eq!(child.get("missing", &receiver).unwrap(), Value::Undefined);
    }

    #[test]
    fn accessor_runs_with_receiver() {
        let realm = Realm::new();
        let proto = realm.new_object();
        let getter: NativeFn = Arc::new(|this: &Value, _: Vec<Value>| get_property(this, "name"));
        proto.define("label", Property::accessor(Some(getter), None));

        let obj = ObjectRef::new(Some(proto));
        obj.insert("name", "tab-1");
        let value = get_property(&Value::from(obj), "label").unwrap();
        assert_eq!(value, Value::from("tab-1"));
    }

    #[test]
    fn set_creates_own_property_and_shadows_parent() {
        let realm = Realm::new();
        let parent = realm.new_object();
        parent.insert("x", 1i64);
        let child = ObjectRef::new(Some(parent.clone()));

        set_property(&Value::from(child.clone()), "x", Value::Int(2)).unwrap();
        assert!(child.get_own("x").is_some());
        assert_eq!(get_property(&Value::from(parent), "x").unwrap(), Value::Int(1));
    }

    #[test]
    fn read_only_and_getter_only_reject_writes() {
        let realm = Realm::new();
        let obj = realm.new_object();
        obj.define("version", Property::read_only("1.0"));
        let getter: NativeFn = Arc::new(|_: &Value, _: Vec<Value>| Ok(Value::Int(1)));
        obj.define("count", Property::accessor(Some(getter), None));

        let target = Value::from(obj);
        let err = set_property(&target, "version", Value::from("2.0")).unwrap_err();
        assert!(err.message().contains("read only"));
        let err = set_property(&target, "count", Value::Int(5)).unwrap_err();
        assert!(err.message().contains("only a getter"));
    }

    #[test]
    fn setter_receives_value() {
        let realm = Realm::new();
        let store = ArrayRef::default();
        let sink = store.clone();
        let setter: NativeFn = Arc::new(move |_: &Value, args: Vec<Value>| {
            sink.push(args.into_iter().next().unwrap_or(Value::Undefined));
            Ok(Value::Undefined)
        });
        let obj = realm.new_object();
        obj.define("badge", Property::accessor(None, Some(setter)));

        set_property(&Value::from(obj), "badge", Value::from("3")).unwrap();
        assert_eq!(store.get(0), Some(Value::from("3")));
    }

    #[test]
    fn nullish_reads_and_primitive_writes_raise() {
        assert!(get_property(&Value::Undefined, "x").is_err());
        assert!(get_property(&Value::Null, "x").is_err());
        assert_eq!(get_property(&Value::Int(3), "x").unwrap(), Value::Undefined);
        assert!(set_property(&Value::Int(3), "x", Value::Null).is_err());
    }

    #[test]
    fn array_and_string_properties() {
        let arr = Value::from(ArrayRef::new(vec![Value::Int(10), Value::Int(20)]));
        assert_eq!(get_property(&arr, "length").unwrap(), Value::Int(2));
        assert_eq!(get_property(&arr, "1").unwrap(), Value::Int(20));
        assert_eq!(get_property(&arr, "5").unwrap(), Value::Undefined);

        set_property(&arr, "length", Value::Int(1)).unwrap();
        assert_eq!(get_property(&arr, "length").unwrap(), Value::Int(1));
        assert!(set_property(&arr, "name", Value::Null).is_err());

        set_property(&arr, "3", Value::Bool(true)).unwrap();
        assert_eq!(get_property(&arr, "length").unwrap(), Value::Int(4));
        assert_eq!(get_property(&arr, "2").unwrap(), Value::Undefined);

        assert_eq!(
            get_property(&Value::from("héllo"), "length").unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn huge_array_index_or_length_is_an_error() {
        let arr = Value::from(ArrayRef::new(vec![Value::Int(1)]));

        for key in ["18446744073709551615", "4294967295", "99999999999999999999999"] {
            let err = set_property(&arr, key, Value::Int(1)).unwrap_err();
            assert_eq!(err.message(), "invalid array index", "key {key}");
        }
        for len in [i64::MAX, -1] {
            let err = set_property(&arr, "length", Value::Int(len)).unwrap_err();
            assert_eq!(err.message(), "invalid array length", "length {len}");
        }
        let err = set_property(&arr, "length", Value::Int(1 << 40)).unwrap_err();
        assert_eq!(err.message(), "invalid array length");

        assert_eq!(get_property(&arr, "length").unwrap(), Value::Int(1));
    }

    #[test]
    fn cyclic_prototype_is_rejected() {
        let realm = Realm::new();
        let a = realm.new_object();
        let b = ObjectRef::new(Some(a.clone()));
        assert!(a.set_prototype(Some(b)).is_err());
        assert!(a.set_prototype(None).is_ok());
    }

    #[test]
    fn invoke_requires_callable() {
        let realm = Realm::new();
        let add = realm.new_function(|_, args| {
            let sum = args
                .iter()
                .map(|v| match v {
                    Value::Int(n) => *n,
                    _ => 0,
                })
                .sum::<i64>();
            Ok(Value::Int(sum))
        });
        let result = invoke(
            &Value::from(add),
            &Value::Undefined,
            vec![Value::Int(2), Value::Int(3)],
        )
        .unwrap();
        assert_eq!(result, Value::Int(5));

        let err = invoke(&Value::from(realm.new_object()), &Value::Undefined, vec![]).unwrap_err();
        assert_eq!(err.message(), "object is not a function");
    }

    #[test]
    fn builtins_are_hidden_and_work() {
        let realm = Realm::new();
        let names = realm.object_prototype().own_property_names();
        assert!(names.iter().all(|(_, enumerable)| !enumerable));

        let obj = realm.new_object();
        obj.insert("a", 1i64);
        let target = Value::from(obj);
        let has_own = get_property(&target, "hasOwnProperty").unwrap();
        assert_eq!(
            invoke(&has_own, &target, vec![Value::from("a")]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            invoke(&has_own, &target, vec![Value::from("toString")]).unwrap(),
            Value::Bool(false)
        );

        let f = Value::from(realm.new_function(|this, _| Ok(this.clone())));
        let call = get_property(&f, "call").unwrap();
        let result = invoke(&call, &f, vec![Value::Int(9)]).unwrap();
        assert_eq!(result, Value::Int(9));
    }

    #[test]
    fn arrays_inherit_from_the_array_prototype() {
        let realm = Realm::new();
        assert!(
            realm
                .array_prototype()
                .prototype()
                .unwrap()
                .ptr_eq(realm.object_prototype())
        );
        assert_eq!(
            realm.root_kind(realm.array_prototype()),
            Some(RootKind::Array)
        );

        let arr = Value::from(realm.new_array(vec![Value::Int(1)]));
        let push = realm.get_property(&arr, "push").unwrap();
        assert_eq!(
            invoke(&push, &arr, vec![Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Int(3)
        );
        assert_eq!(realm.get_property(&arr, "2").unwrap(), Value::Int(3));
        assert_eq!(realm.get_property(&arr, "length").unwrap(), Value::Int(3));

        let has_own = realm.get_property(&arr, "hasOwnProperty").unwrap();
        assert!(has_own.as_object().is_some());
        assert_eq!(realm.get_property(&arr, "missing").unwrap(), Value::Undefined);
        assert!(invoke(&push, &Value::Int(1), vec![]).is_err());
    }
}
