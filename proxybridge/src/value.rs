//! Live values of the privileged realm.
//!
//! Arrays and objects are shared references compared by identity; everything
//! else is compared by value. Identity is what the object cache and both
//! serialization memos key on.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::HostError;
use crate::object::ObjectRef;

/// Largest array length (2^32 - 1); the largest index is one less.
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// Arrays are stored densely, so a write may not grow one past this many slots.
pub const MAX_DENSE_ARRAY_LENGTH: usize = 1 << 24;

/// Pattern literal (regular-expression source plus flags), carried by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub source: String,
    pub flags: String,
}

impl Pattern {
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: flags.into(),
        }
    }
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    Pattern(Pattern),
    Array(ArrayRef),
    Object(ObjectRef),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::Str(_) => "string",
            Self::Date(_) => "date",
            Self::Pattern(_) => "pattern",
            Self::Array(_) => "array",
            Self::Object(obj) if obj.is_callable() => "function",
            Self::Object(_) => "object",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Object(obj) if obj.is_callable())
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Allocation address for reference values, `None` for primitives.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::Array(arr) => Some(arr.identity()),
            Self::Object(obj) => Some(obj.identity()),
            _ => None,
        }
    }
}

/// Strict equality: references by identity, numbers numerically, NaN never equal.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Date(ms) => write!(f, "Date({ms})"),
            Self::Pattern(p) => write!(f, "/{}/{}", p.source, p.flags),
            Self::Array(arr) => arr.fmt(f),
            Self::Object(obj) => obj.fmt(f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<ArrayRef> for Value {
    fn from(arr: ArrayRef) -> Self {
        Self::Array(arr)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

/// Shared, mutable ordered sequence.
#[derive(Clone, Default)]
pub struct ArrayRef(Arc<Mutex<Vec<Value>>>);

impl ArrayRef {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(Mutex::new(items)))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Value>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current items. Callers never hold the lock while recursing.
    pub fn snapshot(&self) -> Vec<Value> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.lock().get(index).cloned()
    }

    /// Writes `value` at `index`, padding with `undefined` if the array is shorter.
    pub fn set(&self, index: usize, value: Value) -> Result<(), HostError> {
        let required = index
            .checked_add(1)
            .filter(|len| *len <= MAX_ARRAY_LENGTH)
            .ok_or_else(|| HostError::new("invalid array index"))?;
        let mut items = self.lock();
        if required > items.len() {
            grow(&mut items, required)?;
        }
        items[index] = value;
        Ok(())
    }

    pub fn push(&self, value: Value) {
        self.lock().push(value);
    }

    pub fn truncate_or_pad(&self, len: usize) -> Result<(), HostError> {
        if len > MAX_ARRAY_LENGTH {
            return Err(HostError::new("invalid array length"));
        }
        let mut items = self.lock();
        if len <= items.len() {
            items.truncate(len);
            Ok(())
        } else {
            grow(&mut items, len)
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

fn grow(items: &mut Vec<Value>, len: usize) -> Result<(), HostError> {
    if len > MAX_DENSE_ARRAY_LENGTH {
        return Err(HostError::new(format!(
            "array length {len} exceeds the limit of {MAX_DENSE_ARRAY_LENGTH}"
        )));
    }
    items
        .try_reserve(len - items.len())
        .map_err(|_| HostError::new("out of memory growing array"))?;
    items.resize(len, Value::Undefined);
    Ok(())
}

impl std::fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Items are not printed: arrays may contain themselves.
        write!(f, "Array@{:#x}(len={})", self.identity(), self.len())
    }
}
