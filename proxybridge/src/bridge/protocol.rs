//! Wire protocol types for sandbox-privileged communication.
//!
//! Three message families:
//! - **Requests** (sandbox → privileged): getProperty, setProperty, callFunction, lookupObject
//! - **Envelopes** (privileged → sandbox): the synchronous reply to a request
//! - **Callback deliveries** (privileged → sandbox): one-way, independent of any request
//!
//! Values cross the channel as [`WireSpec`] trees. Field names are camelCase on the wire.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Index into one context's object cache. Handle 0 is always the context root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u64);

impl Handle {
    pub const ROOT: Self = Self(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Handle for a cache slot. `usize` is never wider than 64 bits.
    pub fn from_index(index: usize) -> Self {
        Self(index as u64)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Cache slot, or `None` if the handle does not fit this platform's `usize`.
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an array/object spec within one serialized payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecId(u32);

impl SpecId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SpecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a function living on the requesting (sandboxed) side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(u64);

impl CallbackId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one sandboxed context (a tab's content script, a page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(uuid::Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directly transportable value: primitive, date or pattern.
///
/// `Undefined` has no JSON form; it is encoded as the absence of the `value` field.
/// `Float` only carries finite numbers; NaN and the infinities travel as
/// `NonFinite`, and an invalid date (NaN) as `{"date": null}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date {
        #[serde(with = "date_millis")]
        date: f64,
    },
    Pattern { pattern: String, flags: String },
    NonFinite { number: NonFinite },
    #[default]
    #[serde(skip_deserializing)]
    Undefined,
}

impl Literal {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Number literal; non-finite values get their explicit encoding.
    pub fn number(n: f64) -> Self {
        match NonFinite::classify(n) {
            Some(number) => Self::NonFinite { number },
            None => Self::Float(n),
        }
    }
}

/// Numbers JSON cannot represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonFinite {
    NaN,
    Infinity,
    #[serde(rename = "-Infinity")]
    NegativeInfinity,
}

impl NonFinite {
    pub fn classify(n: f64) -> Option<Self> {
        if n.is_nan() {
            Some(Self::NaN)
        } else if n == f64::INFINITY {
            Some(Self::Infinity)
        } else if n == f64::NEG_INFINITY {
            Some(Self::NegativeInfinity)
        } else {
            None
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Self::NaN => f64::NAN,
            Self::Infinity => f64::INFINITY,
            Self::NegativeInfinity => f64::NEG_INFINITY,
        }
    }
}

/// Date timestamps: finite milliseconds, or `null` for an invalid date.
mod date_millis {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ms: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if ms.is_finite() {
            serializer.serialize_f64(*ms)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Transportable, structurally-tagged representation of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WireSpec {
    Value {
        #[serde(default, skip_serializing_if = "Literal::is_undefined")]
        value: Literal,
    },

    /// Structural sequence, expanded eagerly.
    Array { spec_id: SpecId, items: Vec<WireSpec> },

    /// Repeat occurrence of an array/object spec emitted earlier in the same payload.
    SpecRef { spec_id: SpecId },

    /// Opaque cached object. The serializer only ever fills `object_id`;
    /// the deserializer only ever reads `properties`.
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object_id: Option<Handle>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spec_id: Option<SpecId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<IndexMap<String, WireSpec>>,
    },

    /// Function living on the requesting side.
    Callback { callback_id: CallbackId },

    /// Resolve to an object already present in the cache.
    LookupSavedObject { object_id: Handle },
}

impl WireSpec {
    pub fn value(value: Literal) -> Self {
        Self::Value { value }
    }

    pub fn object(handle: Handle) -> Self {
        Self::Object {
            object_id: Some(handle),
            spec_id: None,
            properties: None,
        }
    }

    pub fn callback(callback_id: CallbackId) -> Self {
        Self::Callback { callback_id }
    }

    pub fn saved(handle: Handle) -> Self {
        Self::LookupSavedObject { object_id: handle }
    }
}

/// Requests from the sandboxed side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProxyRequest {
    GetProperty {
        object_id: Handle,
        property: String,
    },

    SetProperty {
        object_id: Handle,
        property: String,
        value: WireSpec,
    },

    CallFunction {
        function_id: Handle,
        context_id: Handle,
        #[serde(default)]
        args: Vec<WireSpec>,
    },

    LookupObject {
        object_id: Handle,
    },

    /// Any other `type`. Dispatch produces no reply for it.
    #[serde(other)]
    Unknown,
}

impl ProxyRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetProperty { .. } => "getProperty",
            Self::SetProperty { .. } => "setProperty",
            Self::CallFunction { .. } => "callFunction",
            Self::LookupObject { .. } => "lookupObject",
            Self::Unknown => "unknown",
        }
    }
}

/// Which canonical root of the realm's type system an object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootKind {
    Object,
    Function,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub enumerable: bool,
}

/// Reflection data returned by `lookupObject`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResult {
    pub properties: IndexMap<String, PropertyInfo>,
    pub is_function: bool,
    /// Freshly cached handle of the object's parent in its inheritance chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_handle: Option<Handle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_kind: Option<RootKind>,
}

/// Payload of a successful reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Spec(WireSpec),
    Lookup(LookupResult),
}

/// Uniform reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResponsePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_response: Option<String>,
}

impl Envelope {
    pub fn success(result: Option<ResponsePayload>) -> Self {
        Self {
            success_response: true,
            result,
            error_response: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success_response: false,
            result: None,
            error_response: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success_response
    }

    pub fn spec(&self) -> Option<&WireSpec> {
        match &self.result {
            Some(ResponsePayload::Spec(spec)) => Some(spec),
            _ => None,
        }
    }

    pub fn lookup(&self) -> Option<&LookupResult> {
        match &self.result {
            Some(ResponsePayload::Lookup(lookup)) => Some(lookup),
            _ => None,
        }
    }
}

/// One-way notification asking the sandboxed side to run one of its callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackMessage {
    pub callback_id: CallbackId,
    /// Handle of the `this` value the callback was invoked with.
    pub context_id: Handle,
    pub args: Vec<WireSpec>,
}

/// Frames read by the host adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Raw request; parsed by the dispatcher so malformed requests still get a reply.
    Request {
        context: ContextId,
        request: serde_json::Value,
    },

    /// Lifecycle-end signal for a context (tab/page closed).
    Closed { context: ContextId },
}

/// Frames written by the host adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostReply {
    Response {
        context: ContextId,
        #[serde(skip_serializing_if = "Option::is_none")]
        envelope: Option<Envelope>,
    },

    Callback {
        context: ContextId,
        message: CallbackMessage,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context_id() -> ContextId {
        ContextId(uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap())
    }

    #[test]
    fn get_property_deserializes() {
        let req: ProxyRequest =
            serde_json::from_value(json!({"type": "getProperty", "objectId": 0, "property": "ext"}))
                .unwrap();
        assert_eq!(
            req,
            ProxyRequest::GetProperty {
                object_id: Handle::ROOT,
                property: "ext".to_string(),
            }
        );
    }

    #[test]
    fn set_property_deserializes_nested_spec() {
        let req: ProxyRequest = serde_json::from_value(json!({
            "type": "setProperty",
            "objectId": 3,
            "property": "listener",
            "value": {"type": "callback", "callbackId": 12}
        }))
        .unwrap();
        assert_eq!(
            req,
            ProxyRequest::SetProperty {
                object_id: Handle::new(3),
                property: "listener".to_string(),
                value: WireSpec::callback(CallbackId::new(12)),
            }
        );
    }

    #[test]
    fn call_function_deserializes() {
        let req: ProxyRequest = serde_json::from_value(json!({
            "type": "callFunction",
            "functionId": 4,
            "contextId": 2,
            "args": [
                {"type": "value", "value": 1},
                {"type": "lookupSavedObject", "objectId": 2},
                {"type": "array", "specId": 0, "items": [{"type": "specRef", "specId": 0}]}
            ]
        }))
        .unwrap();
        match req {
            ProxyRequest::CallFunction {
                function_id,
                context_id,
                args,
            } => {
                assert_eq!(function_id, Handle::new(4));
                assert_eq!(context_id, Handle::new(2));
                assert_eq!(args.len(), 3);
                assert_eq!(args[0], WireSpec::value(Literal::Int(1)));
                assert_eq!(args[1], WireSpec::saved(Handle::new(2)));
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn unknown_request_type_is_not_an_error() {
        let req: ProxyRequest =
            serde_json::from_value(json!({"type": "deleteProperty", "objectId": 1})).unwrap();
        assert_eq!(req, ProxyRequest::Unknown);
        assert_eq!(req.kind(), "unknown");
    }

    #[test]
    fn literal_undefined_omits_value_field() {
        let spec = WireSpec::value(Literal::Undefined);
        assert_eq!(serde_json::to_value(&spec).unwrap(), json!({"type": "value"}));

        let back: WireSpec = serde_json::from_value(json!({"type": "value"})).unwrap();
        assert_eq!(back, WireSpec::value(Literal::Undefined));
    }

    #[test]
    fn literal_null_is_distinct_from_undefined() {
        let back: WireSpec = serde_json::from_value(json!({"type": "value", "value": null})).unwrap();
        assert_eq!(back, WireSpec::value(Literal::Null));
    }

    #[test]
    fn literal_numbers_keep_integer_form() {
        let spec = WireSpec::value(Literal::Int(1));
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({"type": "value", "value": 1})
        );

        let back: WireSpec = serde_json::from_value(json!({"type": "value", "value": 1.5})).unwrap();
        assert_eq!(back, WireSpec::value(Literal::Float(1.5)));
    }

    #[test]
    fn literal_date_and_pattern_shapes() {
        let date = WireSpec::value(Literal::Date { date: 86_400_000.0 });
        assert_eq!(
            serde_json::to_value(&date).unwrap(),
            json!({"type": "value", "value": {"date": 86_400_000.0}})
        );

        let pattern = WireSpec::value(Literal::Pattern {
            pattern: "^https?://".to_string(),
            flags: "i".to_string(),
        });
        insta::assert_json_snapshot!(pattern, @r#"
        {
          "type": "value",
          "value": {
            "pattern": "^https?://",
            "flags": "i"
          }
        }
        "#);
    }

    #[test]
    fn non_finite_numbers_are_explicit() {
        let spec = WireSpec::value(Literal::number(f64::NEG_INFINITY));
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            json,
            json!({"type": "value", "value": {"number": "-Infinity"}})
        );
        let back: WireSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);

        let back: WireSpec =
            serde_json::from_value(json!({"type": "value", "value": {"number": "NaN"}})).unwrap();
        match back {
            WireSpec::Value {
                value: Literal::NonFinite { number },
            } => assert!(number.value().is_nan()),
            other => panic!("wrong spec: {:?}", other),
        }

        assert_eq!(Literal::number(2.5), Literal::Float(2.5));
    }

    #[test]
    fn invalid_date_travels_as_null() {
        let spec = WireSpec::value(Literal::Date { date: f64::NAN });
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json, json!({"type": "value", "value": {"date": null}}));

        match serde_json::from_value::<WireSpec>(json).unwrap() {
            WireSpec::Value {
                value: Literal::Date { date },
            } => assert!(date.is_nan()),
            other => panic!("wrong spec: {:?}", other),
        }
    }

    #[test]
    fn handle_index_fits_platform() {
        assert_eq!(Handle::from_index(7), Handle::new(7));
        assert_eq!(Handle::new(7).index(), Some(7));
        assert_eq!(
            serde_json::to_value(Handle::new(u64::from(u32::MAX) + 1)).unwrap(),
            json!(4_294_967_296u64)
        );
    }

    #[test]
    fn object_spec_serializes_handle_only() {
        let spec = WireSpec::object(Handle::new(5));
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({"type": "object", "objectId": 5})
        );
    }

    #[test]
    fn success_envelope_serializes() {
        let env = Envelope::success(Some(ResponsePayload::Spec(WireSpec::value(Literal::Str(
            "hello".to_string(),
        )))));
        insta::assert_json_snapshot!(env, @r#"
        {
          "successResponse": true,
          "result": {
            "type": "value",
            "value": "hello"
          }
        }
        "#);
    }

    #[test]
    fn empty_success_envelope_serializes() {
        let env = Envelope::success(None);
        assert_eq!(serde_json::to_value(&env).unwrap(), json!({"successResponse": true}));
    }

    #[test]
    fn failure_envelope_serializes() {
        let env = Envelope::failure("invalid object handle 42");
        insta::assert_json_snapshot!(env, @r#"
        {
          "successResponse": false,
          "errorResponse": "invalid object handle 42"
        }
        "#);
    }

    #[test]
    fn lookup_envelope_roundtrips_through_untagged_payload() {
        let mut properties = IndexMap::new();
        properties.insert("app".to_string(), PropertyInfo { enumerable: true });
        let env = Envelope::success(Some(ResponsePayload::Lookup(LookupResult {
            properties,
            is_function: false,
            parent_handle: Some(Handle::new(2)),
            root_kind: None,
        })));

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            json!({
                "successResponse": true,
                "result": {
                    "properties": {"app": {"enumerable": true}},
                    "isFunction": false,
                    "parentHandle": 2
                }
            })
        );

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
        assert!(back.lookup().is_some());
    }

    #[test]
    fn callback_message_serializes() {
        let msg = CallbackMessage {
            callback_id: CallbackId::new(9),
            context_id: Handle::new(3),
            args: vec![WireSpec::value(Literal::Bool(true))],
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "callbackId": 9,
                "contextId": 3,
                "args": [{"type": "value", "value": true}]
            })
        );
    }

    #[test]
    fn host_closed_serializes() {
        let msg = HostMessage::Closed {
            context: test_context_id(),
        };
        insta::assert_json_snapshot!(msg, @r#"
        {
          "type": "closed",
          "context": "550e8400-e29b-41d4-a716-446655440000"
        }
        "#);
    }

    #[test]
    fn host_response_without_envelope_serializes() {
        let reply = HostReply::Response {
            context: test_context_id(),
            envelope: None,
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"type": "response", "context": "550e8400-e29b-41d4-a716-446655440000"})
        );
    }
}
