//! proxybridge: reflective remote-object protocol between a sandboxed context
//! and a privileged realm.

mod error;
mod value;

pub mod bridge;
pub mod cache;
pub mod callback;
pub mod deserialize;
pub mod dispatcher;
pub mod object;
pub mod serialize;
pub mod transport;

pub use bridge::codec::{DEFAULT_MAX_FRAME_BYTES, FrameError, JsonCodec};
pub use bridge::protocol::{
    CallbackId, CallbackMessage, ContextId, Envelope, Handle, HostMessage, HostReply, Literal,
    LookupResult, NonFinite, ProxyRequest, RootKind, WireSpec,
};
pub use callback::{CallbackReceiver, OutboundCallback};
pub use dispatcher::{ContextGuard, ProxyDispatcher};
pub use error::{HostError, ProxyError, Result};
pub use object::{NativeFn, ObjectRef, Property, Realm};
pub use transport::{serve, serve_with_limit};
pub use value::{ArrayRef, Pattern, Value};
