//! Error types for the proxy protocol.

use crate::bridge::protocol::{Handle, SpecId};

/// Error raised inside the privileged realm (the equivalent of a thrown exception).
///
/// Native functions, accessors and property writes report failures with this type.
/// The dispatcher wraps it into the matching [`ProxyError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failures surfaced by the object cache, the codecs and the dispatcher.
///
/// Every variant is turned into an error envelope at the dispatcher boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// Handle out of range, or minted by a cache that has since been torn down.
    #[error("invalid object handle {handle}")]
    InvalidHandle { handle: Handle },

    #[error("failed to read property '{property}': {message}")]
    PropertyAccess { property: String, message: String },

    #[error("failed to assign property '{property}': {message}")]
    PropertyAssign { property: String, message: String },

    #[error("invocation failed: {message}")]
    Invocation { message: String },

    /// `lookupObject` against `undefined`/`null`.
    #[error("handle {handle} does not refer to an object")]
    NotAnObject { handle: Handle },

    /// A `specRef` pointed at a spec id not seen earlier in the same payload.
    #[error("unknown spec reference {0}")]
    UnknownSpecReference(SpecId),

    /// A known operation with missing or mistyped fields.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The reply was produced but could not be framed (for example it is too large).
    #[error("response could not be sent: {0}")]
    UnsendableResponse(String),
}

impl ProxyError {
    pub fn property_access(property: impl Into<String>, err: HostError) -> Self {
        Self::PropertyAccess {
            property: property.into(),
            message: err.message,
        }
    }

    pub fn property_assign(property: impl Into<String>, err: HostError) -> Self {
        Self::PropertyAssign {
            property: property.into(),
            message: err.message,
        }
    }

    pub fn invocation(err: HostError) -> Self {
        Self::Invocation {
            message: err.message,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
