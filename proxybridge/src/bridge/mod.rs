//! Wire layer between the sandboxed side and the privileged realm.
//!
//! # Architecture
//!
//! - **protocol**: Handles, value specs, requests, envelopes, host frames
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
