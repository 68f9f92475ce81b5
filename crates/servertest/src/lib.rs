//! Test helper for driving a single HTTP request against a server bound to
//! an ephemeral port.
//!
//! [`request`] hands back a [`ServerStream`] that is writable (the outgoing
//! request body) and readable (the response body, when no completion was
//! supplied). Supplying a completion switches the orchestration into
//! buffering mode: the response body is accumulated, decoded per the
//! configured [`Encoding`] and delivered exactly once, together with status
//! and headers. The bound listener is always closed once the exchange ends.

pub mod body;
pub mod core;
pub mod errors;
pub mod request;
pub mod server;
pub mod streams;
pub mod types;

pub use crate::core::{
    Encoding, ReplyBody, RequestHead, RequestOptions, ResponseHead, ServerReply,
};
pub use body::{empty, full};
pub use errors::{RequestError, StreamError};
pub use request::{fetch, request, Completion};
pub use server::{Binding, HttpServer, ServerFault, TestServer};
pub use streams::{ResponseFrame, ServerStream};
pub use types::{BoxedError, HyperRequest, HyperResponse};
