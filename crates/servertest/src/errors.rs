use thiserror::Error;

use crate::core::ServerReply;
use crate::types::BoxedError;

// -- Errors

/// Terminal failures for a single orchestrated request. None are retried.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The server collaborator failed to bind, or faulted while serving.
    #[error("failed to bind or serve the test server: {0}")]
    Listen(#[source] BoxedError),

    /// The outgoing request failed at the transport level.
    #[error("request transport failed: {0}")]
    Transport(#[source] BoxedError),

    /// The response body could not be parsed as JSON. The undecoded text is
    /// preserved on the attached reply rather than discarded.
    #[error("failed to decode response body as JSON: {source}")]
    Decode {
        source: serde_json::Error,
        reply: ServerReply,
    },
}

// -- Accessors

impl RequestError {
    /// The partially-populated reply carried by a decode failure.
    #[must_use]
    pub fn reply(&self) -> Option<&ServerReply> {
        match self {
            Self::Decode { reply, .. } => Some(reply),
            Self::Listen(_) | Self::Transport(_) => None,
        }
    }
}

/// Failures raised by the duplex stream halves.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The write half was already finished.
    #[error("stream write half is closed")]
    Closed,
}
