// The duplex adapter handed back to callers: two independent channel halves
// unified behind one object. The write half feeds the outgoing request body;
// the read half carries response bytes in streaming mode and is inert when a
// completion was supplied.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::core::{RequestHead, ResponseHead};
use crate::errors::{RequestError, StreamError};

/// One chunk of the response body, or the failure that ended the exchange.
pub type ResponseFrame = Result<Bytes, RequestError>;

/// Bidirectional stream representing an in-flight request/response cycle.
///
/// Writes are queued ahead of the connection actually opening, so the stream
/// is usable the moment it is returned. Dropping the stream ends the request
/// body but never cancels the exchange.
pub struct ServerStream {
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    inbound: mpsc::Receiver<ResponseFrame>,
    request: watch::Receiver<Option<RequestHead>>,
    response: watch::Receiver<Option<ResponseHead>>,
}

// -- Constructors

impl ServerStream {
    pub(crate) fn new(
        outbound: mpsc::UnboundedSender<Bytes>,
        inbound: mpsc::Receiver<ResponseFrame>,
        request: watch::Receiver<Option<RequestHead>>,
        response: watch::Receiver<Option<ResponseHead>>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            inbound,
            request,
            response,
        }
    }
}

// -- Write half

impl ServerStream {
    /// Queue a chunk for the outgoing request body. Chunks written before
    /// the connection opens are buffered and flushed in order.
    pub fn write(&self, chunk: impl Into<Bytes>) -> Result<(), StreamError> {
        match &self.outbound {
            Some(sender) => sender
                .send(chunk.into())
                .map_err(|_| StreamError::Closed),
            None => Err(StreamError::Closed),
        }
    }

    /// End the outgoing request body. Further writes fail with
    /// [`StreamError::Closed`].
    pub fn finish(&mut self) {
        self.outbound = None;
    }
}

// -- Read half

impl ServerStream {
    /// Next response body chunk in streaming mode. Yields `None` once the
    /// response has ended; buffering-mode streams are exhausted from the
    /// start. Failures surface here as `Err` frames.
    pub async fn recv(&mut self) -> Option<ResponseFrame> {
        self.inbound.recv().await
    }

    /// Accumulate the streamed response body to its end.
    pub async fn collect(&mut self) -> Result<Bytes, RequestError> {
        let mut data = Vec::new();
        while let Some(frame) = self.inbound.recv().await {
            data.extend_from_slice(&frame?);
        }
        Ok(Bytes::from(data))
    }
}

// -- Exchange metadata

impl ServerStream {
    /// Metadata of the outgoing request, once it has been dispatched.
    /// Resolves to `None` if the exchange died before the dispatch.
    pub async fn request_head(&mut self) -> Option<RequestHead> {
        let head = self.request.wait_for(|head| head.is_some()).await.ok()?;
        head.clone()
    }

    /// Status and headers of the response, once its head has arrived.
    /// Resolves to `None` if the exchange died before the response.
    pub async fn response_head(&mut self) -> Option<ResponseHead> {
        let head = self.response.wait_for(|head| head.is_some()).await.ok()?;
        head.clone()
    }
}
