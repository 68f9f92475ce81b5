use bytes::Bytes;
use futures::StreamExt;
use http_body::Frame;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full, StreamBody};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub fn empty() -> BoxBody<Bytes, hyper::Error> {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Request body fed chunk-by-chunk from the write half of a server stream.
/// The body ends when the sending half is dropped.
pub(crate) fn channel(receiver: mpsc::UnboundedReceiver<Bytes>) -> BoxBody<Bytes, hyper::Error> {
    let frames = UnboundedReceiverStream::new(receiver)
        .map(|chunk| Ok::<_, hyper::Error>(Frame::data(chunk)));
    BodyExt::boxed(StreamBody::new(frames))
}
