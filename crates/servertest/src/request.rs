// Orchestrates a single request/response cycle against a server
// collaborator: bind an ephemeral port, dispatch one request, capture or
// stream the response, settle the completion exactly once, then tear the
// binding down.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{ACCEPT, HOST};
use http::{HeaderMap, HeaderValue, Method, Request, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::body;
use crate::core::{self, Encoding, RequestHead, RequestOptions, ResponseHead, ServerReply};
use crate::errors::RequestError;
use crate::server::{HttpServer, ServerFault};
use crate::streams::{ResponseFrame, ServerStream};
use crate::types::BoxedError;

/// Completion handed the single outcome of a buffering-mode orchestration.
pub type Completion = Box<dyn FnOnce(Result<ServerReply, RequestError>) + Send + 'static>;

const INBOUND_BUFFER: usize = 16;

// -- Single-delivery guard

/// Where the single outcome of an orchestration goes: through the completion
/// in buffering mode, or onto the stream's read half in streaming mode.
enum Delivery {
    Buffered(Completion),
    Streamed(mpsc::Sender<ResponseFrame>),
}

/// Explicit pending -> settled state for one orchestration. Whichever event
/// settles first wins; later outcomes are logged and suppressed.
struct Settlement {
    delivery: Option<Delivery>,
}

impl Settlement {
    fn buffered(completion: Completion) -> Self {
        Self {
            delivery: Some(Delivery::Buffered(completion)),
        }
    }

    fn streamed(frames: mpsc::Sender<ResponseFrame>) -> Self {
        Self {
            delivery: Some(Delivery::Streamed(frames)),
        }
    }

    /// Check-and-set delivery. `Ok(None)` marks a fully streamed exchange,
    /// which has nothing left to hand over.
    async fn settle(&mut self, outcome: Result<Option<ServerReply>, RequestError>) {
        let Some(delivery) = self.delivery.take() else {
            tracing::debug!("Orchestration already settled, suppressing a late outcome");
            return;
        };

        match (delivery, outcome) {
            (Delivery::Buffered(completion), Ok(Some(reply))) => completion(Ok(reply)),
            (Delivery::Buffered(completion), Err(err)) => completion(Err(err)),
            (Delivery::Buffered(_), Ok(None)) => {}
            (Delivery::Streamed(_), Ok(_)) => {}
            (Delivery::Streamed(frames), Err(err)) => {
                tracing::error!("Request failed in streaming mode: {err}");
                let _ = frames.send(Err(err)).await;
            }
        }
    }
}

// -- Orchestration entry points

/// Bind `server` to an ephemeral port, issue a single HTTP request against
/// `path` and return the duplex stream for the in-flight exchange.
///
/// With a completion the response body is buffered, decoded per
/// `options.encoding` and delivered exactly once; without one the response
/// bytes flow through the stream's read half untouched.
pub fn request<S>(
    server: &Arc<S>,
    path: &str,
    options: RequestOptions,
    completion: Option<Completion>,
) -> ServerStream
where
    S: HttpServer + ?Sized,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let (request_watch, request_view) = watch::channel::<Option<RequestHead>>(None);
    let (response_watch, response_view) = watch::channel::<Option<ResponseHead>>(None);

    let method = options.method.clone().unwrap_or(Method::GET);
    let mut headers = options.headers.clone();
    if options.encoding == Encoding::Json && !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    }
    let path = core::normalize_path(path);

    let (settlement, frames) = match completion {
        Some(completion) => (Settlement::buffered(completion), None),
        None => (Settlement::streamed(inbound_tx.clone()), Some(inbound_tx)),
    };

    let stream = ServerStream::new(outbound_tx, inbound_rx, request_view, response_view);

    tokio::spawn(drive(
        Arc::clone(server),
        method,
        path,
        headers,
        options.encoding,
        settlement,
        body::channel(outbound_rx),
        request_watch,
        response_watch,
        frames,
    ));

    stream
}

/// Buffering-mode convenience: run one orchestration with an internal
/// completion and await its single outcome. The request carries no body.
pub async fn fetch<S>(
    server: &Arc<S>,
    path: &str,
    options: RequestOptions,
) -> Result<ServerReply, RequestError>
where
    S: HttpServer + ?Sized,
{
    let (done, outcome) = oneshot::channel();
    let completion: Completion = Box::new(move |result| {
        let _ = done.send(result);
    });

    let stream = request(server, path, options, Some(completion));
    drop(stream);

    match outcome.await {
        Ok(result) => result,
        Err(_) => Err(RequestError::Transport(
            "orchestration ended without settling".into(),
        )),
    }
}

// -- Implementation details

#[allow(clippy::too_many_arguments)]
async fn drive<S>(
    server: Arc<S>,
    method: Method,
    path: String,
    headers: HeaderMap,
    encoding: Encoding,
    mut settlement: Settlement,
    outbound: BoxBody<Bytes, hyper::Error>,
    request_watch: watch::Sender<Option<RequestHead>>,
    response_watch: watch::Sender<Option<ResponseHead>>,
    frames: Option<mpsc::Sender<ResponseFrame>>,
) where
    S: HttpServer + ?Sized,
{
    let binding = match server.listen(0).await {
        Ok(binding) => binding,
        Err(err) => {
            settlement
                .settle(Err(RequestError::Listen(err.into())))
                .await;
            return;
        }
    };

    let mut faults = server.watch_faults();
    let addr = binding.addr();
    tracing::debug!("Dispatching {method} {path} against {addr}");

    let outcome = tokio::select! {
        fault = next_fault(&mut faults) => Err(RequestError::Listen(fault.into())),
        outcome = exchange(
            addr,
            method,
            path,
            headers,
            encoding,
            outbound,
            &request_watch,
            &response_watch,
            frames,
        ) => outcome,
    };

    binding.close().await;
    drop(faults);

    settlement.settle(outcome).await;
}

/// Next fault broadcast by the server. Pends forever once the channel
/// closes.
async fn next_fault(faults: &mut broadcast::Receiver<ServerFault>) -> ServerFault {
    loop {
        match faults.recv().await {
            Ok(fault) => return fault,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return std::future::pending::<ServerFault>().await;
            }
        }
    }
}

fn transport<E>(err: E) -> RequestError
where
    E: Into<BoxedError>,
{
    RequestError::Transport(err.into())
}

/// The exchange proper: connect to the bound port, dispatch the request
/// with the channel-fed body, then either buffer-and-decode the response or
/// forward its frames live.
#[allow(clippy::too_many_arguments)]
async fn exchange(
    addr: SocketAddr,
    method: Method,
    path: String,
    mut headers: HeaderMap,
    encoding: Encoding,
    outbound: BoxBody<Bytes, hyper::Error>,
    request_watch: &watch::Sender<Option<RequestHead>>,
    response_watch: &watch::Sender<Option<ResponseHead>>,
    frames: Option<mpsc::Sender<ResponseFrame>>,
) -> Result<Option<ServerReply>, RequestError> {
    let uri: Uri = path.parse().map_err(transport)?;

    let connection = TcpStream::connect(addr).await.map_err(transport)?;
    let (mut sender, conn) = http1::Builder::new()
        .handshake(TokioIo::new(connection))
        .await
        .map_err(transport)?;

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            tracing::error!("Connection to the test server dropped: {err:?}");
        }
    });

    if !headers.contains_key(HOST) {
        let host = HeaderValue::from_str(&addr.to_string()).map_err(transport)?;
        headers.insert(HOST, host);
    }

    let head = RequestHead {
        method: method.clone(),
        uri: uri.clone(),
        headers: headers.clone(),
    };

    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in &headers {
        builder = builder.header(name, value);
    }
    let outgoing = builder.body(outbound).map_err(transport)?;

    let _ = request_watch.send(Some(head));

    let response = sender.send_request(outgoing).await.map_err(transport)?;

    let status = response.status();
    let headers = response.headers().clone();
    let _ = response_watch.send(Some(ResponseHead {
        status,
        headers: headers.clone(),
    }));

    let mut incoming = response.into_body();

    match frames {
        // buffering mode: accumulate, then decode
        None => {
            let data = incoming.collect().await.map_err(transport)?.to_bytes();
            core::decode_reply(status, headers, data, encoding).map(Some)
        }
        // streaming mode: forward data frames as they arrive
        Some(frames) => {
            while let Some(next) = incoming.frame().await {
                let frame = next.map_err(transport)?;
                if let Ok(data) = frame.into_data() {
                    if frames.send(Ok(data)).await.is_err() {
                        tracing::debug!("Streaming reader went away before the response ended");
                        break;
                    }
                }
            }
            Ok(None)
        }
    }
}
