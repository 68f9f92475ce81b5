// Server fixtures shared by the integration suites.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use servertest::{
    full, Binding, BoxedError, Completion, HttpServer, HyperRequest, RequestError, ServerFault,
    ServerReply, TestServer,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};

/// Everything the server observed about the single incoming request.
#[derive(Debug, Default)]
pub struct Recorded {
    pub method: Option<Method>,
    pub uri: Option<String>,
    pub headers: Option<HeaderMap>,
    pub body: Option<Bytes>,
}

async fn read_body(req: HyperRequest) -> (http::request::Parts, Bytes) {
    let (parts, body) = req.into_parts();
    let data = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();
    (parts, data)
}

/// Records the incoming request and answers with a fixed plain-text reply.
pub fn recording_server(record: Arc<Mutex<Recorded>>, reply: &'static str) -> Arc<TestServer> {
    TestServer::shared(move |req: HyperRequest| {
        let record = record.clone();
        async move {
            let (parts, data) = read_body(req).await;
            {
                let mut slot = record.lock().unwrap();
                slot.method = Some(parts.method);
                slot.uri = Some(parts.uri.to_string());
                slot.headers = Some(parts.headers);
                slot.body = Some(data);
            }
            hyper::Response::new(full(reply))
        }
    })
}

/// Records the incoming request and answers with a JSON document.
pub fn recording_json_server(
    record: Arc<Mutex<Recorded>>,
    value: serde_json::Value,
) -> Arc<TestServer> {
    TestServer::shared(move |req: HyperRequest| {
        let record = record.clone();
        let payload = value.to_string();
        async move {
            let (parts, data) = read_body(req).await;
            {
                let mut slot = record.lock().unwrap();
                slot.method = Some(parts.method);
                slot.uri = Some(parts.uri.to_string());
                slot.headers = Some(parts.headers);
                slot.body = Some(data);
            }
            let mut response = hyper::Response::new(full(payload));
            response.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
    })
}

/// Answers with the request body unchanged.
pub fn echo_server() -> Arc<TestServer> {
    TestServer::shared(|req: HyperRequest| async move {
        let (_parts, data) = read_body(req).await;
        hyper::Response::new(full(data))
    })
}

/// Answers with the request body uppercased.
pub fn uppercase_server() -> Arc<TestServer> {
    TestServer::shared(|req: HyperRequest| async move {
        let (_parts, data) = read_body(req).await;
        let upper = String::from_utf8_lossy(&data).to_uppercase();
        hyper::Response::new(full(upper))
    })
}

/// Answers every request with the given status and plain-text reply.
pub fn status_server(status: StatusCode, reply: &'static str) -> Arc<TestServer> {
    TestServer::shared(move |_req: HyperRequest| async move {
        let mut response = hyper::Response::new(full(reply));
        *response.status_mut() = status;
        response
    })
}

/// Answers every request with the given bytes and content type.
pub fn bytes_server(payload: Bytes, content_type: &'static str) -> Arc<TestServer> {
    TestServer::shared(move |_req: HyperRequest| {
        let payload = payload.clone();
        async move {
            let mut response = hyper::Response::new(full(payload));
            response.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static(content_type),
            );
            response
        }
    })
}

/// Completion wired to a oneshot so tests can await the single outcome.
pub fn completion() -> (
    Completion,
    oneshot::Receiver<Result<ServerReply, RequestError>>,
) {
    let (done, outcome) = oneshot::channel();
    let completion: Completion = Box::new(move |result| {
        let _ = done.send(result);
    });
    (completion, outcome)
}

/// Collaborator whose bind always fails, for exercising the listen-failure
/// path.
pub struct UnbindableServer {
    faults: broadcast::Sender<ServerFault>,
}

impl UnbindableServer {
    pub fn new() -> Self {
        let (faults, _) = broadcast::channel(1);
        Self { faults }
    }
}

#[async_trait]
impl HttpServer for UnbindableServer {
    async fn listen(&self, _port: u16) -> io::Result<Binding> {
        Err(io::Error::new(io::ErrorKind::AddrInUse, "no ports to bind"))
    }

    fn watch_faults(&self) -> broadcast::Receiver<ServerFault> {
        self.faults.subscribe()
    }

    fn fault_watchers(&self) -> usize {
        self.faults.receiver_count()
    }
}

/// Accepts connections and drops them immediately, so the outgoing request
/// dies at the transport level.
pub struct ResettingServer {
    faults: broadcast::Sender<ServerFault>,
}

impl ResettingServer {
    pub fn new() -> Self {
        let (faults, _) = broadcast::channel(1);
        Self { faults }
    }
}

#[async_trait]
impl HttpServer for ResettingServer {
    async fn listen(&self, port: u16) -> io::Result<Binding> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        let (shutdown, mut shutdown_signal) = broadcast::channel::<()>(1);

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = async {
                    loop {
                        match listener.accept().await {
                            Ok((connection, _)) => drop(connection),
                            Err(_) => break,
                        }
                    }
                } => Ok::<(), BoxedError>(()),
                _ = shutdown_signal.recv() => Ok(()),
            }
        });

        Ok(Binding::new(addr, shutdown, task))
    }

    fn watch_faults(&self) -> broadcast::Receiver<ServerFault> {
        self.faults.subscribe()
    }

    fn fault_watchers(&self) -> usize {
        self.faults.receiver_count()
    }
}
