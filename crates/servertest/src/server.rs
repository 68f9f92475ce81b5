// The server collaborator seam: anything able to bind an ephemeral port,
// serve HTTP for one exchange, close on demand and broadcast faults to
// registered watchers.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::server::conn::http1;
use hyper::service;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::types::{BoxedError, HyperRequest, HyperResponse, JoinHandle, Result};

// -- Faults

/// Fault raised by a server collaborator while listening or serving. Carried
/// on a broadcast channel so watchers can be registered and deregistered as
/// an explicit pair.
#[derive(Debug, Clone)]
pub struct ServerFault {
    pub message: String,
}

impl ServerFault {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::error::Error for ServerFault {}

impl core::fmt::Display for ServerFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// -- Collaborator seam

/// A server that an orchestration can bind to an ephemeral port, watch for
/// faults while the request is in flight, and close when the exchange ends.
#[async_trait]
pub trait HttpServer: Send + Sync + 'static {
    /// Bind the given port (0 requests an ephemeral one) and begin serving.
    async fn listen(&self, port: u16) -> io::Result<Binding>;

    /// Register a fault watcher. Dropping the receiver deregisters it.
    fn watch_faults(&self) -> broadcast::Receiver<ServerFault>;

    /// Number of currently registered fault watchers.
    fn fault_watchers(&self) -> usize;
}

/// Handle to one bound listener, valid for a single orchestration.
pub struct Binding {
    addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

// -- Constructors

impl Binding {
    #[must_use]
    pub fn new(addr: SocketAddr, shutdown: broadcast::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            addr,
            shutdown,
            task,
        }
    }
}

// -- Implementation details

impl Binding {
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the accept loop to wind down.
    /// Connections already being served are left to finish on their own.
    pub async fn close(self) {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!("Failed to wind down the accept loop cleanly: {err:?}");
            }
            Err(err) => {
                tracing::error!("Accept loop task did not complete: {err:?}");
            }
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = HyperResponse> + Send + 'static>>;
type Handler = dyn Fn(HyperRequest) -> HandlerFuture + Send + Sync + 'static;

/// Handler-closure-backed HTTP server for tests to drive requests against.
/// A single instance is reusable across orchestrations; every `listen`
/// produces an independent binding.
pub struct TestServer {
    handler: Arc<Handler>,
    faults: broadcast::Sender<ServerFault>,
}

// -- Constructors

impl TestServer {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(HyperRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HyperResponse> + Send + 'static,
    {
        let (faults, _) = broadcast::channel(4);
        let handler: Arc<Handler> =
            Arc::new(move |req| -> HandlerFuture { Box::pin(handler(req)) });
        Self { handler, faults }
    }

    pub fn shared<F, Fut>(handler: F) -> Arc<Self>
    where
        F: Fn(HyperRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HyperResponse> + Send + 'static,
    {
        Arc::new(Self::new(handler))
    }
}

/// Bridges the handler closure into hyper's connection-level service.
struct HandlerService(Arc<Handler>);

impl service::Service<HyperRequest> for HandlerService {
    type Response = HyperResponse;
    type Error = hyper::Error;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<HyperResponse, hyper::Error>> + Send>>;

    fn call(&self, req: HyperRequest) -> Self::Future {
        let handler = self.0.clone();
        Box::pin(async move { Ok(handler(req).await) })
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<Handler>,
    faults: broadcast::Sender<ServerFault>,
) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((connection, client_addr)) => {
                let service = HandlerService(handler.clone());
                tokio::spawn(async move {
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(TokioIo::new(connection), service)
                        .await
                    {
                        tracing::error!(
                            "Failed to serve connection from {client_addr}: {err:?}"
                        );
                    }
                });
            }
            Err(err) => {
                let _ = faults.send(ServerFault::new(err.to_string()));
                return Err(BoxedError::from(err));
            }
        }
    }
}

// -- Collaborator implementation

#[async_trait]
impl HttpServer for TestServer {
    async fn listen(&self, port: u16) -> io::Result<Binding> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        let (shutdown, mut shutdown_signal) = broadcast::channel::<()>(1);
        let handler = self.handler.clone();
        let faults = self.faults.clone();

        tracing::debug!("Serving test requests on {addr}");

        let task = tokio::spawn(async move {
            tokio::select! {
                res = accept_loop(listener, handler, faults) => res,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::full;

    #[tokio::test]
    async fn should_bind_an_ephemeral_port_per_listen() {
        let server = TestServer::shared(|_req| async { hyper::Response::new(full("OK")) });

        let first = server.listen(0).await.unwrap();
        let second = server.listen(0).await.unwrap();

        assert_ne!(first.addr().port(), 0);
        assert_ne!(second.addr().port(), 0);
        assert_ne!(first.addr().port(), second.addr().port());

        first.close().await;
        second.close().await;
    }

    #[tokio::test]
    async fn should_pair_watcher_registration_with_receiver_drop() {
        let server = TestServer::shared(|_req| async { hyper::Response::new(full("OK")) });
        assert_eq!(server.fault_watchers(), 0);

        let watcher = server.watch_faults();
        assert_eq!(server.fault_watchers(), 1);

        drop(watcher);
        assert_eq!(server.fault_watchers(), 0);
    }
}
