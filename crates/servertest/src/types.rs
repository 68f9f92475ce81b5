// Types for the packages

use http_body_util::combinators::BoxBody;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, BoxedError>;

pub type JoinHandle<T> = tokio::task::JoinHandle<Result<T>>;

/// Request type handed to test server handlers.
pub type HyperRequest = hyper::Request<hyper::body::Incoming>;

/// Response type produced by test server handlers.
pub type HyperResponse = hyper::Response<BoxBody<bytes::Bytes, hyper::Error>>;
