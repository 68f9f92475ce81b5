// Request configuration and captured-response types for a single
// orchestrated exchange.

use bytes::Bytes;
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde::de::DeserializeOwned;

use crate::errors::RequestError;

/// Governs how the captured response body is decoded in buffering mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Hand the body over as raw bytes.
    #[default]
    Raw,
    /// Decode the body as UTF-8 text.
    Utf8,
    /// Parse the body as JSON.
    Json,
}

/// Configuration for the outgoing request. Defaults to a plain `GET` with
/// empty headers and a raw body capture.
#[derive(Debug, Default, Clone)]
pub struct RequestOptions {
    pub method: Option<Method>,
    pub headers: HeaderMap,
    pub encoding: Encoding,
}

// -- Builders

impl RequestOptions {
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Outgoing request metadata, recorded once the request is dispatched.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Incoming response metadata, recorded when the response head arrives.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Captured response delivered through the completion in buffering mode.
#[derive(Debug, Clone)]
pub struct ServerReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ReplyBody,
}

/// Response body after decoding per the configured [`Encoding`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Raw(Bytes),
    Text(String),
    Json(serde_json::Value),
}

// -- Accessors

impl ReplyBody {
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Raw(data) => Some(data),
            Self::Text(_) | Self::Json(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Raw(_) | Self::Json(_) => None,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) | Self::Text(_) => None,
        }
    }
}

impl ServerReply {
    /// Deserialize the captured body into a caller-supplied type, whatever
    /// the encoding was.
    pub fn json_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.body {
            ReplyBody::Json(value) => serde_json::from_value(value.clone()),
            ReplyBody::Text(text) => serde_json::from_str(text),
            ReplyBody::Raw(data) => serde_json::from_slice(data),
        }
    }
}

// -- Implementation details

/// Bare paths are rewritten to start at the server root.
pub(crate) fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Decode an accumulated response body per the configured encoding. A JSON
/// parse failure keeps the decoded text on the reply attached to the error.
pub(crate) fn decode_reply(
    status: StatusCode,
    headers: HeaderMap,
    data: Bytes,
    encoding: Encoding,
) -> Result<ServerReply, RequestError> {
    let body = match encoding {
        Encoding::Raw => ReplyBody::Raw(data),
        Encoding::Utf8 => ReplyBody::Text(String::from_utf8_lossy(&data).into_owned()),
        Encoding::Json => {
            let text = String::from_utf8_lossy(&data).into_owned();
            match serde_json::from_str(&text) {
                Ok(value) => ReplyBody::Json(value),
                Err(source) => {
                    return Err(RequestError::Decode {
                        source,
                        reply: ServerReply {
                            status,
                            headers,
                            body: ReplyBody::Text(text),
                        },
                    });
                }
            }
        }
    };

    Ok(ServerReply {
        status,
        headers,
        body,
    })
}
