// src/proxy/forward.rs
//
// Upstream forwarding. The dispatcher only sees success (any HTTP response)
// or a transport error; everything on the wire lives here.

use async_trait::async_trait;
use hyper::body::{Bytes, HttpBody};
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use hyper::{Body, Client, Method, Request, Response, Uri};
use hyper_tls::HttpsConnector;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),

    #[error("transport error: {0}")]
    Transport(#[from] hyper::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

/// Why an inbound body could not be buffered.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Read(#[from] hyper::Error),
}

/// An inbound request buffered so it can be replayed on every attempt.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_addr: Option<SocketAddr>,
}

impl ForwardRequest {
    /// Buffers `req`, refusing bodies larger than `max_body_bytes`. A declared
    /// `Content-Length` over the limit is rejected before anything is read;
    /// otherwise collection stops at the first chunk that crosses it.
    pub async fn from_hyper(
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
        max_body_bytes: usize,
    ) -> Result<Self, BodyError> {
        let (parts, mut body) = req.into_parts();
        let too_large = BodyError::TooLarge {
            limit: max_body_bytes,
        };

        let declared = declared_length(&parts.headers);
        if matches!(declared, Some(len) if len > max_body_bytes as u64) {
            return Err(too_large);
        }

        let mut buf = Vec::new();
        while let Some(chunk) = body.data().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > max_body_bytes {
                return Err(too_large);
            }
            buf.extend_from_slice(&chunk);
        }
        let body = Bytes::from(buf);
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
            client_addr,
        })
    }

    /// Builds the upstream request for `target`, rewriting the host.
    pub fn to_upstream(&self, target: &Url) -> Result<Request<Body>, ForwardError> {
        let authority = authority(target)?;
        let uri: Uri = format!("{}://{}{}", target.scheme(), authority, self.path_and_query)
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ForwardError::InvalidTarget(e.to_string()))?;

        let mut headers = self.headers.clone();
        for name in HOP_BY_HOP {
            headers.remove(name);
        }
        let host = HeaderValue::from_str(&authority)
            .map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;
        headers.insert(HOST, host);

        if let Some(client) = self.client_addr {
            let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{}, {}", prior, client.ip()),
                None => client.ip().to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
            }
        }

        let mut req = Request::new(Body::from(self.body.clone()));
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = uri;
        *req.headers_mut() = headers;
        Ok(req)
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// `host[:port]` of a backend url.
fn authority(url: &Url) -> Result<String, ForwardError> {
    let host = url
        .host_str()
        .ok_or_else(|| ForwardError::InvalidTarget(format!("{} has no host", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Relays a request to one upstream address.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        req: &ForwardRequest,
        target: &Url,
    ) -> Result<Response<Body>, ForwardError>;
}

/// Shared hyper client used by every backend.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder().build::<_, Body>(HttpsConnector::new());
        Self { client, timeout }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        req: &ForwardRequest,
        target: &Url,
    ) -> Result<Response<Body>, ForwardError> {
        let upstream = req.to_upstream(target)?;
        match tokio::time::timeout(self.timeout, self.client.request(upstream)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ForwardError::Timeout(self.timeout)),
        }
    }
}
