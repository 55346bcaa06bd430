//! Reqwest-based implementation of the `HttpTransport` trait.
//!
//! Thin adapter around `reqwest::Client` that converts between the
//! orchestrator's request/response shapes and the concrete client.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};
use reqwest::{Client, Response};
use thiserror::Error;
use url::Url;

use crate::modules::resolver::{ActiveResolver, http_client_for};

/// Read limit for captured subresource bodies.
pub const MAX_BODY_BYTES: u64 = 1_000_000;

/// Read limit for captured page bodies.
pub const MAX_DOCUMENT_BYTES: u64 = 8 * 1024 * 1024;

/// One outbound request as built by the orchestrator.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Whether the caller needs the response body.
    pub capture_body: bool,
    /// Captured bodies longer than this are dropped, unread past the limit.
    pub body_limit: u64,
}

/// Response as seen by the orchestrator.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: Url,
    pub remote_addr: Option<SocketAddr>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub body: Option<Bytes>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Per-request failure. Never retried, never propagated past the orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server answered http {0}")]
    Status(u16),
    #[error("no transport bound")]
    NotBound,
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RequestError::Timeout
        } else {
            RequestError::Transport(err.to_string())
        }
    }
}

/// Sends requests on behalf of the orchestrator.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, RequestError>;
}

/// Reqwest-backed transport bound to one resolution channel.
pub struct ReqwestTransport {
    client: Client,
    resolver: ActiveResolver,
}

impl ReqwestTransport {
    pub fn new(resolver: ActiveResolver, timeout: Duration) -> Result<Self, RequestError> {
        let client = http_client_for(&resolver, timeout)?;
        Ok(Self { client, resolver })
    }

    /// Wrap an existing client. Its resolver is reported as the system one.
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            resolver: ActiveResolver::System,
        }
    }

    pub fn resolver(&self) -> &ActiveResolver {
        &self.resolver
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, RequestError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().clone();
        let remote_addr = response.remote_addr();
        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = if request.capture_body {
            read_capped(&mut response, request.body_limit).await?
        } else {
            None
        };

        Ok(TransportResponse {
            status,
            url,
            remote_addr,
            content_length,
            content_type,
            body,
        })
    }
}

/// Streams the body until it ends or grows past `limit`. Oversized bodies
/// yield `None`.
async fn read_capped(response: &mut Response, limit: u64) -> Result<Option<Bytes>, RequestError> {
    if response.content_length().is_some_and(|len| len > limit) {
        log::trace!("{} advertises more than {limit} bytes; body skipped", response.url());
        return Ok(None);
    }
    let mut buffer = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        if (buffer.len() + chunk.len()) as u64 > limit {
            log::trace!("{} exceeded {limit} bytes; body dropped", response.url());
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Some(buffer.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one chunked response with no content-length and closes.
    async fn serve_chunked(chunks: Vec<String>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            let mut reply = String::from(
                "HTTP/1.1 200 OK\r\ncontent-type: text/css; charset=utf-8\r\n\
                 transfer-encoding: chunked\r\nconnection: close\r\n\r\n",
            );
            for chunk in chunks {
                reply.push_str(&format!("{:x}\r\n{chunk}\r\n", chunk.len()));
            }
            reply.push_str("0\r\n\r\n");
            let _ = socket.write_all(reply.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        Url::parse(&format!("http://{addr}/theme")).unwrap()
    }

    fn transport() -> ReqwestTransport {
        ReqwestTransport::from_client(Client::builder().no_proxy().build().unwrap())
    }

    fn capture(url: Url, body_limit: u64) -> OutboundRequest {
        OutboundRequest {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
            capture_body: true,
            body_limit,
        }
    }

    #[tokio::test]
    async fn unannounced_oversized_body_is_dropped() {
        let url = serve_chunked(vec!["a".repeat(40), "b".repeat(40)]).await;
        let response = transport().send(capture(url, 64)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_length, None);
        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn chunked_body_within_limit_is_kept() {
        let url = serve_chunked(vec!["@import \"a.css\";".into(), " body{}".into()]).await;
        let response = transport().send(capture(url, 64)).await.unwrap();
        assert_eq!(response.body.as_deref(), Some(&b"@import \"a.css\"; body{}"[..]));
        assert_eq!(response.content_type.as_deref(), Some("text/css; charset=utf-8"));
    }
}
