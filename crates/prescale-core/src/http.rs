//! Minimal HTTP/1 client shared by the backend integrations.
//!
//! Wraps a pooled hyper client with a per-request timeout and a JSON
//! helper. Only plain `http://` endpoints are supported; the Kubernetes API
//! goes through `kube` instead.

use std::time::Duration;

use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = concat!("prescale/", env!("CARGO_PKG_VERSION"));

/// Longest error-body excerpt kept in [`HttpError::Status`].
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid request to {uri}: {reason}")]
    InvalidRequest { uri: String, reason: String },

    #[error("request to {uri} failed: {reason}")]
    Transport { uri: String, reason: String },

    #[error("{uri} returned {status}: {body}")]
    Status {
        uri: String,
        status: StatusCode,
        body: String,
    },

    #[error("request to {uri} timed out after {after:?}")]
    Timeout { uri: String, after: Duration },

    #[error("failed to decode response from {uri}: {reason}")]
    Decode { uri: String, reason: String },
}

/// Append url-encoded query parameters to `base`.
pub fn with_query(base: &str, params: &[(&str, &str)]) -> Result<String, HttpError> {
    let query = serde_urlencoded::to_string(params).map_err(|e| HttpError::InvalidRequest {
        uri: base.to_string(),
        reason: e.to_string(),
    })?;
    if query.is_empty() {
        return Ok(base.to_string());
    }
    Ok(format!("{base}?{query}"))
}

/// Cloneable HTTP client. Clones share one connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HttpClient {
    /// Create a client whose requests fail after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `GET` a URI and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, uri: &str) -> Result<T, HttpError> {
        let body = self.send(Method::GET, uri, None, Bytes::new()).await?;
        decode(uri, &body)
    }

    /// Send a raw request and return the response body on 2xx.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<Bytes, HttpError> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/json");
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let request = builder
            .body(Full::new(body))
            .map_err(|e| HttpError::InvalidRequest {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        debug!(%method, %uri, "http request");

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| HttpError::Transport {
                    uri: uri.to_string(),
                    reason: e.to_string(),
                })?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| HttpError::Transport {
                    uri: uri.to_string(),
                    reason: e.to_string(),
                })?
                .to_bytes();

            if !status.is_success() {
                let excerpt = &body[..body.len().min(ERROR_BODY_LIMIT)];
                return Err(HttpError::Status {
                    uri: uri.to_string(),
                    status,
                    body: String::from_utf8_lossy(excerpt).into_owned(),
                });
            }
            Ok(body)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::Timeout {
                uri: uri.to_string(),
                after: self.timeout,
            }),
        }
    }
}

fn decode<T: DeserializeOwned>(uri: &str, body: &[u8]) -> Result<T, HttpError> {
    serde_json::from_slice(body).map_err(|e| HttpError::Decode {
        uri: uri.to_string(),
        reason: e.to_string(),
    })
}
