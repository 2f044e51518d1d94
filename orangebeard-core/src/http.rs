//! HTTP transport used to talk to the Orangebeard listener.
//!
//! The [`Transport`] trait is the only thing the request executor needs: send
//! one request, get a status and a body back. [`HttpTransport`] is the
//! `reqwest` based implementation with bearer authentication against a base
//! endpoint; tests swap in scripted transports.
use http::{Method, StatusCode};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::time::Duration;
use tracing::*;

use crate::{masking, Error, Result};

/// Binary part of a multipart upload.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A `json` metadata part followed by an `attachment` file part.
#[derive(Debug, Clone)]
pub struct Multipart {
    pub json: String,
    pub file: FilePart,
}

#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    Multipart(Multipart),
}

impl Body {
    pub fn multipart(json: String, file: FilePart) -> Body {
        Body::Multipart(Multipart { json, file })
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path relative to the endpoint, e.g. `/listener/v3/demo/test/start`.
    pub path: String,
    pub body: Body,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>, body: Body) -> Request {
        Request {
            method,
            path: path.into(),
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub text: String,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Sends one request. Implementations report connection-level failures as
/// [`Error::Transient`] and leave status interpretation to the caller.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// Bearer-authenticated `reqwest` transport.
#[derive(Clone)]
pub struct HttpTransport {
    inner: reqwest::Client,
    endpoint: url::Url,
    auth: HeaderValue,
}

impl HttpTransport {
    /// `timeout` bounds every request from connect to the end of the body. A
    /// listener that stops answering is reported as [`Error::Transient`].
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<HttpTransport> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint \"{endpoint}\": {e}")))?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Config(format!("invalid access token: {e}")))?;
        auth.set_sensitive(true);

        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(HttpTransport {
            inner,
            endpoint,
            auth,
        })
    }

    fn url(&self, path: &str) -> Result<url::Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        url::Url::parse(&format!("{base}{path}"))
            .map_err(|e| Error::Config(format!("invalid request path \"{path}\": {e}")))
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let url = self.url(&request.path)?;
        let builder = self
            .inner
            .request(request.method.clone(), url)
            .header(AUTHORIZATION, self.auth.clone());
        let builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Multipart(Multipart { json, file }) => {
                let json = reqwest::multipart::Part::text(json)
                    .mime_str("application/json")
                    .map_err(|e| Error::Decode(e.to_string()))?;
                let attachment = reqwest::multipart::Part::bytes(file.content)
                    .file_name(file.name)
                    .mime_str(&file.content_type)
                    .map_err(|e| Error::Decode(e.to_string()))?;
                builder.multipart(
                    reqwest::multipart::Form::new()
                        .part("json", json)
                        .part("attachment", attachment),
                )
            }
        };

        let req = builder
            .build()
            .map_err(|e| Error::Decode(format!("failed to build request: {e}")))?;
        debug!(
            "{} {} headers={:?}",
            req.method(),
            req.url(),
            masking::mask_headers(req.headers())
        );

        let res = self.inner.execute(req).await.map_err(transport_error)?;
        let status = res.status();
        let text = res.text().await.map_err(transport_error)?;
        trace!("{} {} -> {status}", request.method, request.path);

        Ok(Response { status, text })
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Transient(format!("request timed out: {e}"))
    } else {
        Error::Transient(e.to_string())
    }
}
