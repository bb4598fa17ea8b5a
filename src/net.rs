//! HTTP plumbing: site addressing, request shaping and the hyper transport

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::io;
use url::{Host, Url};

use crate::error::PagesError;
use crate::tar_stream::ArchiveStream;

pub const UNRESOLVED_CONTENT_TYPE: &str = "application/vnd.git-pages.unresolved";
pub const ACCEPT_UNRESOLVED: &str = "application/vnd.git-pages.unresolved;q=1.0, text/plain;q=0.9";

pub const CREATE_PARENTS: HeaderName = HeaderName::from_static("create-parents");
pub const ATOMIC: HeaderName = HeaderName::from_static("atomic");
// Deprecated spelling of `Atomic`, still read by older servers
pub const RACE_FREE: HeaderName = HeaderName::from_static("race-free");
pub const FORGE_AUTHORIZATION: HeaderName = HeaderName::from_static("forge-authorization");
pub const UPDATE_RESULT: HeaderName = HeaderName::from_static("update-result");

pub fn version_info() -> String {
    format!("git-pages-cli {}", env!("CARGO_PKG_VERSION"))
}

pub fn yes_no(flag: bool) -> HeaderValue {
    HeaderValue::from_static(if flag { "yes" } else { "no" })
}

/// Credentials presented to the pages server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// Shared password set up through the DNS challenge
    Password(String),
    /// Token checked against the forge hosting the site's repository
    Token(String),
}

/// Where requests for a site go
#[derive(Debug, Clone)]
pub struct SiteTarget {
    pub url: Url,
    /// Connect here instead of the site host; `Host:` still names the site
    pub server: Option<String>,
    pub auth: Option<Auth>,
}

impl SiteTarget {
    pub fn parse(site: &str) -> Result<Self, PagesError> {
        let url = Url::parse(site).map_err(|e| PagesError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PagesError::InvalidUrl(format!(
                "{} is not an http:// or https:// URL",
                site
            )));
        }
        if url.host_str().is_none() {
            return Err(PagesError::InvalidUrl(format!("{} has no host", site)));
        }
        Ok(SiteTarget {
            url,
            server: None,
            auth: None,
        })
    }

    /// Bare host name of the site, without brackets or port
    pub fn hostname(&self) -> String {
        match self.url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => String::new(),
        }
    }

    /// `host[:port]` as it should appear in the Host header
    fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Start a request for `url` carrying the identity and auth headers
    pub fn request_to(&self, method: Method, url: &Url) -> Result<Request> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&version_info())?);
        match &self.auth {
            Some(Auth::Password(password)) => {
                let value = HeaderValue::from_str(&format!("Pages {}", password))
                    .context("password contains characters not allowed in a header")?;
                headers.insert(header::AUTHORIZATION, value);
            }
            Some(Auth::Token(token)) => {
                let value = HeaderValue::from_str(&format!("token {}", token))
                    .context("token contains characters not allowed in a header")?;
                headers.insert(FORGE_AUTHORIZATION, value);
            }
            None => {}
        }

        let mut url = url.clone();
        if let Some(server) = &self.server {
            // The server may not have a certificate for the site yet, so the
            // connection goes to `server` and only the Host header names the site.
            let authority = Url::parse(&format!("{}://{}/", url.scheme(), server))
                .map_err(|e| PagesError::InvalidUrl(format!("--server {}: {}", server, e)))?;
            url.set_host(authority.host_str())
                .map_err(|e| PagesError::InvalidUrl(e.to_string()))?;
            url.set_port(authority.port())
                .map_err(|_| PagesError::InvalidUrl(format!("cannot set port from {}", server)))?;
            headers.insert(header::HOST, HeaderValue::from_str(&self.authority())?);
        }

        Ok(Request { method, url, headers })
    }

    pub fn request(&self, method: Method) -> Result<Request> {
        self.request_to(method, &self.url)
    }

    /// Location of the site manifest exposed for debugging
    pub fn manifest_url(&self) -> Result<Url> {
        self.url
            .join(".git-pages/manifest.json")
            .context("failed to build manifest URL")
    }
}

/// Method, URL and headers of one logical request; reused across rounds
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    Archive(ArchiveStream),
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Media type without parameters
    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE)
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
    }

    /// 422 with the unresolved-blobs media type: the server wants more content
    pub fn is_unresolved(&self) -> bool {
        self.status == StatusCode::UNPROCESSABLE_ENTITY
            && self
                .content_type()
                .is_some_and(|ct| ct.eq_ignore_ascii_case(UNRESOLVED_CONTENT_TYPE))
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Executes a single request and returns the buffered response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request, body: RequestBody) -> Result<Response>;
}

type OutgoingBody = UnsyncBoxBody<Bytes, io::Error>;

/// HTTP and HTTPS transport on the tokio runtime; TLS via rustls with webpki roots
pub struct HttpTransport {
    client: Client<HttpsConnector<HttpConnector>, OutgoingBody>,
}

impl HttpTransport {
    pub fn new() -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        HttpTransport {
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn outgoing_body(body: RequestBody) -> OutgoingBody {
    match body {
        RequestBody::Empty => Empty::<Bytes>::new()
            .map_err(|never| match never {})
            .boxed_unsync(),
        RequestBody::Bytes(bytes) => Full::new(bytes)
            .map_err(|never| match never {})
            .boxed_unsync(),
        // No size hint, so hyper sends it chunked without Content-Length
        RequestBody::Archive(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request, body: RequestBody) -> Result<Response> {
        let uri: Uri = request
            .url
            .as_str()
            .parse()
            .with_context(|| format!("invalid request URI {}", request.url))?;

        let mut builder = hyper::Request::builder().method(request.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers.clone());
        }
        let outgoing = builder
            .body(outgoing_body(body))
            .context("failed to build request")?;

        let response = self
            .client
            .request(outgoing)
            .await
            .with_context(|| format!("{} {} failed", request.method, request.url))?;
        let (parts, incoming) = response.into_parts();
        let body = incoming
            .collect()
            .await
            .context("failed to read response body")?
            .to_bytes();

        Ok(Response {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
