use async_trait::async_trait;
use bytes::Bytes;
use http::{header::HOST, uri::Scheme, HeaderValue, Method, Request, Response, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
#[cfg(feature = "https")]
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{
        connect::{Connect, HttpConnector},
        Client as LegacyClient,
    },
    rt::TokioExecutor,
};
use std::fmt;
use thiserror::Error;

use crate::common::hooks::{self, ClientHooks};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot send request: {0}")]
    HyperError(#[from] hyper::Error),
    #[error("cannot send request: {0}")]
    HyperUtilError(#[from] hyper_util::client::legacy::Error),
    #[error("cannot resolve host: {0}")]
    IoError(#[from] std::io::Error),
    #[error("cannot resolve host: {0}")]
    ResolveError(String),
    #[error("request URI has no host: {0}")]
    MissingHost(String),
    #[error("invalid request URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    #[error("cannot build request: {0}")]
    HttpError(#[from] http::Error),
    #[cfg(feature = "https")]
    #[error("TLS error: {0}")]
    TlsError(String),
    #[error("TLS connection to {0} requested, but the `https` feature is disabled")]
    TlsUnsupported(String),
}

#[async_trait]
pub trait HttpClient {
    async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error>;
}

type Transport<C> = LegacyClient<C, Full<Bytes>>;

/// A minimal HTTP/1.1 client whose name resolution, TLS detection and request construction
/// go through [ClientHooks].
///
/// By default the process-wide hooks are used, so while a mock session is running every
/// request sent by this client lands on the mock server. Code under test should send its
/// requests through this client to be intercepted.
///
/// ```no_run
/// # async fn run() -> Result<(), respmock::ClientError> {
/// let client = respmock::Client::new();
/// let response = client.get("https://example.com/ping").await?;
/// assert_eq!(response.status(), 200);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    hooks: Option<ClientHooks>,
    plain: Transport<HttpConnector>,
    #[cfg(feature = "https")]
    secure: Result<Transport<HttpsConnector<HttpConnector>>, String>,
}

impl Client {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A client pinned to `hooks`. It ignores whatever is installed process-wide.
    pub fn with_hooks(hooks: ClientHooks) -> Self {
        Self::build(Some(hooks))
    }

    fn build(hooks: Option<ClientHooks>) -> Self {
        Self {
            hooks,
            plain: transport(HttpConnector::new()),
            #[cfg(feature = "https")]
            secure: secure_transport(),
        }
    }

    fn hooks(&self) -> ClientHooks {
        self.hooks.clone().unwrap_or_else(hooks::current)
    }

    pub async fn get(&self, url: &str) -> Result<Response<Bytes>, Error> {
        self.request(Method::GET, url, Bytes::new()).await
    }

    pub async fn request<B: Into<Bytes>>(
        &self,
        method: Method,
        url: &str,
        body: B,
    ) -> Result<Response<Bytes>, Error> {
        let req = Request::builder()
            .method(method)
            .uri(url)
            .body(body.into())?;
        self.send(req).await
    }

    #[cfg(feature = "https")]
    async fn send_tls(&self, req: Request<Full<Bytes>>) -> Result<Response<Incoming>, Error> {
        match &self.secure {
            Ok(secure) => Ok(secure.request(req).await?),
            Err(err) => Err(Error::TlsError(err.clone())),
        }
    }

    #[cfg(not(feature = "https"))]
    async fn send_tls(&self, req: Request<Full<Bytes>>) -> Result<Response<Incoming>, Error> {
        let host = req.uri().host().unwrap_or_default().to_string();
        Err(Error::TlsUnsupported(host))
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("hooks", &self.hooks).finish()
    }
}

#[async_trait]
impl HttpClient for Client {
    async fn send(&self, mut req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let hooks = self.hooks();
        hooks.prepare(&mut req);

        let (mut parts, body) = req.into_parts();
        let authority = parts
            .uri
            .authority()
            .cloned()
            .ok_or_else(|| Error::MissingHost(parts.uri.to_string()))?;
        let port = authority
            .port_u16()
            .unwrap_or_else(|| default_port(&parts.uri));
        let tls = hooks.is_tls(&parts.uri);

        if !parts.headers.contains_key(HOST) {
            parts
                .headers
                .insert(HOST, HeaderValue::from_str(authority.as_str())?);
        }

        // An overridden resolver pins the connection to the address it returns. The Host
        // header keeps the original authority.
        let target = if hooks.overrides_resolution() {
            let addrs = hooks.resolve(authority.host(), port).await?;
            match addrs.first() {
                Some(addr) => addr.to_string(),
                None => return Err(Error::ResolveError(authority.host().to_string())),
            }
        } else {
            format!("{}:{}", authority.host(), port)
        };

        parts.uri = target_uri(tls, &target, &parts.uri)?;

        tracing::trace!(
            "sending {} {} (host={:?}, tls={})",
            parts.method,
            parts.uri,
            parts.headers.get(HOST),
            tls
        );

        let req = Request::from_parts(parts, Full::new(body));
        let res = if tls {
            self.send_tls(req).await?
        } else {
            self.plain.request(req).await?
        };

        let (parts, body) = res.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(Response::from_parts(parts, body))
    }
}

// Connections are not pooled, so none outlives the mock server it was opened to.
fn transport<C>(connector: C) -> Transport<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    LegacyClient::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .build(connector)
}

#[cfg(feature = "https")]
fn secure_transport() -> Result<Transport<HttpsConnector<HttpConnector>>, String> {
    // see https://github.com/rustls/rustls/issues/1938
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|err| format!("cannot load native root certificates: {}", err))?
        .https_only()
        .enable_http1()
        .build();

    Ok(transport(connector))
}

fn default_port(uri: &Uri) -> u16 {
    if uri.scheme() == Some(&Scheme::HTTPS) {
        443
    } else {
        80
    }
}

/// The absolute URI actually dialled: `target` (`host:port`) with the scheme chosen by TLS
/// detection and the path and query of `uri`.
fn target_uri(tls: bool, target: &str, uri: &Uri) -> Result<Uri, Error> {
    let scheme = if tls { "https" } else { "http" };
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Ok(format!("{}://{}{}", scheme, target, path_and_query).parse()?)
}
