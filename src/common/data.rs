use crate::common::{
    data::Error::{JsonConversionError, RequestConversionError},
    hooks::TLS_MARKER_HEADER,
};
use async_trait::async_trait;
use bytes::Bytes;
use http::{uri::Authority, HeaderMap, Method, Uri, Version};
use serde::Serialize;
use std::{fmt, future::Future, marker::PhantomData, sync::Arc};
use url::Url;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot convert request: {0}")]
    RequestConversionError(String),
    #[error("cannot serialize JSON body: {0}")]
    JsonConversionError(#[from] serde_json::Error),
}

// ===============================================================================================
// Patterns
// ===============================================================================================

/// Anything that can decide whether a concrete host, path or method value is acceptable.
///
/// Implemented for [regex::Regex] (search semantics, anchor the expression to get a full
/// match) and for closures registered through [Pattern::matching].
pub trait PatternMatcher: Send + Sync {
    fn matches(&self, value: &str) -> bool;
}

struct FnMatcher<F>(F);

impl<F> PatternMatcher for FnMatcher<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, value: &str) -> bool {
        (self.0)(value)
    }
}

/// A registered host, path or method pattern.
#[derive(Clone)]
pub enum Pattern {
    /// Matches every value.
    Any,
    /// Matches a value that is equal to the contained string.
    Exact(String),
    /// Delegates to a custom matcher.
    Custom(Arc<dyn PatternMatcher>),
}

/// The wildcard sentinel. Usable in place of any host, path or method pattern.
pub const ANY: Pattern = Pattern::Any;

impl Pattern {
    /// Creates a pattern from a predicate.
    ///
    /// ```
    /// use respmock::Pattern;
    ///
    /// let api_paths = Pattern::matching(|path| path.starts_with("/api/"));
    /// ```
    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Pattern::Custom(Arc::new(FnMatcher(predicate)))
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str("ANY"),
            Pattern::Exact(value) => write!(f, "{:?}", value),
            Pattern::Custom(_) => f.write_str("<custom matcher>"),
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Pattern::Any, Pattern::Any) => true,
            (Pattern::Exact(a), Pattern::Exact(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Pattern {
    fn from(value: &str) -> Self {
        Pattern::Exact(value.to_string())
    }
}

impl From<String> for Pattern {
    fn from(value: String) -> Self {
        Pattern::Exact(value)
    }
}

impl From<&String> for Pattern {
    fn from(value: &String) -> Self {
        Pattern::Exact(value.clone())
    }
}

impl From<regex::Regex> for Pattern {
    fn from(value: regex::Regex) -> Self {
        Pattern::Custom(Arc::new(value))
    }
}

// ===============================================================================================
// Request
// ===============================================================================================

/// An HTTP request received by the mock server.
#[derive(Debug, Clone)]
pub struct MockRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl MockRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn method_str(&self) -> &str {
        self.method.as_str()
    }

    /// The request target as it was received. For HTTP/1.1 this is usually origin-form
    /// (path and query only); use [MockRequest::host] or [MockRequest::url] for the rest.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The `Host` header value verbatim (including a port, if one was sent), falling back to
    /// the authority of an absolute-form request target.
    pub fn authority(&self) -> Option<&str> {
        self.headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
    }

    /// The host the request was sent to, without a port.
    pub fn host(&self) -> Option<String> {
        let authority = self.authority()?;
        match authority.parse::<Authority>() {
            Ok(parsed) => Some(parsed.host().to_string()),
            Err(_) => Some(authority.to_string()),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Path and query string, e.g. `/search?q=rust`. Equal to [MockRequest::path] when the
    /// request has no query string.
    pub fn path_qs(&self) -> String {
        match self.uri.query() {
            Some(query) => format!("{}?{}", self.uri.path(), query),
            None => self.uri.path().to_string(),
        }
    }

    pub fn query_params(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.uri.query().unwrap_or("").as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Whether the client meant to talk TLS to the original destination. The mock server
    /// always receives plain text, this is read from the marker header the client stamps on
    /// every request while a session is active.
    pub fn is_tls_intended(&self) -> bool {
        self.headers
            .get(TLS_MARKER_HEADER)
            .map(|v| v.as_bytes() == b"1")
            .unwrap_or(false)
    }

    pub fn scheme(&self) -> &'static str {
        if self.is_tls_intended() {
            "https"
        } else {
            "http"
        }
    }

    /// The absolute URL of the original request.
    pub fn url(&self) -> Result<Url, Error> {
        let authority = self
            .authority()
            .ok_or_else(|| RequestConversionError("request has no host".to_string()))?;

        let url = format!("{}://{}{}", self.scheme(), authority, self.path_qs());
        Url::parse(&url).map_err(|err| RequestConversionError(err.to_string()))
    }
}

impl From<http::Request<Bytes>> for MockRequest {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }
}

// ===============================================================================================
// Response
// ===============================================================================================

/// A fully described HTTP response returned by the mock server.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }
}

impl MockResponse {
    /// An empty `200 OK` response.
    pub fn new() -> Self {
        Self::default()
    }

    /// A `200 OK` response with a text body.
    pub fn text<S: Into<String>>(body: S) -> Self {
        Self::new()
            .header("content-type", "text/plain; charset=utf-8")
            .body(body.into())
    }

    /// A `200 OK` response with a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, Error> {
        let body = serde_json::to_vec(value).map_err(JsonConversionError)?;
        Ok(Self::new()
            .header("content-type", "application/json")
            .body(body))
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the first header value with the given (case-insensitive) name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn into_http(self) -> Result<http::Response<Bytes>, http::Error> {
        let mut builder = http::Response::builder().status(self.status);
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        builder.body(self.body)
    }
}

impl From<&str> for MockResponse {
    fn from(body: &str) -> Self {
        MockResponse::text(body)
    }
}

impl From<String> for MockResponse {
    fn from(body: String) -> Self {
        MockResponse::text(body)
    }
}

// ===============================================================================================
// Response producers
// ===============================================================================================

/// Produces a response for a matched request.
#[async_trait]
pub trait Respond: Send + Sync {
    async fn respond(&self, req: MockRequest) -> Result<MockResponse, BoxError>;
}

struct FnResponder<F, R> {
    f: F,
    _r: PhantomData<fn() -> R>,
}

#[async_trait]
impl<F, R> Respond for FnResponder<F, R>
where
    F: Fn(&MockRequest) -> R + Send + Sync,
    R: Into<MockResponse>,
{
    async fn respond(&self, req: MockRequest) -> Result<MockResponse, BoxError> {
        Ok((self.f)(&req).into())
    }
}

struct TryFnResponder<F, R, E> {
    f: F,
    _r: PhantomData<fn() -> (R, E)>,
}

#[async_trait]
impl<F, R, E> Respond for TryFnResponder<F, R, E>
where
    F: Fn(&MockRequest) -> Result<R, E> + Send + Sync,
    R: Into<MockResponse>,
    E: Into<BoxError>,
{
    async fn respond(&self, req: MockRequest) -> Result<MockResponse, BoxError> {
        (self.f)(&req).map(Into::into).map_err(Into::into)
    }
}

struct AsyncFnResponder<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut, R> Respond for AsyncFnResponder<F, Fut>
where
    F: Fn(MockRequest) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send,
    R: Into<MockResponse>,
{
    async fn respond(&self, req: MockRequest) -> Result<MockResponse, BoxError> {
        Ok((self.f)(req).await.into())
    }
}

/// What the mock server answers with once an expectation matched.
#[derive(Clone)]
pub enum ResponseSource {
    /// A `200 OK` response with this body.
    Body(String),
    /// This exact response.
    Response(MockResponse),
    /// The response computed by a producer.
    Producer(Arc<dyn Respond>),
    /// Forward the request to the real network and relay the answer.
    Passthrough,
    /// Bytes written to the connection verbatim, status line and headers included. The
    /// connection is closed afterwards. Useful for mocking malformed responses.
    Raw(Bytes),
}

/// Marks a response whose wire bytes are replaced by the contained raw bytes.
#[derive(Debug, Clone)]
pub(crate) struct RawResponse(pub(crate) Bytes);

/// Forwards a matched request to its real destination. See [ResponseSource::Passthrough].
pub const PASSTHROUGH: ResponseSource = ResponseSource::Passthrough;

impl ResponseSource {
    pub fn from_fn<F, R>(f: F) -> Self
    where
        F: Fn(&MockRequest) -> R + Send + Sync + 'static,
        R: Into<MockResponse> + 'static,
    {
        Self::producer(FnResponder { f, _r: PhantomData })
    }

    pub fn try_from_fn<F, R, E>(f: F) -> Self
    where
        F: Fn(&MockRequest) -> Result<R, E> + Send + Sync + 'static,
        R: Into<MockResponse> + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::producer(TryFnResponder { f, _r: PhantomData })
    }

    /// ```
    /// use respmock::{MockResponse, ResponseSource};
    ///
    /// let slow = ResponseSource::from_async_fn(|req| async move {
    ///     MockResponse::text(req.path().to_string()).status(202)
    /// });
    /// ```
    pub fn from_async_fn<F, Fut, R>(f: F) -> Self
    where
        F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Into<MockResponse> + 'static,
    {
        Self::producer(AsyncFnResponder {
            f,
            _fut: PhantomData,
        })
    }

    pub fn producer<P: Respond + 'static>(producer: P) -> Self {
        ResponseSource::Producer(Arc::new(producer))
    }

    /// ```
    /// use respmock::ResponseSource;
    ///
    /// let truncated = ResponseSource::raw("HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\nshort");
    /// ```
    pub fn raw<B: Into<Bytes>>(bytes: B) -> Self {
        ResponseSource::Raw(bytes.into())
    }
}

impl Default for ResponseSource {
    fn default() -> Self {
        ResponseSource::Body(String::new())
    }
}

impl fmt::Debug for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSource::Body(body) => f.debug_tuple("Body").field(body).finish(),
            ResponseSource::Response(res) => f.debug_tuple("Response").field(res).finish(),
            ResponseSource::Producer(_) => f.write_str("Producer"),
            ResponseSource::Passthrough => f.write_str("Passthrough"),
            ResponseSource::Raw(bytes) => f.debug_tuple("Raw").field(bytes).finish(),
        }
    }
}

impl From<&str> for ResponseSource {
    fn from(body: &str) -> Self {
        ResponseSource::Body(body.to_string())
    }
}

impl From<String> for ResponseSource {
    fn from(body: String) -> Self {
        ResponseSource::Body(body)
    }
}

impl From<MockResponse> for ResponseSource {
    fn from(res: MockResponse) -> Self {
        ResponseSource::Response(res)
    }
}

// ===============================================================================================
// Expectation
// ===============================================================================================

/// A registered rule that answers at most one matching request.
#[derive(Debug, Clone)]
pub struct Expectation {
    pub(crate) host: Pattern,
    pub(crate) path: Pattern,
    pub(crate) method: Pattern,
    pub(crate) response: ResponseSource,
    pub(crate) match_querystring: bool,
}

impl Expectation {
    /// An expectation for `host` that accepts any path and method and answers with an empty
    /// `200 OK` response.
    pub fn new<P: Into<Pattern>>(host: P) -> Self {
        Self {
            host: host.into(),
            path: ANY,
            method: ANY,
            response: ResponseSource::default(),
            match_querystring: false,
        }
    }

    pub fn path<P: Into<Pattern>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    pub fn method<P: Into<Pattern>>(mut self, method: P) -> Self {
        self.method = method.into();
        self
    }

    pub fn respond_with<R: Into<ResponseSource>>(mut self, response: R) -> Self {
        self.response = response.into();
        self
    }

    /// When set, the path pattern is matched against path and query string instead of the
    /// path alone.
    pub fn match_querystring(mut self, enabled: bool) -> Self {
        self.match_querystring = enabled;
        self
    }
}

// ===============================================================================================
// Errors
// ===============================================================================================

/// Raised when a request matches none of the remaining expectations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("No match found for {host} {path} {method}. Host match: {host_matched}  Path match: {path_matched}")]
pub struct NoMatch {
    pub host: String,
    pub path: String,
    pub method: String,
    pub host_matched: bool,
    pub path_matched: bool,
}
