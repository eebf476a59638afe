use crate::common::{
    data::{MockRequest, MockResponse},
    hooks::{ClientHooks, TLS_MARKER_HEADER},
    http::{Client, Error, HttpClient},
    util::contains_ignore_case,
};
use http::{header::HOST, Request, Uri};

/// Forwards requests to their real destination.
///
/// The client used here is pinned to the hooks that were active before the session started,
/// so the real call resolves and negotiates TLS normally while every other request keeps
/// going to the mock server.
pub(crate) struct Passthrough {
    client: Box<dyn HttpClient + Send + Sync>,
    allowed_headers: Vec<String>,
}

impl Passthrough {
    pub(crate) fn new(original_hooks: ClientHooks, allowed_headers: Vec<String>) -> Self {
        Self::with_client(Box::new(Client::with_hooks(original_hooks)), allowed_headers)
    }

    pub(crate) fn with_client(
        client: Box<dyn HttpClient + Send + Sync>,
        allowed_headers: Vec<String>,
    ) -> Self {
        Self {
            client,
            allowed_headers,
        }
    }

    pub(crate) async fn forward(&self, req: MockRequest) -> Result<MockResponse, Error> {
        let authority = req
            .authority()
            .ok_or_else(|| Error::MissingHost(req.path_qs()))?;
        let uri: Uri = format!("{}://{}{}", req.scheme(), authority, req.path_qs()).parse()?;

        tracing::warn!("Passing {} {} through to the real network", req.method(), uri);

        let mut builder = Request::builder().method(req.method().clone()).uri(uri);
        for (name, value) in req.headers() {
            if name.as_str() == TLS_MARKER_HEADER || *name == HOST {
                continue;
            }
            builder = builder.header(name, value);
        }
        let outbound = builder.body(req.body().clone())?;

        let res = self.client.send(outbound).await?;
        let (parts, body) = res.into_parts();

        let mut response = MockResponse::new().status(parts.status.as_u16()).body(body);
        for (name, value) in parts.headers.iter() {
            if !contains_ignore_case(&self.allowed_headers, name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                response = response.header(name.as_str(), value);
            }
        }

        Ok(response)
    }
}
