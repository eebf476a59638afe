//! Process-wide hooks consulted by every [Client](crate::Client) request.
//!
//! A running mock session replaces the default hooks so that all hostnames resolve to the
//! local mock server, no connection is wrapped in TLS, and each request carries a marker
//! header recording whether it was originally meant to use TLS. The previous hooks are kept
//! in a [HooksSnapshot] and put back when the session ends.
//!
//! Only one set of hooks is active at a time. Overlapping sessions would overwrite each
//! other, which is why sessions serialise on a global lock.

use bytes::Bytes;
use http::{uri::Scheme, HeaderValue, Request, Uri};
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::{Arc, PoisonError, RwLock},
};

/// Carries the original TLS intent of a request across the forced-plaintext connection.
pub const TLS_MARKER_HEADER: &str = "x-respmock-is-tls";

pub type Resolve = Arc<dyn Fn(&str, u16) -> Vec<SocketAddr> + Send + Sync>;
pub type TlsDetect = Arc<dyn Fn(&Uri) -> bool + Send + Sync>;
pub type OnRequest = Arc<dyn Fn(&mut Request<Bytes>) + Send + Sync>;

/// Overrides for name resolution, TLS detection and request construction. An unset hook
/// means the default behaviour.
#[derive(Clone, Default)]
pub struct ClientHooks {
    resolve: Option<Resolve>,
    tls_detect: Option<TlsDetect>,
    on_request: Option<OnRequest>,
}

impl ClientHooks {
    /// DNS resolution, TLS for `https` URIs, no request rewriting.
    pub const fn real() -> Self {
        Self {
            resolve: None,
            tls_detect: None,
            on_request: None,
        }
    }

    pub fn resolve_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u16) -> Vec<SocketAddr> + Send + Sync + 'static,
    {
        self.resolve = Some(Arc::new(f));
        self
    }

    pub fn detect_tls_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Uri) -> bool + Send + Sync + 'static,
    {
        self.tls_detect = Some(Arc::new(f));
        self
    }

    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Request<Bytes>) + Send + Sync + 'static,
    {
        self.on_request = Some(Arc::new(f));
        self
    }

    /// Resolves `host`, which may be a bracketed IPv6 literal as returned by [Uri::host].
    pub(crate) async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        match &self.resolve {
            Some(resolve) => Ok(resolve(host, port)),
            None => match host.parse::<IpAddr>() {
                Ok(ip) => Ok(vec![SocketAddr::new(ip, port)]),
                Err(_) => Ok(tokio::net::lookup_host((host, port)).await?.collect()),
            },
        }
    }

    pub(crate) fn overrides_resolution(&self) -> bool {
        self.resolve.is_some()
    }

    pub(crate) fn is_tls(&self, uri: &Uri) -> bool {
        match &self.tls_detect {
            Some(detect) => detect(uri),
            None => default_tls_detect(uri),
        }
    }

    pub(crate) fn prepare(&self, req: &mut Request<Bytes>) {
        if let Some(on_request) = &self.on_request {
            on_request(req);
        }
    }
}

impl fmt::Debug for ClientHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHooks")
            .field("resolve", &self.resolve.is_some())
            .field("tls_detect", &self.tls_detect.is_some())
            .field("on_request", &self.on_request.is_some())
            .finish()
    }
}

pub fn default_tls_detect(uri: &Uri) -> bool {
    uri.scheme() == Some(&Scheme::HTTPS)
}

static HOOKS: RwLock<ClientHooks> = RwLock::new(ClientHooks::real());

/// The hooks that were active before an [install]. Opaque on purpose: it can only be
/// handed back to [restore].
#[derive(Debug)]
pub struct HooksSnapshot(ClientHooks);

impl HooksSnapshot {
    pub(crate) fn hooks(&self) -> &ClientHooks {
        &self.0
    }
}

/// Returns a copy of the currently active hooks.
pub fn current() -> ClientHooks {
    HOOKS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn install(hooks: ClientHooks) -> HooksSnapshot {
    let mut active = HOOKS.write().unwrap_or_else(PoisonError::into_inner);
    HooksSnapshot(std::mem::replace(&mut *active, hooks))
}

pub fn restore(snapshot: HooksSnapshot) {
    let mut active = HOOKS.write().unwrap_or_else(PoisonError::into_inner);
    *active = snapshot.0;
}

/// Installs hooks and restores the previous ones when dropped.
#[derive(Debug)]
pub struct HookGuard {
    snapshot: Option<HooksSnapshot>,
}

impl HookGuard {
    pub fn install(hooks: ClientHooks) -> Self {
        Self {
            snapshot: Some(install(hooks)),
        }
    }

    /// The hooks that were active before this guard was installed.
    pub fn original(&self) -> Option<&ClientHooks> {
        self.snapshot.as_ref().map(HooksSnapshot::hooks)
    }

    pub fn restore(mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            restore(snapshot);
        }
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            restore(snapshot);
        }
    }
}

/// Hooks that route every request to `local` in plain text. The original TLS intent is
/// computed with `original` and stamped into [TLS_MARKER_HEADER].
pub(crate) fn mock_hooks(local: SocketAddr, original: ClientHooks) -> ClientHooks {
    ClientHooks::real()
        .resolve_with(move |_, _| vec![local])
        .detect_tls_with(|_| false)
        .on_request(move |req| {
            let is_tls = original.is_tls(req.uri());
            let marker = if is_tls {
                HeaderValue::from_static("1")
            } else {
                HeaderValue::from_static("")
            };
            req.headers_mut().insert(TLS_MARKER_HEADER, marker);
        })
}
