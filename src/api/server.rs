use crate::{
    common::{
        data::{Expectation, NoMatch, Pattern, ResponseSource},
        hooks::{self, HookGuard},
    },
    server::{
        builder, passthrough::Passthrough, server, MockStateManager, MockEndpoint,
        MockEndpointConfig, MockHandler, MockServerBuilder, MockServerConfig, StateManager,
    },
};
use futures_util::FutureExt;
use std::{
    future::Future,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{Arc, PoisonError, RwLock},
};
use thiserror::Error;
use tokio::{
    sync::{oneshot, Mutex, MutexGuard, Notify},
    task::JoinHandle,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("mock server error: {0}")]
    ServerError(#[from] server::Error),
    #[error("invalid mock server configuration: {0}")]
    ConfigurationError(#[from] builder::Error),
    #[error("mock server task failed: {0}")]
    JoinError(#[from] tokio::task::JoinError),
    #[error("mock session failed: {0}")]
    SessionFailed(NoMatch),
}

// Client hooks are process-wide, so sessions must not overlap.
pub(crate) static SESSION_LOCK: Mutex<()> = Mutex::const_new(());

/// A handle to the mock server of a running session. Cheap to clone.
#[derive(Clone)]
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockStateManager>,
    lifecycle: Arc<RwLock<Lifecycle>>,
}

impl MockServer {
    /// Registers an expectation that ignores the query string.
    ///
    /// `host` and `method` are compared case-insensitively, `path` case-sensitively. Any of
    /// them can be [ANY](crate::ANY), a [regex::Regex] or a [Pattern].
    ///
    /// ```no_run
    /// # async fn run() -> Result<(), respmock::Error> {
    /// use respmock::{MockResponse, MockSession, ANY};
    ///
    /// MockSession::run(|server| async move {
    ///     server.add("example.com", "/ping", "GET", "pong");
    ///     server.add(ANY, ANY, ANY, MockResponse::new().status(503));
    /// })
    /// .await
    /// # }
    /// ```
    pub fn add<H, P, M, R>(&self, host: H, path: P, method: M, response: R)
    where
        H: Into<Pattern>,
        P: Into<Pattern>,
        M: Into<Pattern>,
        R: Into<ResponseSource>,
    {
        self.add_expectation(
            Expectation::new(host)
                .path(path)
                .method(method)
                .respond_with(response),
        );
    }

    pub fn add_expectation(&self, expectation: Expectation) {
        self.state.add(expectation);
    }

    /// The number of registered expectations that have not been consumed yet.
    pub fn pending(&self) -> usize {
        self.state.pending()
    }

    /// Whether any host pattern registered during this session matches `host`, consumed or
    /// not.
    pub fn host_registered(&self, host: &str) -> bool {
        self.state.host_registered(host)
    }

    /// The first unmatched request of this session, if there was one.
    pub fn failure(&self) -> Option<NoMatch> {
        self.state.failure()
    }

    pub fn address(&self) -> &SocketAddr {
        &self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The URL of `path` on the mock server itself, for clients that do not go through the
    /// session hooks.
    pub fn url<S: Into<String>>(&self, path: S) -> String {
        format!("http://{}{}", self.addr, path.into())
    }

    pub fn base_url(&self) -> String {
        self.url("")
    }

    /// The current phase of the session this server belongs to. A handle kept after the
    /// session ended reports [Lifecycle::Stopped].
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        tracing::debug!("Mock session on {} {:?}", self.addr, lifecycle);
        *self.lifecycle.write().unwrap_or_else(PoisonError::into_inner) = lifecycle;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// One mock session: a listening mock server plus the client hooks that route every
/// [Client](crate::Client) request to it.
///
/// Prefer [MockSession::run], which guarantees cleanup. A session that is dropped without
/// [MockSession::stop] still restores the hooks and shuts the server down, and panics if a
/// request went unmatched.
pub struct MockSession {
    server: MockServer,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), server::Error>>>,
    hooks: Option<HookGuard>,
    reported: bool,
    // Declared last so it is released after the hooks are restored.
    _exclusive: MutexGuard<'static, ()>,
}

impl MockSession {
    /// Starts a session with the default configuration.
    pub async fn start() -> Result<Self, Error> {
        MockServerBuilder::new().start().await
    }

    pub(crate) async fn start_with(config: MockServerConfig) -> Result<Self, Error> {
        let exclusive = SESSION_LOCK.lock().await;
        let lifecycle = Arc::new(RwLock::new(Lifecycle::Starting));

        let original_hooks = hooks::current();
        let state = Arc::new(MockStateManager::default());
        let poisoned = Arc::new(Notify::new());

        let handler = MockHandler::new(
            state.clone(),
            Passthrough::new(original_hooks.clone(), config.passthrough_headers),
            poisoned.clone(),
        );
        let endpoint = MockEndpoint::new(
            Box::new(handler),
            MockEndpointConfig {
                host: config.host,
                port: config.port,
            },
        );

        let (addr_sender, addr_receiver) = oneshot::channel();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
        let shutdown = async move {
            tokio::select! {
                _ = shutdown_receiver => {}
                _ = poisoned.notified() => {
                    tracing::warn!("Mock session failed, closing the listener");
                }
            }
        };

        let task = tokio::spawn(endpoint.start_with_signals(Some(addr_sender), shutdown));

        let addr = match addr_receiver.await {
            Ok(addr) => addr,
            Err(_) => {
                return Err(match task.await {
                    Ok(Err(err)) => Error::ServerError(err),
                    Ok(Ok(())) => Error::ServerError(server::Error::NotStarted),
                    Err(err) => Error::JoinError(err),
                })
            }
        };

        let hooks = HookGuard::install(hooks::mock_hooks(addr, original_hooks));

        let server = MockServer {
            addr,
            state,
            lifecycle,
        };
        server.set_lifecycle(Lifecycle::Running);
        tracing::info!("Mock session running on {}", addr);

        Ok(Self {
            server,
            shutdown: Some(shutdown_sender),
            task: Some(task),
            hooks: Some(hooks),
            reported: false,
            _exclusive: exclusive,
        })
    }

    /// Starts a session, runs `f` with its server handle and stops the session again, no
    /// matter how `f` ends. A panic inside `f` is resumed after cleanup.
    ///
    /// Returns [Error::SessionFailed] if any request went unmatched, even if the code under
    /// test swallowed the failed response.
    pub async fn run<F, Fut, T>(f: F) -> Result<T, Error>
    where
        F: FnOnce(MockServer) -> Fut,
        Fut: Future<Output = T>,
    {
        Self::run_with(MockServerBuilder::new().build()?, f).await
    }

    pub async fn run_with<F, Fut, T>(config: MockServerConfig, f: F) -> Result<T, Error>
    where
        F: FnOnce(MockServer) -> Fut,
        Fut: Future<Output = T>,
    {
        let session = Self::start_with(config).await?;
        let server = session.server();

        let outcome = AssertUnwindSafe(async move { f(server).await })
            .catch_unwind()
            .await;
        let stopped = session.stop().await;

        match outcome {
            Ok(value) => stopped.map(|_| value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    pub fn server(&self) -> MockServer {
        self.server.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.server.lifecycle()
    }

    /// Restores the client hooks, shuts the mock server down and reports the session
    /// result. Unconsumed expectations are discarded.
    pub async fn stop(mut self) -> Result<(), Error> {
        self.server.set_lifecycle(Lifecycle::Stopping);

        if let Some(hooks) = self.hooks.take() {
            hooks.restore();
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        let result = match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result.map_err(Error::from),
                Err(err) => Err(Error::from(err)),
            },
            None => Ok(()),
        };

        self.server.set_lifecycle(Lifecycle::Stopped);
        self.reported = true;

        if self.server.pending() > 0 {
            tracing::debug!(
                "Discarding {} unconsumed expectations",
                self.server.pending()
            );
        }
        tracing::info!("Mock session on {} stopped", self.server.addr);

        if let Some(failure) = self.server.failure() {
            return Err(Error::SessionFailed(failure));
        }

        result
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if let Some(hooks) = self.hooks.take() {
            hooks.restore();
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(task) = self.task.take() {
            task.abort();
            self.server.set_lifecycle(Lifecycle::Stopped);
        }

        if self.reported || std::thread::panicking() {
            return;
        }

        if let Some(failure) = self.server.failure() {
            panic!("mock session failed: {}", failure);
        }
    }
}
