use crate::{api::MockSession, common::util::read_env};
use http::HeaderName;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

const DEFAULT_PASSTHROUGH_HEADERS: &[&str] = &["content-type"];

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid value {1:?} for environment variable {0}")]
    InvalidEnvironmentValue(&'static str, String),
    #[error("invalid passthrough header name {0:?}")]
    InvalidHeaderName(String),
}

/// The validated configuration of a mock session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub passthrough_headers: Vec<String>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            passthrough_headers: DEFAULT_PASSTHROUGH_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }
}

/// Configures and starts a mock session.
///
/// ```no_run
/// # async fn run() -> Result<(), respmock::Error> {
/// use respmock::MockServerBuilder;
///
/// let session = MockServerBuilder::new()
///     .passthrough_headers(["content-type", "set-cookie"])
///     .start()
///     .await?;
/// # session.stop().await
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    host: Option<IpAddr>,
    port: Option<u16>,
    passthrough_headers: Option<Vec<String>>,
}

impl MockServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The address the mock server binds to. Defaults to `127.0.0.1`.
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = Some(host);
        self
    }

    /// The port the mock server binds to. Defaults to `0`, a random free port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Response headers copied from the real response of a passthrough request. All other
    /// headers are dropped. Defaults to `content-type`.
    pub fn passthrough_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passthrough_headers = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    /// Reads `RESPMOCK_HOST` and `RESPMOCK_PORT`. Values that are set override anything
    /// configured before this call.
    pub fn from_env(mut self) -> Result<Self, Error> {
        if let Some(host) = read_env("RESPMOCK_HOST") {
            let parsed = host
                .parse()
                .map_err(|_| Error::InvalidEnvironmentValue("RESPMOCK_HOST", host))?;
            self.host = Some(parsed);
        }

        if let Some(port) = read_env("RESPMOCK_PORT") {
            let parsed = port
                .parse()
                .map_err(|_| Error::InvalidEnvironmentValue("RESPMOCK_PORT", port))?;
            self.port = Some(parsed);
        }

        Ok(self)
    }

    pub fn build(self) -> Result<MockServerConfig, Error> {
        let defaults = MockServerConfig::default();

        let passthrough_headers = self
            .passthrough_headers
            .unwrap_or(defaults.passthrough_headers);

        for name in &passthrough_headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(Error::InvalidHeaderName(name.clone()));
            }
        }

        Ok(MockServerConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            passthrough_headers,
        })
    }

    /// Builds the configuration and starts a session with it.
    pub async fn start(self) -> Result<MockSession, crate::api::Error> {
        MockSession::start_with(self.build()?).await
    }
}
