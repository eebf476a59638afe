//! `respmock` mocks outgoing HTTP requests in async tests. It contains two components:
//!
//! * a **mock server** that runs on a local port for the duration of a test, and
//! * a **client** ([Client]) whose name resolution and TLS handling can be redirected.
//!
//! While a [MockSession] is running, every request sent through [Client] lands on the mock
//! server, whatever host and scheme it was addressed to. The server answers each request with
//! the first registered expectation that matches its host, path and method, and removes that
//! expectation from the queue.
//!
//! # Getting Started
//! ```rust,no_run
//! use respmock::{Client, MockSession};
//!
//! async fn ping_pong() {
//!     MockSession::run(|server| async move {
//!         server.add("foo.com", "/", "get", "hi there!!");
//!
//!         let client = Client::new();
//!         let res = client.get("http://foo.com/").await.unwrap();
//!         assert_eq!(res.body().as_ref(), b"hi there!!");
//!     })
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! # Matching
//! Host, path and method are matched by a [Pattern]:
//! * a string, compared for equality (host and method ignore case, path does not),
//! * a [regex::Regex], which matches if it is found anywhere in the value,
//! * [ANY], which matches everything, or
//! * [Pattern::matching] for arbitrary predicates.
//!
//! The query string is ignored unless an [Expectation] enables
//! [match_querystring](Expectation::match_querystring).
//!
//! # Responses
//! An expectation responds with a plain body, a complete [MockResponse], a [Respond]
//! producer that computes the response from the [MockRequest], or [PASSTHROUGH], which sends
//! the request out to the real destination and relays the real response.
//! [ResponseSource::raw] writes bytes to the socket verbatim, for responses hyper would not
//! produce.
//!
//! # Failures
//! A request that matches nothing gets a `500` response, and the session is failed: every
//! later request is refused and [MockSession::stop] returns [Error::SessionFailed], even if
//! the code under test swallowed the failed response.
//!
//! # Logging
//! The crate logs through `tracing` with the `log` feature, so any `log` backend such as
//! `env_logger` shows the output:
//! ```shell
//! RUST_LOG=respmock=debug cargo test
//! ```
//!
//! # Environment
//! [MockServerBuilder::from_env] reads `RESPMOCK_HOST` and `RESPMOCK_PORT` to choose the
//! address the mock server binds to.
//!
//! # TLS
//! Mocked requests never use TLS, even for `https` URLs. Enable the `https` feature to let
//! [PASSTHROUGH] requests reach real `https` destinations.

mod api;
mod common;
mod server;

pub use api::{Error, Lifecycle, MockServer, MockSession};
pub use common::{
    data::{
        BoxError, Error as DataError, Expectation, MockRequest, MockResponse, NoMatch, Pattern,
        PatternMatcher, Respond, ResponseSource, ANY, PASSTHROUGH,
    },
    hooks,
    http::{Client, Error as ClientError, HttpClient},
};
pub use server::{
    builder::Error as ConfigError, server::Error as ServerError, MockServerBuilder,
    MockServerConfig,
};

pub mod prelude {
    #[doc(no_inline)]
    pub use crate::{
        Client, Expectation, MockRequest, MockResponse, MockServer, MockServerBuilder,
        MockSession, Pattern, ResponseSource, ANY, PASSTHROUGH,
    };
}
