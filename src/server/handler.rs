use crate::{
    common::{
        data::{BoxError, MockRequest, MockResponse, NoMatch, RawResponse, ResponseSource},
        http::Error as HttpClientError,
    },
    server::{passthrough::Passthrough, state::StateManager},
};
use async_trait::async_trait;
use hyper::{body::Bytes, Request, Response};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    NoMatch(#[from] NoMatch),
    #[error("mock session already failed: {0}")]
    SessionPoisoned(NoMatch),
    #[error("response producer failed: {0}")]
    ProducerError(BoxError),
    #[error("passthrough request failed: {0}")]
    PassthroughError(#[from] HttpClientError),
    #[error("cannot convert response: {0}")]
    ResponseConversionError(#[from] http::Error),
}

#[async_trait]
pub(crate) trait Handler {
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error>;
}

/// Resolves each incoming request against the expectation queue.
pub struct MockHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    state: Arc<S>,
    passthrough: Passthrough,
    poisoned: Arc<Notify>,
}

#[async_trait]
impl<S> Handler for MockHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        tracing::trace!("Resolving incoming request: {:?}", req);

        if let Some(failure) = self.state.failure() {
            return Err(Error::SessionPoisoned(failure));
        }

        let req = MockRequest::from(req);

        let source = match self.state.take_match(&req) {
            Ok(source) => source,
            Err(no_match) => {
                self.poisoned.notify_one();
                return Err(Error::NoMatch(no_match));
            }
        };

        // The expectation is consumed at this point. If the producer below is cancelled, it
        // does not go back into the queue.
        let response = match source {
            ResponseSource::Body(body) => MockResponse::text(body),
            ResponseSource::Response(response) => response,
            ResponseSource::Producer(producer) => producer
                .respond(req)
                .await
                .map_err(Error::ProducerError)?,
            ResponseSource::Passthrough => self.passthrough.forward(req).await?,
            ResponseSource::Raw(bytes) => {
                let mut response = Response::new(Bytes::new());
                response.extensions_mut().insert(RawResponse(bytes));
                return Ok(response);
            }
        };

        Ok(response.into_http()?)
    }
}

impl<S> MockHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    pub(crate) fn new(state: Arc<S>, passthrough: Passthrough, poisoned: Arc<Notify>) -> Self {
        Self {
            state,
            passthrough,
            poisoned,
        }
    }
}
