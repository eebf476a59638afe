use crate::{
    common::data::{Expectation, MockRequest, NoMatch, Pattern, ResponseSource},
    server::matchers::{self, matches},
};
use std::sync::{Mutex, PoisonError};

/// The host and path side of an expectation. Kept after the expectation is consumed so a
/// later [NoMatch] still reports how close the request came.
#[derive(Debug, Clone)]
pub struct Route {
    pub host: Pattern,
    pub path: Pattern,
    pub match_querystring: bool,
}

impl Route {
    fn path_target<'a>(&self, path: &'a str, path_qs: &'a str) -> &'a str {
        if self.match_querystring {
            path_qs
        } else {
            path
        }
    }
}

#[derive(Default)]
pub struct MockServerState {
    pub expectations: Vec<Expectation>,
    pub host_patterns: Vec<Pattern>,
    pub routes: Vec<Route>,
    pub failure: Option<NoMatch>,
}

/// The ordered expectation queue of one mock session.
pub(crate) trait StateManager {
    fn add(&self, expectation: Expectation);

    /// Finds the first expectation matching `req`, removes it and returns its response.
    /// Records the first [NoMatch] of the session when nothing matches.
    fn take_match(&self, req: &MockRequest) -> Result<ResponseSource, NoMatch>;

    fn failure(&self) -> Option<NoMatch>;

    fn pending(&self) -> usize;

    fn host_registered(&self, host: &str) -> bool;
}

#[derive(Default)]
pub struct MockStateManager {
    state: Mutex<MockServerState>,
}

impl MockStateManager {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateManager for MockStateManager {
    fn add(&self, mut expectation: Expectation) {
        expectation.host = matchers::lowercase(expectation.host);
        expectation.method = matchers::lowercase(expectation.method);

        let mut state = self.lock();

        if !state.host_patterns.contains(&expectation.host) {
            state.host_patterns.push(expectation.host.clone());
        }
        state.routes.push(Route {
            host: expectation.host.clone(),
            path: expectation.path.clone(),
            match_querystring: expectation.match_querystring,
        });

        tracing::debug!(
            "Adding expectation #{}: {:?} {:?} {:?} (match_querystring={})",
            state.expectations.len(),
            expectation.host,
            expectation.path,
            expectation.method,
            expectation.match_querystring
        );

        state.expectations.push(expectation);
    }

    fn take_match(&self, req: &MockRequest) -> Result<ResponseSource, NoMatch> {
        let host = req.host().unwrap_or_default().to_lowercase();
        let path = req.path();
        let path_qs = req.path_qs();
        let method = req.method_str().to_lowercase();

        tracing::debug!("Looking for match for {} {} {}", host, path, req.method_str());

        let mut state = self.lock();

        let found = state.expectations.iter().position(|expectation| {
            let route_path = if expectation.match_querystring {
                path_qs.as_str()
            } else {
                path
            };
            matches(&expectation.host, &host)
                && matches(&expectation.path, route_path)
                && matches(&expectation.method, &method)
        });

        if let Some(idx) = found {
            tracing::debug!("Matched expectation #{} to {} {} {}", idx, host, path, method);
            return Ok(state.expectations.remove(idx).response);
        }

        // Partial flags look at everything registered this session, consumed or not.
        let host_matched = state
            .host_patterns
            .iter()
            .any(|pattern| matches(pattern, &host));
        let path_matched = state.routes.iter().any(|route| {
            matches(&route.host, &host)
                && matches(&route.path, route.path_target(path, &path_qs))
        });

        let no_match = NoMatch {
            host,
            path: path.to_string(),
            method: req.method_str().to_string(),
            host_matched,
            path_matched,
        };

        tracing::error!("{}", no_match);

        if state.failure.is_none() {
            state.failure = Some(no_match.clone());
        }

        Err(no_match)
    }

    fn failure(&self) -> Option<NoMatch> {
        self.lock().failure.clone()
    }

    fn pending(&self) -> usize {
        self.lock().expectations.len()
    }

    fn host_registered(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.lock()
            .host_patterns
            .iter()
            .any(|pattern| matches(pattern, &host))
    }
}
