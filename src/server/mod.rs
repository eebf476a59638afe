pub mod builder;
pub(crate) mod handler;
pub(crate) mod matchers;
pub(crate) mod passthrough;
pub(crate) mod server;
pub(crate) mod state;

pub use builder::{MockServerBuilder, MockServerConfig};
pub(crate) use handler::MockHandler;
pub(crate) use server::{MockEndpoint, MockEndpointConfig};
pub(crate) use state::{MockStateManager, StateManager};
