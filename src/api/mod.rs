pub use server::{Error, Lifecycle, MockServer, MockSession};

#[cfg(test)]
pub(crate) use server::SESSION_LOCK;

mod server;
