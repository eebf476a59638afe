pub(crate) mod data;
pub mod hooks;
pub(crate) mod http;
pub(crate) mod util;
