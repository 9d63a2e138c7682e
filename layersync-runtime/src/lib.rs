//! Host runtime: client store, debounce and remote-feed wiring, and the
//! newline-delimited JSON command protocol.

mod error;
pub mod protocol;
mod runtime;
pub mod store;

pub use error::RuntimeError;
pub use protocol::{HostCommand, HostResponse};
pub use runtime::{init_tracing, serve_lines, start_blocking, Runtime, RuntimeHandle};
pub use store::{ClientStore, ClientSummary};
