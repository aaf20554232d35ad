//! Connection management
//!
//! This module handles:
//! * Transport abstraction (TCP vs Unix socket)
//! * Connection lifecycle (startup, auth, query execution)
//! * State machine enforcement

mod conn;
mod result;
mod state;
mod transport;

pub use conn::{Connection, ConnectionConfig, ConnectionConfigBuilder, APPLICATION_NAME};
pub use result::QueryResult;
pub use state::ConnectionState;
pub use transport::Transport;
