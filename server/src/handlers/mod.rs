//! Request handlers.

mod replication;
mod websocket;

pub use replication::*;
pub use websocket::*;
