//! WebSocket connection tracking.
//!
//! Every connected client gets a correlator; the manager relays fan-out
//! frames between them.

mod manager;

pub use manager::{Connection, ConnectionManager, FrameSender};
