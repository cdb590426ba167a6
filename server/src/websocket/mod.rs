//! WebSocket support for live document sync.
//!
//! Clients attach to one document and receive a `patches_available`
//! notification whenever another client's push is logged.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
