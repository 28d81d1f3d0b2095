//! Persistent connection transport.
//!
//! Authenticated connections exchange protocol frames with the server and
//! can subscribe to server-initiated notifications.

mod connection;
mod handler;

pub use connection::{ConnectionManager, DeliveryReport, SendError, OUTGOING_BUFFER};
pub use handler::ws_handler;
