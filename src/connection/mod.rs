//! Connection to the Teneo endpoint
//!
//! - Lifecycle state machine with exponential reconnect backoff
//! - Heartbeat while the connection is open
//! - WebSocket transport running one I/O task per connection

mod backoff;
mod heartbeat;
mod manager;
mod state;
#[cfg(test)]
mod testing;
mod timer;
mod transport;

pub use manager::ConnectionManager;
pub use transport::WsDialer;
