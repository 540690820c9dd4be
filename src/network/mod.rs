//! Network Module
//!
//! TCP servers and clients for both surfaces.
//!
//! ## Architecture
//! - One acceptor per listener (peer port and localhost RPC port)
//! - One handler thread per connection, bounded by `max_connections`
//! - Commands routed through [`Router`] into a [`LocalService`]

mod client;
mod connection;
mod router;
mod server;
mod service;

pub use client::{Client, PeerClient, RpcClient};
pub use connection::Connection;
pub use router::{Router, Surface};
pub use server::{Server, ShutdownHandle};
pub use service::{DeviceService, LocalService};
