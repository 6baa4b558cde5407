//! Network Module
//!
//! Byte-stream transport plus a TCP server and client for remote queries.
//!
//! ## Architecture
//! - Single acceptor thread polling a cooperative shutdown flag
//! - One thread per connection, capped by `max_connections`
//! - Every request runs against its own read transaction

mod client;
mod connection;
mod server;
mod stream;

pub use client::Client;
pub use connection::Connection;
pub use server::{Server, ShutdownHandle};
pub use stream::{BinaryStream, NetworkStream};
