// ABOUTME: Connection registry for live agent streams — registration, routing sends, heartbeats.

pub mod connection;
pub mod registry;

pub use connection::Connection;
pub use registry::{AgentInfo, AgentManager};
