// ABOUTME: gRPC service implementations — thin adapters translating wire frames to domain calls.
// ABOUTME: Each handler: extract AuthContext, call Store/Manager/Router/Broker, map errors, audit.

pub mod admin;
pub mod client;
pub mod coven;

pub use admin::AdminServiceImpl;
pub use client::ClientServiceImpl;
pub use coven::CovenControlImpl;
