//! Model Context Protocol handling and JSON-RPC implementations
//!
//! Provides JSON-RPC formatting, the forwarded method table, and request routing.

pub mod methods;
pub mod rpc;
pub mod server;
