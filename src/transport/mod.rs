//! Host-facing transport for the relay's own JSON-RPC endpoint

pub mod stdio;
