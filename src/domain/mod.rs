//! Relay-local tool implementations
//!
//! Provides the args-update tool, the one tool the relay answers itself.

pub mod update_tool;
