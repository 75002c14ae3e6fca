//! Transport-facing pieces: agent message shapes and the session registry.

pub mod message;
pub mod registry;

pub use message::{ParsedServerMessage, RealtimeInput, ServerMessage, parse_server_message};
pub use registry::{RegistryStats, SessionConnection, SessionRegistry, Sweeper};
