//! # MCP Proxy
//!
//! Model Context Protocol proxy: spawns the configured downstream servers
//! with secret-injected environments, aggregates their tools, resources and
//! prompts under `<serverId>/<name>` namespaces, and routes host traffic on
//! stdin/stdout to the owning child.

pub mod child;
pub mod protocol;
pub mod proxy;
pub mod transport;

pub use child::ChildSession;
pub use protocol::*;
pub use proxy::Proxy;
pub use transport::{MessageReader, MessageWriter};
