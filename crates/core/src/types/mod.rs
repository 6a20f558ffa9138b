//! Core type definitions for Code Play.
//!
//! Domain records shared by the orchestrator, the stores and the gateway.

pub mod execution;
pub mod file_node;
pub mod identity;
pub mod project;
pub mod sandbox;

pub use execution::*;
pub use file_node::*;
pub use identity::*;
pub use project::*;
pub use sandbox::*;
