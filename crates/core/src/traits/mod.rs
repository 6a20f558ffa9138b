//! Collaborator traits for Code Play.
//!
//! The orchestrator depends on these capabilities, never on concrete products:
//! - `registry`: TTL-backed sandbox → container cache (SandboxRegistry)
//! - `record_store`: durable sandbox/project metadata (RecordStore)
//! - `credentials`: bearer credential validation (CredentialValidator)

pub mod credentials;
pub mod record_store;
pub mod registry;

pub use credentials::*;
pub use record_store::*;
pub use registry::*;
