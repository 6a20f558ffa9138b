#![deny(unused)]
//! Storage backends for Code Play.
//!
//! - [`RedisSandboxRegistry`]: the production ephemeral registry (`SETEX` keys).
//! - [`InMemoryRegistry`]: TTL-honouring registry for single-process runs and tests.
//! - [`InMemoryRecordStore`]: record store used when no external persistence is wired.

pub mod memory;
pub mod redis;

pub use self::memory::{InMemoryRecordStore, InMemoryRegistry};
pub use self::redis::RedisSandboxRegistry;
