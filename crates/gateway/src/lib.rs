#![deny(unused)]
//! HTTP and WebSocket gateway for Code Play.
//!
//! Exposes project creation, sandbox lifecycle and one-shot execution as a
//! JSON API under `/api`, and interactive terminals over WebSocket.
//!
//! Responses use one envelope: `{"success": true, "data": ...}` or
//! `{"success": false, "error": {"code", "message"}}`.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod terminal;

pub use error::{status_for, ApiError, ApiResponse};
pub use server::{AppState, GatewayConfig, GatewayServer};
