//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the relay's shared state and delivery rules so the
//! route handler can stay focused on protocol translation.

pub mod broadcast;
pub mod registry;
pub mod replay;
pub mod session;
pub mod strokes;
pub mod sweep;
