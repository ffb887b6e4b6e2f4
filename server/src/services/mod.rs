//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own session state transitions so route handlers can stay
//! focused on protocol translation.

pub mod delta;
pub mod presence;
pub mod session;
