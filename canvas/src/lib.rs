//! Drawing model and client-side synchronization engine for the shared whiteboard.
//!
//! This crate is transport-agnostic: it never opens a socket. Hosts (the
//! `sketch` CLI, a browser shell, tests) feed decoded [`frames::Frame`]s into
//! [`sync::SyncClient`] and ship the frames it produces. The `server` crate
//! reuses the stroke, delta and participant types so both ends agree on the
//! payload shapes.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`stroke`] | Stroke, point and tool types plus payload limits |
//! | [`delta`] | Stroke deltas, remote updates and the local/remote change tag |
//! | [`log`] | Local edit log with undo/redo and store reconciliation |
//! | [`presence`] | Participant type and the client's read-only presence cache |
//! | [`sync`] | Connection state machine translating frames to log changes |

pub mod delta;
pub mod log;
pub mod presence;
pub mod stroke;
pub mod sync;
