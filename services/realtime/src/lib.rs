//! Realtime presence and messaging service
//!
//! Tracks which authenticated user is reachable on which live connection and
//! fans conversation events (new messages, read receipts, typing, participant
//! changes) out to exactly the live connections of the affected participants.

pub mod cleanup;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod registry;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod state;
pub mod sweeper;

pub use config::Settings;
pub use error::{ErrorKind, RealtimeError, RealtimeResult};
pub use gateway::{ClientEvent, Connection, ConnectionState, Gateway, ServerEvent};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use state::{AppState, Storage};
