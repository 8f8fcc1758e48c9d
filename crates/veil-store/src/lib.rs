//! # veil-store
//!
//! SQLite persistence for the Veil chat service.  The crate exposes a
//! synchronous [`Database`] handle that wraps a `rusqlite::Connection` and
//! provides typed CRUD helpers for every domain model: users and their
//! online-session counters, groups with anonymous membership and removal
//! records, messages with auto-delete state, and the directed block graph.

pub mod blocks;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
