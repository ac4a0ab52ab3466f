//! # dapps-store
//!
//! Local SQLite storage for the DAPPS relay.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for messages,
//! in-flight offers, routing tables and node options.  `SharedDatabase`
//! lets async tasks share one handle.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod neighbours;
pub mod offers;
pub mod options;
pub mod retention;
pub mod routes;
pub mod shared;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use retention::{KeepForever, PurgeForwardedAfter, RetentionPolicy};
pub use shared::SharedDatabase;
