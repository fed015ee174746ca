//! Study Sync - sync and caching core for a Japanese study dashboard
//!
//! Pulls review history from Anki, Bunpro and WaniKani, keeps it in a
//! persistent cache with per-collection freshness windows, and refreshes it
//! incrementally from the newest cached record.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod platforms;
pub mod state;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use state::SyncState;
pub use sync::{stream_collection, SyncContext, SyncEvent, SyncService};
