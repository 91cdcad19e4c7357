//! Storage Module
//!
//! SQLite-based storage layer with:
//! - The primary context table plus inverted indexes over nodes, relations,
//!   emotions, results and rule conditions
//! - Invariant enforcement on every write
//! - Snapshot reads for retrieval (one read transaction per scan)
//! - Consolidation bookkeeping (failures, quarantine, absorptions)

mod migrations;
mod sqlite;

pub use migrations::{apply_migrations, get_current_version, Migration, MIGRATIONS};
pub use sqlite::{ContextStore, StoreConfig};
