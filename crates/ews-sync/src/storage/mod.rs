//! Storage traits and implementations
//!
//! The trait-based design allows swapping between the in-memory stores
//! (tests, stubs) and the SQLite-backed store used in a real deployment.
//! Message bodies live in a separate content-addressed file cache.

mod body_cache;
mod memory;
mod sqlite;
mod traits;

pub use body_cache::BodyCache;
pub use memory::{InMemoryCalendarStore, InMemoryInfoStore};
pub use sqlite::SqliteInfoStore;
pub use traits::{CalendarStore, MessageInfoStore};
