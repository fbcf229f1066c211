//! Contact repository interface and backends.
//!
//! The engine consumes storage only through [`ContactRepository`].

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use memory::InMemoryContactStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteContactStore;
pub use traits::{ContactRepository, PrecedenceUpdate, StorageError};
