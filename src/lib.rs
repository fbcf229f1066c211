//! # idresolve - Contact identity resolution
//!
//! idresolve decides which email addresses and phone numbers belong to the
//! same person. Every observation (`email?`, `phoneNumber?`) is stored as a
//! contact; contacts that share an email or phone number form a cluster
//! rooted at its oldest contact.
//!
//! ## Core Concepts
//!
//! - **Contact**: One stored observation, `Primary` or `Secondary`
//! - **Cluster**: A primary plus every secondary linked directly to it
//! - **Merge**: Demoting the younger primary when an observation bridges two clusters
//! - **ConsolidatedIdentity**: The deduplicated view of one cluster
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use idresolve::{IdentityEngine, InMemoryContactStore, Observation};
//!
//! let engine = IdentityEngine::new(Arc::new(InMemoryContactStore::new()));
//!
//! let first = engine.resolve(&Observation::new(Some("doc@hillvalley.edu"), None)?)?;
//! let second = engine.resolve(&Observation::new(Some("doc@hillvalley.edu"), Some("555-0188"))?)?;
//!
//! assert_eq!(first.primary_contact_id, second.primary_contact_id);
//! assert_eq!(second.phone_numbers, vec!["555-0188"]);
//! assert_eq!(second.secondary_contact_ids.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod contact;
pub mod engine;
pub mod error;
pub mod identity;
pub mod invariants;
pub mod observation;
pub mod storage;

#[cfg(feature = "telemetry")]
pub mod telemetry;
#[cfg(feature = "transport-http")]
pub mod transport;

// Re-export primary types at crate root for convenience
pub use config::{EngineConfig, FlattenPolicy};
pub use contact::{Contact, ContactId, LinkPrecedence, LinkState, NewContact};
pub use engine::{IdentityEngine, ResolveOutcome};
pub use error::{EngineResult, ResolveError, ValidationError};
pub use identity::{ClusterView, ConsolidatedIdentity, OrderedSet};
pub use invariants::{check_store_invariants, Violation};
pub use observation::{IdentityKey, Observation};
pub use storage::{ContactRepository, InMemoryContactStore, PrecedenceUpdate, StorageError};

#[cfg(feature = "sqlite")]
pub use storage::SqliteContactStore;
