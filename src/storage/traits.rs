//! Abstract contact repository.
//!
//! The engine only talks to storage through [`ContactRepository`]. By using a
//! trait, we enable:
//! - In-memory backends for testing and embedded use
//! - SQL backends for production

use thiserror::Error;

use crate::contact::{Contact, ContactId, LinkPrecedence, LinkState, NewContact};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Contact not found.
    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    /// A concurrent write invalidated the requested change.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// A stored row cannot be decoded into a valid contact.
    #[error("Corrupt contact record {id}: {reason}")]
    CorruptRecord {
        /// Offending contact.
        id: ContactId,
        /// What is wrong with it.
        reason: String,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The backend did not answer in time.
    #[error("Storage operation timed out after {duration_ms}ms")]
    Timeout {
        /// Elapsed time before giving up.
        duration_ms: u64,
    },
}

/// Result of a precedence rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecedenceUpdate {
    /// The contact was rewritten.
    Applied,
    /// The contact already had the requested precedence and link.
    Unchanged,
}

impl PrecedenceUpdate {
    /// Returns true if a write happened.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Storage trait for contact records.
///
/// # Ordering
/// Every list-returning method orders by `(created_at, id)` ascending.
///
/// # Safety Considerations
/// - `create_contact` and `set_precedence` must be atomic
/// - Implementations must handle concurrent access safely
pub trait ContactRepository: Send + Sync {
    /// Find contacts whose email equals `email` or whose phone equals `phone`.
    ///
    /// Absent arguments never match; with both absent the result is empty.
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError>;

    /// Get a contact by ID.
    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Return the cluster rooted at `root`: the root itself (if stored) and
    /// every contact whose `linked_to` chain reaches it, flattened.
    fn find_cluster_members(&self, root: ContactId) -> Result<Vec<Contact>, StorageError>;

    /// Insert a new contact, assigning its id and timestamps.
    fn create_contact(&self, contact: NewContact) -> Result<Contact, StorageError>;

    /// Rewrite a contact's precedence and link.
    ///
    /// `expected` is the link state the caller read. The rewrite is a
    /// compare-and-set: it only applies while the stored contact still has
    /// that state. Re-applying the requested state is a no-op returning
    /// [`PrecedenceUpdate::Unchanged`].
    ///
    /// # Errors
    /// - `ContactNotFound`: if `id` does not exist
    /// - `Conflict`: if the stored state is neither `expected` nor the
    ///   requested state, if the link target is missing or not a primary, or
    ///   if the rewrite would link a contact to itself
    fn set_precedence(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_to: Option<ContactId>,
        expected: LinkState,
    ) -> Result<PrecedenceUpdate, StorageError>;

    /// Every stored contact, oldest first. Used by audits and tooling.
    fn list_all(&self) -> Result<Vec<Contact>, StorageError>;
}
