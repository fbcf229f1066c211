//! Offline audit of cluster invariants.
//!
//! Scans every stored contact and reports each place where the stored graph
//! departs from the cluster shape: malformed link fields, links to missing
//! contacts, links to secondaries (chains), and primaries that are younger
//! than one of their members.

use std::collections::HashMap;
use std::fmt;

use crate::contact::{Contact, ContactId};
use crate::storage::{ContactRepository, StorageError};

/// One invariant breach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Link fields disagree with the precedence.
    MalformedLinkage {
        /// Offending contact.
        id: ContactId,
        /// Description.
        reason: String,
    },
    /// `linked_to` names a contact that is not stored.
    OrphanLink {
        /// Offending contact.
        id: ContactId,
        /// Missing target.
        target: ContactId,
    },
    /// `linked_to` names a secondary.
    ChainedLink {
        /// Offending contact.
        id: ContactId,
        /// Secondary it points at.
        target: ContactId,
    },
    /// A member is older than its cluster's primary.
    PrimaryNotOldest {
        /// Cluster primary.
        primary: ContactId,
        /// Older member.
        older: ContactId,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedLinkage { id, reason } => write!(f, "contact {id}: {reason}"),
            Self::OrphanLink { id, target } => {
                write!(f, "contact {id} links to missing contact {target}")
            }
            Self::ChainedLink { id, target } => {
                write!(f, "contact {id} links to secondary {target}")
            }
            Self::PrimaryNotOldest { primary, older } => {
                write!(f, "primary {primary} is younger than member {older}")
            }
        }
    }
}

/// Checks a set of contacts.
#[must_use]
pub fn check_contacts(contacts: &[Contact]) -> Vec<Violation> {
    let by_id: HashMap<ContactId, &Contact> = contacts.iter().map(|c| (c.id, c)).collect();
    let mut out = Vec::new();

    for contact in contacts {
        if let Err(reason) = contact.check_linkage() {
            out.push(Violation::MalformedLinkage {
                id: contact.id,
                reason,
            });
            continue;
        }
        let Some(target_id) = contact.linked_to else {
            continue;
        };
        match by_id.get(&target_id) {
            None => out.push(Violation::OrphanLink {
                id: contact.id,
                target: target_id,
            }),
            Some(target) if !target.is_primary() => out.push(Violation::ChainedLink {
                id: contact.id,
                target: target_id,
            }),
            Some(target) => {
                if contact.age_key() < target.age_key() {
                    out.push(Violation::PrimaryNotOldest {
                        primary: target_id,
                        older: contact.id,
                    });
                }
            }
        }
    }
    out
}

/// Checks every contact in `repo`.
pub fn check_store_invariants(repo: &dyn ContactRepository) -> Result<Vec<Violation>, StorageError> {
    let contacts = repo.list_all()?;
    Ok(check_contacts(&contacts))
}
