//! Contact records and link precedence.
//!
//! A contact is the only stored entity. Clusters ("the same person") are not
//! stored; they are derived from `link_precedence` and `linked_to`:
//! one `Primary` contact plus every `Secondary` whose `linked_to` names it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable, monotonically assigned contact identifier.
///
/// Ids are handed out by the repository in creation order, so comparing two
/// ids also compares their creation order when timestamps tie.
///
/// # Examples
///
/// ```
/// use idresolve::ContactId;
///
/// let id = ContactId::new(7);
/// assert_eq!(id.get(), 7);
/// assert_eq!(id.to_string(), "7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(i64);

impl ContactId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ContactId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<ContactId> for i64 {
    fn from(id: ContactId) -> Self {
        id.0
    }
}

/// Position of a contact inside its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// The oldest, canonical contact of a cluster.
    Primary,
    /// A contact linked to the cluster's primary.
    Secondary,
}

impl LinkPrecedence {
    /// Storage spelling of the precedence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Returns true for `Primary`.
    #[must_use]
    pub const fn is_primary(self) -> bool {
        matches!(self, Self::Primary)
    }
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown precedence tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown link precedence: {0:?}")]
pub struct UnknownPrecedence(pub String);

impl FromStr for LinkPrecedence {
    type Err = UnknownPrecedence;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(UnknownPrecedence(other.to_string())),
        }
    }
}

/// A stored contact observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Repository-assigned identifier.
    pub id: ContactId,
    /// Email address, if the observation carried one.
    pub email: Option<String>,
    /// Phone number, if the observation carried one.
    pub phone_number: Option<String>,
    /// Primary or secondary.
    pub link_precedence: LinkPrecedence,
    /// The cluster primary this contact points at (secondaries only).
    pub linked_to: Option<ContactId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last time the precedence or link was rewritten.
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Ordering key for "oldest": creation time, then id.
    #[must_use]
    pub fn age_key(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }

    /// Returns true if this contact is a cluster primary.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.link_precedence.is_primary()
    }

    /// Current link fields.
    #[must_use]
    pub const fn link_state(&self) -> LinkState {
        LinkState {
            precedence: self.link_precedence,
            linked_to: self.linked_to,
        }
    }

    /// Checks the local shape of the link fields.
    ///
    /// A primary never carries a link; a secondary always links to some other
    /// contact. Returns a description of the defect when the shape is broken.
    pub fn check_linkage(&self) -> Result<(), String> {
        match (self.link_precedence, self.linked_to) {
            (LinkPrecedence::Primary, None) => Ok(()),
            (LinkPrecedence::Primary, Some(target)) => {
                Err(format!("primary contact {} links to {target}", self.id))
            }
            (LinkPrecedence::Secondary, None) => {
                Err(format!("secondary contact {} has no link", self.id))
            }
            (LinkPrecedence::Secondary, Some(target)) if target == self.id => {
                Err(format!("secondary contact {} links to itself", self.id))
            }
            (LinkPrecedence::Secondary, Some(_)) => Ok(()),
        }
    }
}

/// The link fields of a contact, as one comparable value.
///
/// Precedence rewrites carry the state the caller last read; the repository
/// refuses the write if the stored contact no longer matches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkState {
    /// Primary or secondary.
    pub precedence: LinkPrecedence,
    /// Link target (secondaries only).
    pub linked_to: Option<ContactId>,
}

impl LinkState {
    /// An unlinked primary.
    #[must_use]
    pub const fn primary() -> Self {
        Self {
            precedence: LinkPrecedence::Primary,
            linked_to: None,
        }
    }

    /// A secondary linked to `root`.
    #[must_use]
    pub const fn secondary_of(root: ContactId) -> Self {
        Self {
            precedence: LinkPrecedence::Secondary,
            linked_to: Some(root),
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.linked_to {
            Some(target) => write!(f, "{} of {target}", self.precedence),
            None => f.write_str(self.precedence.as_str()),
        }
    }
}

/// Creation request handed to the repository.
///
/// The repository assigns `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    /// Email address.
    pub email: Option<String>,
    /// Phone number.
    pub phone_number: Option<String>,
    /// Precedence of the new contact.
    pub link_precedence: LinkPrecedence,
    /// Cluster primary for a secondary.
    pub linked_to: Option<ContactId>,
}

impl NewContact {
    /// A new cluster root.
    #[must_use]
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            link_precedence: LinkPrecedence::Primary,
            linked_to: None,
        }
    }

    /// A new member of the cluster rooted at `root`.
    #[must_use]
    pub fn secondary(email: Option<String>, phone_number: Option<String>, root: ContactId) -> Self {
        Self {
            email,
            phone_number,
            link_precedence: LinkPrecedence::Secondary,
            linked_to: Some(root),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: i64, precedence: LinkPrecedence, linked_to: Option<i64>) -> Contact {
        let now = Utc::now();
        Contact {
            id: ContactId::new(id),
            email: Some("doc@hillvalley.edu".to_string()),
            phone_number: None,
            link_precedence: precedence,
            linked_to: linked_to.map(ContactId::new),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn precedence_round_trips_through_storage_spelling() {
        for p in [LinkPrecedence::Primary, LinkPrecedence::Secondary] {
            assert_eq!(p.as_str().parse::<LinkPrecedence>().unwrap(), p);
        }
        assert!("PRIMARY".parse::<LinkPrecedence>().is_err());
    }

    #[test]
    fn precedence_serializes_lowercase() {
        let json = serde_json::to_string(&LinkPrecedence::Secondary).unwrap();
        assert_eq!(json, "\"secondary\"");
    }

    #[test]
    fn linkage_shape_is_checked() {
        assert!(contact(1, LinkPrecedence::Primary, None).check_linkage().is_ok());
        assert!(contact(2, LinkPrecedence::Secondary, Some(1)).check_linkage().is_ok());
        assert!(contact(1, LinkPrecedence::Primary, Some(2)).check_linkage().is_err());
        assert!(contact(2, LinkPrecedence::Secondary, None).check_linkage().is_err());
        assert!(contact(2, LinkPrecedence::Secondary, Some(2)).check_linkage().is_err());
    }

    #[test]
    fn age_key_breaks_timestamp_ties_by_id() {
        let a = contact(3, LinkPrecedence::Primary, None);
        let mut b = contact(4, LinkPrecedence::Primary, None);
        b.created_at = a.created_at;
        assert!(a.age_key() < b.age_key());
    }

    #[test]
    fn link_state_reflects_fields() {
        let c = contact(9, LinkPrecedence::Secondary, Some(1));
        assert_eq!(c.link_state(), LinkState::secondary_of(ContactId::new(1)));
        assert_ne!(c.link_state(), LinkState::primary());
        assert_eq!(c.link_state().to_string(), "secondary of 1");
    }

    #[test]
    fn contact_serializes_camel_case() {
        let c = contact(9, LinkPrecedence::Secondary, Some(1));
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["phoneNumber"], serde_json::Value::Null);
        assert_eq!(value["linkPrecedence"], "secondary");
        assert_eq!(value["linkedTo"], 1);
    }
}
