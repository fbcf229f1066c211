//! Consolidated identity view.
//!
//! A cluster is folded into one summary: the primary id, every distinct email
//! and phone number in first-seen order, and the secondary ids.

use std::collections::HashSet;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId};
use crate::observation::Observation;

/// Insertion-ordered set.
///
/// Iteration yields elements in the order they were first inserted, which
/// keeps response payloads deterministic.
#[derive(Debug, Clone)]
pub struct OrderedSet<T> {
    items: Vec<T>,
    seen: HashSet<T>,
}

impl<T> Default for OrderedSet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

impl<T: Eq + Hash + Clone> OrderedSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value`, returning false if it was already present.
    pub fn insert(&mut self, value: T) -> bool {
        if self.seen.contains(&value) {
            return false;
        }
        self.seen.insert(value.clone());
        self.items.push(value);
        true
    }

    /// Returns true if `value` is present.
    #[must_use]
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.seen.contains(value)
    }

    /// Number of distinct elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Consumes the set, returning elements in insertion order.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Eq + Hash + Clone> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

/// Canonical view of one identity cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedIdentity {
    /// The cluster's primary contact.
    pub primary_contact_id: ContactId,
    /// Distinct emails, primary's first.
    pub emails: Vec<String>,
    /// Distinct phone numbers, primary's first.
    pub phone_numbers: Vec<String>,
    /// Every secondary in the cluster, oldest first.
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Accumulates cluster members into a [`ConsolidatedIdentity`].
#[derive(Debug, Clone)]
pub struct ClusterView {
    root: ContactId,
    emails: OrderedSet<String>,
    phone_numbers: OrderedSet<String>,
    secondary_ids: Vec<ContactId>,
}

impl ClusterView {
    /// Starts a view rooted at `root`.
    #[must_use]
    pub fn new(root: ContactId) -> Self {
        Self {
            root,
            emails: OrderedSet::new(),
            phone_numbers: OrderedSet::new(),
            secondary_ids: Vec::new(),
        }
    }

    /// Builds a view from members.
    ///
    /// The root contributes first regardless of its position in `members`;
    /// the rest contribute in `(created_at, id)` order.
    #[must_use]
    pub fn from_members(root: ContactId, members: &[Contact]) -> Self {
        let mut ordered: Vec<&Contact> = members.iter().collect();
        ordered.sort_by_key(|c| (c.id != root, c.age_key()));

        let mut view = Self::new(root);
        for contact in ordered {
            view.add(contact);
        }
        view
    }

    /// Adds one member.
    pub fn add(&mut self, contact: &Contact) {
        if let Some(email) = &contact.email {
            self.emails.insert(email.clone());
        }
        if let Some(phone) = &contact.phone_number {
            self.phone_numbers.insert(phone.clone());
        }
        if contact.id != self.root && !self.secondary_ids.contains(&contact.id) {
            self.secondary_ids.push(contact.id);
        }
    }

    /// Cluster root.
    #[must_use]
    pub const fn root(&self) -> ContactId {
        self.root
    }

    /// Returns true when every field the observation carries is already known.
    ///
    /// Absent fields count as known.
    #[must_use]
    pub fn covers(&self, observation: &Observation) -> bool {
        let email_known = observation.email().map_or(true, |e| self.emails.contains(e));
        let phone_known = observation
            .phone_number()
            .map_or(true, |p| self.phone_numbers.contains(p));
        email_known && phone_known
    }

    /// Finishes the view.
    #[must_use]
    pub fn into_identity(self) -> ConsolidatedIdentity {
        ConsolidatedIdentity {
            primary_contact_id: self.root,
            emails: self.emails.into_vec(),
            phone_numbers: self.phone_numbers.into_vec(),
            secondary_contact_ids: self.secondary_ids,
        }
    }
}
