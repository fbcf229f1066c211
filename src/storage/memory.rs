//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! [`ContactRepository`]. It is intended for embedded usage, tests, and as a
//! reference implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::contact::{Contact, ContactId, LinkPrecedence, LinkState, NewContact};
use crate::storage::traits::{ContactRepository, PrecedenceUpdate, StorageError};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn sort_oldest_first(contacts: &mut [Contact]) {
    contacts.sort_by_key(Contact::age_key);
}

#[derive(Debug, Default)]
struct ContactState {
    by_id: BTreeMap<ContactId, Contact>,
    by_email: HashMap<String, BTreeSet<ContactId>>,
    by_phone: HashMap<String, BTreeSet<ContactId>>,
    linked_from: HashMap<ContactId, BTreeSet<ContactId>>,
    next_id: i64,
}

impl ContactState {
    fn index(&mut self, contact: &Contact) {
        if let Some(email) = &contact.email {
            self.by_email.entry(email.clone()).or_default().insert(contact.id);
        }
        if let Some(phone) = &contact.phone_number {
            self.by_phone.entry(phone.clone()).or_default().insert(contact.id);
        }
        if let Some(target) = contact.linked_to {
            self.linked_from.entry(target).or_default().insert(contact.id);
        }
    }

    fn unlink(&mut self, id: ContactId, target: ContactId) {
        if let Some(children) = self.linked_from.get_mut(&target) {
            children.remove(&id);
            if children.is_empty() {
                self.linked_from.remove(&target);
            }
        }
    }

    fn collect(&self, ids: impl IntoIterator<Item = ContactId>) -> Vec<Contact> {
        let mut out: Vec<Contact> = ids
            .into_iter()
            .filter_map(|id| self.by_id.get(&id).cloned())
            .collect();
        sort_oldest_first(&mut out);
        out
    }
}

/// Thread-safe in-memory contact store.
pub struct InMemoryContactStore {
    state: RwLock<ContactState>,
    clock: Clock,
}

impl fmt::Debug for InMemoryContactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryContactStore")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryContactStore {
    fn default() -> Self {
        Self::with_clock(Utc::now)
    }
}

impl InMemoryContactStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that stamps `created_at`/`updated_at` from `clock`.
    #[must_use]
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            state: RwLock::new(ContactState {
                next_id: 1,
                ..ContactState::default()
            }),
            clock: Arc::new(clock),
        }
    }

    /// Insert a fully specified record as-is.
    ///
    /// Used for imports and for reproducing damaged clusters. No linkage
    /// validation is performed; later ids continue after the largest seeded id.
    pub fn seed(&self, contact: Contact) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.seed"))?;
        if state.by_id.contains_key(&contact.id) {
            return Err(StorageError::BackendError(format!(
                "duplicate contact id: {}",
                contact.id
            )));
        }
        state.next_id = state.next_id.max(contact.id.get() + 1);
        state.index(&contact);
        state.by_id.insert(contact.id, contact);
        Ok(())
    }

    /// Number of stored contacts.
    pub fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.len"))?;
        Ok(state.by_id.len())
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl ContactRepository for InMemoryContactStore {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("contact.find_by_email_or_phone"))?;

        let mut ids = BTreeSet::new();
        if let Some(hits) = email.and_then(|e| state.by_email.get(e)) {
            ids.extend(hits.iter().copied());
        }
        if let Some(hits) = phone.and_then(|p| state.by_phone.get(p)) {
            ids.extend(hits.iter().copied());
        }
        Ok(state.collect(ids))
    }

    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.find_by_id"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn find_cluster_members(&self, root: ContactId) -> Result<Vec<Contact>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("contact.find_cluster_members"))?;

        let mut seen: HashSet<ContactId> = HashSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(children) = state.linked_from.get(&id) {
                queue.extend(children.iter().copied());
            }
        }
        Ok(state.collect(seen))
    }

    fn create_contact(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("contact.create"))?;

        if let Some(target) = contact.linked_to {
            match state.by_id.get(&target) {
                Some(t) if t.is_primary() => {}
                Some(_) => {
                    return Err(StorageError::Conflict(format!(
                        "link target {target} is no longer a primary"
                    )))
                }
                None => {
                    return Err(StorageError::Conflict(format!(
                        "link target {target} does not exist"
                    )))
                }
            }
        }

        let id = ContactId::new(state.next_id);
        state.next_id += 1;
        let now = (self.clock)();
        let stored = Contact {
            id,
            email: contact.email,
            phone_number: contact.phone_number,
            link_precedence: contact.link_precedence,
            linked_to: contact.linked_to,
            created_at: now,
            updated_at: now,
        };
        state.index(&stored);
        state.by_id.insert(id, stored.clone());
        Ok(stored)
    }

    fn set_precedence(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_to: Option<ContactId>,
        expected: LinkState,
    ) -> Result<PrecedenceUpdate, StorageError> {
        if linked_to == Some(id) {
            return Err(StorageError::Conflict(format!("contact {id} cannot link to itself")));
        }
        if precedence.is_primary() != linked_to.is_none() {
            return Err(StorageError::BackendError(format!(
                "invalid rewrite for contact {id}: {precedence} with link {linked_to:?}"
            )));
        }

        let mut state = self.state.write().map_err(|_| lock_err("contact.set_precedence"))?;

        let current = state
            .by_id
            .get(&id)
            .ok_or(StorageError::ContactNotFound(id))?;
        let found = current.link_state();
        if found.precedence == precedence && found.linked_to == linked_to {
            return Ok(PrecedenceUpdate::Unchanged);
        }
        if found != expected {
            return Err(StorageError::Conflict(format!(
                "contact {id} is {found}, expected {expected}"
            )));
        }
        let previous_target = current.linked_to;

        if let Some(target) = linked_to {
            match state.by_id.get(&target) {
                Some(t) if t.is_primary() => {}
                Some(_) => {
                    return Err(StorageError::Conflict(format!(
                        "link target {target} is no longer a primary"
                    )))
                }
                None => {
                    return Err(StorageError::Conflict(format!(
                        "link target {target} does not exist"
                    )))
                }
            }
        }

        if let Some(old) = previous_target {
            state.unlink(id, old);
        }
        if let Some(target) = linked_to {
            state.linked_from.entry(target).or_default().insert(id);
        }

        let now = (self.clock)();
        if let Some(contact) = state.by_id.get_mut(&id) {
            contact.link_precedence = precedence;
            contact.linked_to = linked_to;
            contact.updated_at = now;
        }
        Ok(PrecedenceUpdate::Applied)
    }

    fn list_all(&self) -> Result<Vec<Contact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("contact.list_all"))?;
        Ok(state.collect(state.by_id.keys().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    fn seeded(id: i64, precedence: LinkPrecedence, linked_to: Option<i64>, email: &str) -> Contact {
        let at = Utc::now() - Duration::hours(10 - id);
        Contact {
            id: ContactId::new(id),
            email: Some(email.to_string()),
            phone_number: None,
            link_precedence: precedence,
            linked_to: linked_to.map(ContactId::new),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn create_assigns_monotonic_ids() {
        let store = InMemoryContactStore::new();
        let a = store
            .create_contact(NewContact::primary(Some("a@x.com".to_string()), None))
            .unwrap();
        let b = store
            .create_contact(NewContact::primary(None, Some("123".to_string())))
            .unwrap();
        assert!(a.id < b.id);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn lookup_matches_only_supplied_fields() {
        let store = InMemoryContactStore::new();
        store
            .create_contact(NewContact::primary(Some("a@x.com".to_string()), None))
            .unwrap();
        store
            .create_contact(NewContact::primary(None, Some("123".to_string())))
            .unwrap();

        assert_eq!(store.find_by_email_or_phone(Some("a@x.com"), None).unwrap().len(), 1);
        assert_eq!(
            store.find_by_email_or_phone(Some("a@x.com"), Some("123")).unwrap().len(),
            2
        );
        assert!(store.find_by_email_or_phone(None, None).unwrap().is_empty());
    }

    #[test]
    fn lookup_orders_by_creation_time_not_id() {
        let store = InMemoryContactStore::new();
        let mut late = seeded(1, LinkPrecedence::Primary, None, "a@x.com");
        late.created_at = Utc::now();
        store.seed(late).unwrap();
        store.seed(seeded(2, LinkPrecedence::Primary, None, "a@x.com")).unwrap();

        let found = store.find_by_email_or_phone(Some("a@x.com"), None).unwrap();
        let ids: Vec<i64> = found.iter().map(|c| c.id.get()).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn cluster_members_are_flattened() {
        let store = InMemoryContactStore::new();
        store.seed(seeded(1, LinkPrecedence::Primary, None, "a@x.com")).unwrap();
        store.seed(seeded(2, LinkPrecedence::Secondary, Some(1), "b@x.com")).unwrap();
        // Chain left behind by a merge that only demoted 2's former primary.
        store.seed(seeded(3, LinkPrecedence::Secondary, Some(2), "c@x.com")).unwrap();
        store.seed(seeded(4, LinkPrecedence::Primary, None, "d@x.com")).unwrap();

        let members = store.find_cluster_members(ContactId::new(1)).unwrap();
        let ids: Vec<i64> = members.iter().map(|c| c.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn cluster_members_survive_cycles() {
        let store = InMemoryContactStore::new();
        store.seed(seeded(1, LinkPrecedence::Secondary, Some(2), "a@x.com")).unwrap();
        store.seed(seeded(2, LinkPrecedence::Secondary, Some(1), "b@x.com")).unwrap();
        let members = store.find_cluster_members(ContactId::new(1)).unwrap();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn set_precedence_is_idempotent() {
        let store = InMemoryContactStore::new();
        store.seed(seeded(1, LinkPrecedence::Primary, None, "a@x.com")).unwrap();
        store.seed(seeded(2, LinkPrecedence::Primary, None, "b@x.com")).unwrap();

        let first = store
            .set_precedence(
                ContactId::new(2),
                LinkPrecedence::Secondary,
                Some(ContactId::new(1)),
                LinkState::primary(),
            )
            .unwrap();
        let second = store
            .set_precedence(
                ContactId::new(2),
                LinkPrecedence::Secondary,
                Some(ContactId::new(1)),
                LinkState::primary(),
            )
            .unwrap();
        assert_eq!(first, PrecedenceUpdate::Applied);
        assert_eq!(second, PrecedenceUpdate::Unchanged);

        let members = store.find_cluster_members(ContactId::new(1)).unwrap();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn set_precedence_rejects_stale_expected_state() {
        let store = InMemoryContactStore::new();
        store.seed(seeded(1, LinkPrecedence::Primary, None, "a@x.com")).unwrap();
        store.seed(seeded(2, LinkPrecedence::Primary, None, "b@x.com")).unwrap();
        store.seed(seeded(3, LinkPrecedence::Primary, None, "c@x.com")).unwrap();

        // One writer demotes 3 under 2.
        store
            .set_precedence(
                ContactId::new(3),
                LinkPrecedence::Secondary,
                Some(ContactId::new(2)),
                LinkState::primary(),
            )
            .unwrap();

        // A second writer still believes 3 is a primary.
        let err = store
            .set_precedence(
                ContactId::new(3),
                LinkPrecedence::Secondary,
                Some(ContactId::new(1)),
                LinkState::primary(),
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let three = store.find_by_id(ContactId::new(3)).unwrap().unwrap();
        assert_eq!(three.linked_to, Some(ContactId::new(2)));

        // Repointing with the state actually stored goes through.
        let update = store
            .set_precedence(
                ContactId::new(3),
                LinkPrecedence::Secondary,
                Some(ContactId::new(1)),
                LinkState::secondary_of(ContactId::new(2)),
            )
            .unwrap();
        assert!(update.is_applied());
    }

    #[test]
    fn set_precedence_rejects_demoted_target() {
        let store = InMemoryContactStore::new();
        store.seed(seeded(1, LinkPrecedence::Primary, None, "a@x.com")).unwrap();
        store.seed(seeded(2, LinkPrecedence::Secondary, Some(1), "b@x.com")).unwrap();
        store.seed(seeded(3, LinkPrecedence::Primary, None, "c@x.com")).unwrap();

        let err = store
            .set_precedence(
                ContactId::new(3),
                LinkPrecedence::Secondary,
                Some(ContactId::new(2)),
                LinkState::primary(),
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let err = store
            .set_precedence(
                ContactId::new(3),
                LinkPrecedence::Secondary,
                Some(ContactId::new(3)),
                LinkState::primary(),
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let err = store
            .set_precedence(
                ContactId::new(99),
                LinkPrecedence::Secondary,
                Some(ContactId::new(1)),
                LinkState::primary(),
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::ContactNotFound(_)));
    }

    #[test]
    fn create_rejects_secondary_of_non_primary() {
        let store = InMemoryContactStore::new();
        store.seed(seeded(1, LinkPrecedence::Primary, None, "a@x.com")).unwrap();
        store.seed(seeded(2, LinkPrecedence::Secondary, Some(1), "b@x.com")).unwrap();

        let err = store
            .create_contact(NewContact::secondary(None, Some("5".to_string()), ContactId::new(2)))
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn seed_rejects_duplicates_and_advances_ids() {
        let store = InMemoryContactStore::new();
        store.seed(seeded(7, LinkPrecedence::Primary, None, "a@x.com")).unwrap();
        assert!(store.seed(seeded(7, LinkPrecedence::Primary, None, "a@x.com")).is_err());

        let next = store
            .create_contact(NewContact::primary(Some("b@x.com".to_string()), None))
            .unwrap();
        assert_eq!(next.id, ContactId::new(8));
    }

    #[test]
    fn injected_clock_stamps_records() {
        let fixed = Utc::now() - Duration::days(3);
        let store = InMemoryContactStore::with_clock(move || fixed);
        let c = store
            .create_contact(NewContact::primary(Some("a@x.com".to_string()), None))
            .unwrap();
        assert_eq!(c.created_at, fixed);
        assert_eq!(c.updated_at, fixed);
    }
}
