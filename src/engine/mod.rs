//! Identity resolution engine.
//!
//! Given an observation, the engine finds every cluster the observation
//! touches, merges them under the oldest primary when it bridges more than
//! one, records the observation as a new contact when it adds information,
//! and returns the consolidated view of the resulting cluster.
//!
//! The engine is synchronous and holds no state besides its repository handle
//! and the identity-key locks. It never retries; a retryable error is handed
//! back to the caller.

mod locks;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::config::{EngineConfig, FlattenPolicy};
use crate::contact::{Contact, ContactId, LinkPrecedence, NewContact};
use crate::error::{EngineResult, ResolveError};
use crate::identity::{ClusterView, ConsolidatedIdentity};
use crate::observation::Observation;
use crate::storage::ContactRepository;

pub use locks::{KeyGuard, KeyLocks};

/// Upper bound on `linked_to` hops followed while looking for a root.
pub const MAX_LINK_HOPS: usize = 64;

/// What a single resolution did, besides returning the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOutcome {
    /// The consolidated view of the cluster.
    pub identity: ConsolidatedIdentity,
    /// Contact created by this call (primary or secondary), if any.
    pub created: Option<ContactId>,
    /// Former primaries demoted under the surviving root.
    pub demoted: Vec<ContactId>,
    /// Secondaries whose stale link was rewritten to the root.
    pub repointed: Vec<ContactId>,
}

impl ResolveOutcome {
    fn new(identity: ConsolidatedIdentity) -> Self {
        Self {
            identity,
            created: None,
            demoted: Vec::new(),
            repointed: Vec::new(),
        }
    }

    /// Number of repository writes performed.
    #[must_use]
    pub fn writes(&self) -> usize {
        usize::from(self.created.is_some()) + self.demoted.len() + self.repointed.len()
    }
}

/// Identity resolution engine.
#[derive(Clone)]
pub struct IdentityEngine {
    contacts: Arc<dyn ContactRepository>,
    config: EngineConfig,
    locks: Arc<KeyLocks>,
}

impl std::fmt::Debug for IdentityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityEngine")
            .field("config", &self.config)
            .field("lock_stripes", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl IdentityEngine {
    /// Create an engine over `contacts` with the default configuration.
    #[must_use]
    pub fn new(contacts: Arc<dyn ContactRepository>) -> Self {
        Self::with_config(contacts, EngineConfig::default())
    }

    /// Create an engine with an explicit configuration.
    #[must_use]
    pub fn with_config(contacts: Arc<dyn ContactRepository>, config: EngineConfig) -> Self {
        let locks = Arc::new(KeyLocks::new(config.lock_stripes));
        Self {
            contacts,
            config,
            locks,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Round-trips the repository once; used by health checks.
    pub fn probe(&self) -> EngineResult<()> {
        self.contacts.find_by_id(ContactId::new(0))?;
        Ok(())
    }

    /// Validate raw fields and resolve them.
    ///
    /// # Errors
    /// `InvalidInput` when neither field is usable, otherwise as [`Self::resolve`].
    pub fn resolve_parts(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> EngineResult<ConsolidatedIdentity> {
        let observation = Observation::new(email, phone_number)?;
        self.resolve(&observation)
    }

    /// Resolve an observation into its consolidated identity.
    ///
    /// # Errors
    /// - `RepositoryUnavailable`: a repository call failed
    /// - `Conflict`: a concurrent writer changed the cluster mid-resolution
    /// - `ConsistencyViolation`: stored linkage is corrupt
    pub fn resolve(&self, observation: &Observation) -> EngineResult<ConsolidatedIdentity> {
        self.resolve_detailed(observation).map(|o| o.identity)
    }

    /// Like [`Self::resolve`], also reporting the writes performed.
    pub fn resolve_detailed(&self, observation: &Observation) -> EngineResult<ResolveOutcome> {
        let span = tracing::info_span!(
            "idresolve.resolve",
            email = observation.email().unwrap_or("-"),
            phone = observation.phone_number().unwrap_or("-"),
        );
        let _entered = span.enter();

        let keys = observation.identity_keys();
        let _guard = self.locks.acquire(&keys);

        match self.resolve_locked(observation) {
            Ok(outcome) => {
                tracing::debug!(
                    primary = %outcome.identity.primary_contact_id,
                    writes = outcome.writes(),
                    "resolved"
                );
                Ok(outcome)
            }
            Err(err @ ResolveError::ConsistencyViolation { .. }) => {
                tracing::error!(error = %err, "corrupted cluster linkage; manual repair required");
                Err(err)
            }
            Err(err) => {
                tracing::warn!(error = %err, retryable = err.is_retryable(), "resolution failed");
                Err(err)
            }
        }
    }

    fn resolve_locked(&self, observation: &Observation) -> EngineResult<ResolveOutcome> {
        let matched = self
            .contacts
            .find_by_email_or_phone(observation.email(), observation.phone_number())?;
        tracing::debug!(matched = matched.len(), "lookup complete");

        if matched.is_empty() {
            return self.create_primary(observation);
        }

        let roots = self.candidate_roots(&matched)?;
        let (root, others) = roots
            .split_first()
            .ok_or_else(|| ResolveError::internal("matched contacts produced no root"))?;

        let mut demoted = Vec::new();
        for other in others {
            if self.demote(root, other)? {
                demoted.push(other.id);
            }
        }
        if !demoted.is_empty() {
            tracing::info!(root = %root.id, demoted = ?demoted, "merged clusters");
        }

        let (members, repointed) = self.cluster_members(root)?;
        let mut view = ClusterView::from_members(root.id, &members);

        let mut created = None;
        if !view.covers(observation) {
            let contact = self.contacts.create_contact(NewContact::secondary(
                observation.email().map(str::to_string),
                observation.phone_number().map(str::to_string),
                root.id,
            ))?;
            tracing::info!(contact = %contact.id, root = %root.id, "created secondary contact");
            view.add(&contact);
            created = Some(contact.id);
        }

        Ok(ResolveOutcome {
            identity: view.into_identity(),
            created,
            demoted,
            repointed,
        })
    }

    fn create_primary(&self, observation: &Observation) -> EngineResult<ResolveOutcome> {
        let contact = self.contacts.create_contact(NewContact::primary(
            observation.email().map(str::to_string),
            observation.phone_number().map(str::to_string),
        ))?;
        tracing::info!(contact = %contact.id, "created primary contact");

        let mut view = ClusterView::new(contact.id);
        view.add(&contact);
        let mut outcome = ResolveOutcome::new(view.into_identity());
        outcome.created = Some(contact.id);
        Ok(outcome)
    }

    /// Distinct cluster roots reached from `matched`, oldest first.
    fn candidate_roots(&self, matched: &[Contact]) -> EngineResult<Vec<Contact>> {
        let mut roots: BTreeMap<ContactId, Contact> = BTreeMap::new();
        let mut resolved: HashMap<ContactId, Contact> = HashMap::new();

        for contact in matched {
            check_linkage(contact)?;
            let root = if contact.is_primary() {
                contact.clone()
            } else {
                self.follow_to_root(contact, &mut resolved)?
            };
            roots.entry(root.id).or_insert(root);
        }

        let mut roots: Vec<Contact> = roots.into_values().collect();
        roots.sort_by_key(Contact::age_key);
        Ok(roots)
    }

    /// Walks `linked_to` from a secondary until a primary is reached.
    fn follow_to_root(
        &self,
        start: &Contact,
        resolved: &mut HashMap<ContactId, Contact>,
    ) -> EngineResult<Contact> {
        let mut visited = HashSet::from([start.id]);
        let mut current = start.clone();

        for _ in 0..MAX_LINK_HOPS {
            let Some(target_id) = current.linked_to else {
                return Err(ResolveError::consistency(current.id, "secondary has no link"));
            };
            if let Some(root) = resolved.get(&target_id) {
                return Ok(root.clone());
            }
            if !visited.insert(target_id) {
                return Err(ResolveError::consistency(
                    current.id,
                    format!("link cycle through {target_id}"),
                ));
            }

            let target = self.contacts.find_by_id(target_id)?.ok_or_else(|| {
                ResolveError::consistency(
                    current.id,
                    format!("linked_to {target_id} does not resolve to a stored contact"),
                )
            })?;
            check_linkage(&target)?;

            if target.is_primary() {
                if current.id != start.id {
                    tracing::warn!(
                        contact = %start.id,
                        root = %target.id,
                        "secondary reaches its primary through a chain"
                    );
                }
                resolved.insert(target_id, target.clone());
                return Ok(target);
            }
            current = target;
        }

        Err(ResolveError::consistency(
            start.id,
            format!("link chain exceeds {MAX_LINK_HOPS} hops"),
        ))
    }

    /// Demotes `other` under `root`. Returns true if a write happened.
    ///
    /// The write is conditional on `other` still being the primary read here;
    /// a concurrent re-home surfaces as `Conflict`.
    fn demote(&self, root: &Contact, other: &Contact) -> EngineResult<bool> {
        let update = self.contacts.set_precedence(
            other.id,
            LinkPrecedence::Secondary,
            Some(root.id),
            other.link_state(),
        )?;
        Ok(update.is_applied())
    }

    /// Reads the flattened cluster under `root`, repairing stale links when
    /// the policy asks for it.
    fn cluster_members(&self, root: &Contact) -> EngineResult<(Vec<Contact>, Vec<ContactId>)> {
        let mut members = self.contacts.find_cluster_members(root.id)?;
        let mut repointed = Vec::new();

        let mut saw_root = false;
        for member in &mut members {
            check_linkage(member)?;
            if member.id == root.id {
                if !member.is_primary() {
                    return Err(ResolveError::Conflict {
                        message: format!("root {} was demoted concurrently", root.id),
                    });
                }
                saw_root = true;
                continue;
            }
            if member.linked_to == Some(root.id) {
                continue;
            }
            if self.config.flatten_policy == FlattenPolicy::Rewrite {
                let from = member.linked_to;
                let update = self.contacts.set_precedence(
                    member.id,
                    LinkPrecedence::Secondary,
                    Some(root.id),
                    member.link_state(),
                )?;
                member.linked_to = Some(root.id);
                if update.is_applied() {
                    tracing::info!(contact = %member.id, from = ?from, root = %root.id, "repointed secondary");
                    repointed.push(member.id);
                }
            }
        }

        if !saw_root {
            return Err(ResolveError::Conflict {
                message: format!("root {} disappeared during resolution", root.id),
            });
        }
        Ok((members, repointed))
    }
}

fn check_linkage(contact: &Contact) -> EngineResult<()> {
    contact
        .check_linkage()
        .map_err(|message| ResolveError::consistency(contact.id, message))
}
