//! Authorization gate contract and reference policies.
//!
//! The gate is a capability interface: `authenticate` answers for the
//! caller as a whole, `authorize` answers per record. Replication code
//! depends only on the [`AuthorizationGate`] trait.

use crate::change::ChangeEntry;
use crate::operation::{Access, Operation};
use crate::record::{Record, RecordId};

/// Who is asking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    principal: Option<String>,
    bearer: Option<String>,
}

impl CallerIdentity {
    /// A caller with no identity at all.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An in-process caller whose principal is already established.
    pub fn principal(name: impl Into<String>) -> Self {
        Self {
            principal: Some(name.into()),
            bearer: None,
        }
    }

    /// A remote caller presenting a bearer token.
    ///
    /// The principal is unknown until a validator resolves the token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            principal: None,
            bearer: Some(token.into()),
        }
    }

    /// Attaches the principal a validator resolved from the token.
    pub fn with_principal(mut self, name: impl Into<String>) -> Self {
        self.principal = Some(name.into());
        self
    }

    /// Returns the principal name, if established.
    pub fn principal_name(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Returns the bearer token, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    /// Returns true if the caller carries neither a principal nor a token.
    pub fn is_anonymous(&self) -> bool {
        self.principal.is_none() && self.bearer.is_none()
    }
}

/// Result of authenticating a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// Caller identity is valid.
    Valid,
    /// Caller identity is invalid.
    Invalid(String),
}

/// Per-record decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Access granted.
    Allow,
    /// Access denied.
    Deny,
}

/// A single per-record authorization question.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    /// Collection of the record.
    pub collection: &'a str,
    /// Record being accessed.
    pub record_id: &'a RecordId,
    /// Mutation carried by the change.
    pub operation: Operation,
    /// Whether the record is being read or written.
    pub access: Access,
    /// State currently stored by the replica answering, if any. For a
    /// delete being read this is the last live state of the record.
    pub current: Option<&'a Record>,
    /// State the change would write, if any.
    pub proposed: Option<&'a Record>,
}

/// Pluggable authorization policy.
///
/// Implementations must be side-effect free: replication may ask the
/// same question more than once.
pub trait AuthorizationGate: Send + Sync {
    /// Checks the caller identity as a whole.
    fn authenticate(&self, caller: &CallerIdentity) -> Authentication;

    /// Decides whether the caller may perform `request`.
    fn authorize(&self, caller: &CallerIdentity, request: &AccessRequest<'_>) -> Decision;
}

/// Entries split by the gate's decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorized {
    /// Entries the caller may access.
    pub allowed: Vec<ChangeEntry>,
    /// Records silently filtered out.
    pub denied: Vec<RecordId>,
}

impl Authorized {
    /// Returns true if entries were offered and every one was denied.
    pub fn is_wholesale_denial(&self) -> bool {
        self.allowed.is_empty() && !self.denied.is_empty()
    }
}

/// Asks the gate about every entry individually.
///
/// `current` looks up the state the answering replica holds for a record.
/// All decisions are made before anything is returned, so callers never
/// apply a partially authorized batch.
pub fn filter_authorized<G, F>(
    gate: &G,
    caller: &CallerIdentity,
    access: Access,
    entries: Vec<ChangeEntry>,
    current: F,
) -> Authorized
where
    G: AuthorizationGate + ?Sized,
    F: Fn(&ChangeEntry) -> Option<Record>,
{
    let mut result = Authorized::default();
    for entry in entries {
        let stored = current(&entry);
        let request = AccessRequest {
            collection: &entry.collection,
            record_id: &entry.record_id,
            operation: entry.operation,
            access,
            current: stored.as_ref(),
            proposed: entry.record.as_ref(),
        };
        match gate.authorize(caller, &request) {
            Decision::Allow => result.allowed.push(entry),
            Decision::Deny => result.denied.push(entry.record_id),
        }
    }
    result
}

/// Gate that accepts everyone and everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AuthorizationGate for AllowAll {
    fn authenticate(&self, _caller: &CallerIdentity) -> Authentication {
        Authentication::Valid
    }

    fn authorize(&self, _caller: &CallerIdentity, _request: &AccessRequest<'_>) -> Decision {
        Decision::Allow
    }
}

/// How [`OwnerPolicy`] finds the owner of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerRule {
    /// The record id is the owning principal (a user owns its own row).
    RecordId,
    /// A text field names the owning principal.
    Field(String),
}

/// Callers may only touch records they own.
///
/// Authentication requires an established principal. For writes, both the
/// stored state and the proposed state must belong to the caller, so a
/// write cannot hand a record over to someone else.
#[derive(Debug, Clone)]
pub struct OwnerPolicy {
    rule: OwnerRule,
}

impl OwnerPolicy {
    /// Owner is the record id.
    pub fn by_record_id() -> Self {
        Self {
            rule: OwnerRule::RecordId,
        }
    }

    /// Owner is named by a text field.
    pub fn by_field(field: impl Into<String>) -> Self {
        Self {
            rule: OwnerRule::Field(field.into()),
        }
    }

    fn owns(&self, principal: &str, record_id: &RecordId, record: Option<&Record>) -> bool {
        match &self.rule {
            OwnerRule::RecordId => record_id.as_str() == principal,
            OwnerRule::Field(field) => {
                record.and_then(|r| r.text(field)) == Some(principal)
            }
        }
    }
}

impl AuthorizationGate for OwnerPolicy {
    fn authenticate(&self, caller: &CallerIdentity) -> Authentication {
        match caller.principal_name() {
            Some(name) if !name.is_empty() => Authentication::Valid,
            _ => Authentication::Invalid("no principal established".into()),
        }
    }

    fn authorize(&self, caller: &CallerIdentity, request: &AccessRequest<'_>) -> Decision {
        let Some(principal) = caller.principal_name() else {
            return Decision::Deny;
        };

        let allowed = match request.access {
            Access::Read => {
                let state = request.current.or(request.proposed);
                self.owns(principal, request.record_id, state)
            }
            Access::Write => {
                let current_ok = request.current.is_none()
                    || self.owns(principal, request.record_id, request.current);
                let proposed_ok = request.proposed.is_none()
                    || self.owns(principal, request.record_id, request.proposed);
                let anything_known = request.current.is_some() || request.proposed.is_some();
                let by_id = matches!(self.rule, OwnerRule::RecordId)
                    && self.owns(principal, request.record_id, None);
                current_ok && proposed_ok && (anything_known || by_id)
            }
        };

        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}
