//! Caller identity, scopes, and roles.
//!
//! Credentials resolve to a `Principal` carrying a set of scopes (what the
//! caller may do, e.g. `audit:append`) and roles (who the caller is, e.g.
//! `auditor`).  Both are opaque strings; the access policy decides which ones
//! matter for which operation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Scope required to append records.
pub const SCOPE_APPEND: &str = "audit:append";

/// Scope required, in addition to a reader role, to export records.
pub const SCOPE_EXPORT: &str = "audit:export";

/// An opaque scope token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope(pub String);

impl Scope {
    /// Construct a scope from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// The full set of scopes granted to a credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet {
    inner: HashSet<Scope>,
}

impl ScopeSet {
    /// Grant a scope to this set.
    pub fn grant(&mut self, scope: Scope) {
        self.inner.insert(scope);
    }

    /// Return true if the set contains the given scope.
    pub fn has(&self, scope: &str) -> bool {
        self.inner.iter().any(|s| s.0 == scope)
    }

    /// Return an iterator over all granted scopes.
    pub fn all(&self) -> impl Iterator<Item = &Scope> {
        self.inner.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = ScopeSet::default();
        for s in iter {
            set.grant(Scope::new(s));
        }
        set
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable name of the caller, used in logs.
    pub subject: String,
    pub scopes: ScopeSet,
    pub roles: HashSet<String>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// The gated operations of the ledger's external interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Append,
    Search,
    Verify,
    Export,
    Stats,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Append => "append",
            Operation::Search => "search",
            Operation::Verify => "verify",
            Operation::Export => "export",
            Operation::Stats => "stats",
        }
    }
}
