//! TOML-driven access policy implementation.
//!
//! `TomlAccessPolicy` loads an `AccessConfig` from a TOML string or file and
//! implements the `AccessPolicy` trait from ledger-core.
//!
//! Evaluation:
//!
//! 1. `authenticate` hashes the presented bearer token and looks the digest
//!    up among the configured credentials.  No token or an unknown digest is
//!    `Unauthorized`.
//! 2. `authorize` maps the operation to its requirement:
//!    - append → scope `audit:append`
//!    - search, verify, stats → any role in `reader_roles`
//!    - export → a reader role AND scope `audit:export`
//!
//!    A missing requirement is `Forbidden`.
//! 3. `check_module` admits only allow-listed modules (`ModuleNotAllowed`).

use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use ledger_contracts::{
    capability::{Operation, Principal, ScopeSet, SCOPE_APPEND, SCOPE_EXPORT},
    error::{LedgerError, LedgerResult},
};
use ledger_core::traits::AccessPolicy;

use crate::rule::AccessConfig;

/// Hex SHA-256 of a bearer token, the form stored in the policy file.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// An `AccessPolicy` built from a TOML document.
///
/// ```rust,ignore
/// use ledger_policy::TomlAccessPolicy;
///
/// let policy = TomlAccessPolicy::from_file(Path::new("access.toml"))?;
/// ```
#[derive(Debug)]
pub struct TomlAccessPolicy {
    config: AccessConfig,
    /// token digest → principal
    principals: HashMap<String, Principal>,
}

impl TomlAccessPolicy {
    /// Build a policy from an already-parsed config.
    ///
    /// Returns `LedgerError::Config` for a malformed token digest or a digest
    /// listed twice.
    pub fn from_config(config: AccessConfig) -> LedgerResult<Self> {
        let mut principals = HashMap::new();
        for cred in &config.credentials {
            let digest = cred.token_sha256.trim().to_ascii_lowercase();
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(LedgerError::Config {
                    reason: format!(
                        "credential '{}' has a token_sha256 that is not 64 hex characters",
                        cred.subject
                    ),
                });
            }
            let principal = Principal {
                subject: cred.subject.clone(),
                scopes: cred.scopes.iter().cloned().collect::<ScopeSet>(),
                roles: cred.roles.iter().cloned().collect(),
            };
            if principals.insert(digest, principal).is_some() {
                return Err(LedgerError::Config {
                    reason: format!("credential '{}' reuses another credential's token", cred.subject),
                });
            }
        }
        Ok(Self { config, principals })
    }

    /// Parse `s` as TOML and build a policy.
    ///
    /// Returns `LedgerError::Config` if the TOML is malformed or does not
    /// match the expected `AccessConfig` schema.
    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: AccessConfig = toml::from_str(s).map_err(|e| LedgerError::Config {
            reason: format!("failed to parse access policy TOML: {}", e),
        })?;
        Self::from_config(config)
    }

    /// Read the file at `path` and parse it as an access policy.
    pub fn from_file(path: &Path) -> LedgerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| LedgerError::Config {
            reason: format!("failed to read access policy '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    fn has_reader_role(&self, principal: &Principal) -> bool {
        self.config
            .reader_roles
            .iter()
            .any(|role| principal.has_role(role))
    }
}

impl AccessPolicy for TomlAccessPolicy {
    fn authenticate(&self, bearer: Option<&str>) -> LedgerResult<Principal> {
        let token = bearer
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LedgerError::Unauthorized {
                reason: "missing bearer credential".to_string(),
            })?;

        match self.principals.get(&hash_token(token)) {
            Some(principal) => {
                debug!(subject = %principal.subject, "credential accepted");
                Ok(principal.clone())
            }
            None => {
                warn!("unknown bearer credential presented");
                Err(LedgerError::Unauthorized {
                    reason: "unknown credential".to_string(),
                })
            }
        }
    }

    fn authorize(&self, principal: &Principal, operation: Operation) -> LedgerResult<()> {
        let denial = match operation {
            Operation::Append if !principal.scopes.has(SCOPE_APPEND) => {
                Some(format!("scope '{SCOPE_APPEND}' is required"))
            }
            Operation::Append => None,
            Operation::Search | Operation::Verify | Operation::Stats | Operation::Export
                if !self.has_reader_role(principal) =>
            {
                Some(format!(
                    "one of the roles [{}] is required",
                    self.config.reader_roles.join(", ")
                ))
            }
            Operation::Export if !principal.scopes.has(SCOPE_EXPORT) => {
                Some(format!("scope '{SCOPE_EXPORT}' is required"))
            }
            Operation::Search | Operation::Verify | Operation::Stats | Operation::Export => None,
        };

        match denial {
            None => Ok(()),
            Some(reason) => {
                warn!(
                    subject = %principal.subject,
                    operation = operation.as_str(),
                    %reason,
                    "operation denied"
                );
                Err(LedgerError::Forbidden { reason })
            }
        }
    }

    fn check_module(&self, module: &str) -> LedgerResult<()> {
        if self.config.admits_module(module) {
            Ok(())
        } else {
            warn!(module = %module, "record rejected: module not on allow-list");
            Err(LedgerError::ModuleNotAllowed {
                module: module.to_string(),
            })
        }
    }
}
