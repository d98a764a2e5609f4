//! Access policy configuration schema.
//!
//! An `AccessConfig` is deserialized from TOML.  It lists the modules whose
//! records may be ingested, the roles that may read the ledger, and the
//! bearer credentials known to the service.  Anything not listed is denied.

use serde::{Deserialize, Serialize};

/// Wildcard accepted in `allowed_modules`.
pub const ANY_MODULE: &str = "*";

/// One bearer credential.
///
/// Only the SHA-256 of the token is stored, so the policy file never holds a
/// usable secret.  Generate the digest with `ledgerd hash-token <token>`.
///
/// Example in TOML:
/// ```toml
/// [[credentials]]
/// subject = "billing-service"
/// token_sha256 = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
/// scopes = ["audit:append"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRule {
    /// Stable caller name, written to logs.
    pub subject: String,

    /// Lowercase hex SHA-256 of the bearer token.
    pub token_sha256: String,

    /// Scopes such as `audit:append` or `audit:export`.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Roles such as `auditor` or `compliance_officer`.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The top-level access policy.
///
/// Example:
/// ```toml
/// allowed_modules = ["pay", "auth", "profile"]
/// reader_roles = ["auditor", "compliance_officer"]
///
/// [[credentials]]
/// subject = "compliance-desk"
/// token_sha256 = "…"
/// scopes = ["audit:export"]
/// roles = ["compliance_officer"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Modules whose records may be appended.  `"*"` admits every module.
    #[serde(default)]
    pub allowed_modules: Vec<String>,

    /// Roles permitted to search, verify, export, and read stats.
    #[serde(default)]
    pub reader_roles: Vec<String>,

    #[serde(default)]
    pub credentials: Vec<CredentialRule>,
}

impl AccessConfig {
    /// Return true if `module` is on the allow-list.
    ///
    /// Matching is exact and case-sensitive, except for the `"*"` entry.
    pub fn admits_module(&self, module: &str) -> bool {
        self.allowed_modules
            .iter()
            .any(|m| m == ANY_MODULE || m == module)
    }
}
