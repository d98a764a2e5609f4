//! # ledger-policy
//!
//! A TOML-driven, deny-by-default access policy for the audit ledger.
//!
//! ## Overview
//!
//! This crate provides [`TomlAccessPolicy`], which implements the
//! [`AccessPolicy`](ledger_core::traits::AccessPolicy) trait.  The policy
//! file declares the module allow-list for ingestion, the reader roles for
//! back-office queries, and hashed bearer credentials with their scopes and
//! roles.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use ledger_policy::TomlAccessPolicy;
//!
//! let policy = TomlAccessPolicy::from_file(Path::new("access.toml"))?;
//! ```

pub mod engine;
pub mod rule;

pub use engine::{hash_token, TomlAccessPolicy};
pub use rule::{AccessConfig, CredentialRule};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use ledger_contracts::{capability::Operation, error::LedgerError};
    use ledger_core::traits::AccessPolicy;

    use crate::{hash_token, TomlAccessPolicy};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn policy() -> TomlAccessPolicy {
        let toml = format!(
            r#"
            allowed_modules = ["pay", "auth"]
            reader_roles = ["auditor", "compliance_officer"]

            [[credentials]]
            subject = "billing-service"
            token_sha256 = "{}"
            scopes = ["audit:append"]

            [[credentials]]
            subject = "audit-desk"
            token_sha256 = "{}"
            roles = ["auditor"]

            [[credentials]]
            subject = "compliance-desk"
            token_sha256 = "{}"
            scopes = ["audit:export"]
            roles = ["compliance_officer"]
            "#,
            hash_token("writer-token"),
            hash_token("auditor-token"),
            hash_token("compliance-token"),
        );
        TomlAccessPolicy::from_toml_str(&toml).unwrap()
    }

    // ── 1. authentication ─────────────────────────────────────────────────────

    #[test]
    fn test_missing_and_unknown_tokens_are_unauthorized() {
        let p = policy();
        assert!(matches!(p.authenticate(None), Err(LedgerError::Unauthorized { .. })));
        assert!(matches!(p.authenticate(Some("  ")), Err(LedgerError::Unauthorized { .. })));
        assert!(matches!(
            p.authenticate(Some("guess")),
            Err(LedgerError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_known_token_resolves_principal() {
        let principal = policy().authenticate(Some("writer-token")).unwrap();
        assert_eq!(principal.subject, "billing-service");
        assert!(principal.scopes.has("audit:append"));
    }

    // ── 2. authorization ──────────────────────────────────────────────────────

    #[test]
    fn test_append_requires_append_scope() {
        let p = policy();
        let writer = p.authenticate(Some("writer-token")).unwrap();
        let auditor = p.authenticate(Some("auditor-token")).unwrap();

        assert!(p.authorize(&writer, Operation::Append).is_ok());
        match p.authorize(&auditor, Operation::Append) {
            Err(LedgerError::Forbidden { reason }) => assert!(reason.contains("audit:append")),
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[test]
    fn test_reads_require_reader_role() {
        let p = policy();
        let writer = p.authenticate(Some("writer-token")).unwrap();
        let auditor = p.authenticate(Some("auditor-token")).unwrap();

        for op in [Operation::Search, Operation::Verify, Operation::Stats] {
            assert!(p.authorize(&auditor, op).is_ok(), "{:?}", op);
            assert!(matches!(p.authorize(&writer, op), Err(LedgerError::Forbidden { .. })));
        }
    }

    /// Export needs both a reader role and the export scope.
    #[test]
    fn test_export_requires_role_and_scope() {
        let p = policy();
        let auditor = p.authenticate(Some("auditor-token")).unwrap();
        let compliance = p.authenticate(Some("compliance-token")).unwrap();

        match p.authorize(&auditor, Operation::Export) {
            Err(LedgerError::Forbidden { reason }) => assert!(reason.contains("audit:export")),
            other => panic!("expected Forbidden, got {:?}", other),
        }
        assert!(p.authorize(&compliance, Operation::Export).is_ok());
    }

    // ── 3. module allow-list ──────────────────────────────────────────────────

    #[test]
    fn test_module_allow_list() {
        let p = policy();
        assert!(p.check_module("pay").is_ok());
        match p.check_module("geo") {
            Err(LedgerError::ModuleNotAllowed { module }) => assert_eq!(module, "geo"),
            other => panic!("expected ModuleNotAllowed, got {:?}", other),
        }
        assert!(p.check_module("PAY").is_err(), "matching is case-sensitive");
    }

    #[test]
    fn test_empty_policy_denies_everything() {
        let p = TomlAccessPolicy::from_toml_str("").unwrap();
        assert!(p.check_module("pay").is_err());
        assert!(p.authenticate(Some("writer-token")).is_err());
    }

    #[test]
    fn test_wildcard_module() {
        let p = TomlAccessPolicy::from_toml_str(r#"allowed_modules = ["*"]"#).unwrap();
        assert!(p.check_module("anything").is_ok());
    }

    // ── 4. configuration errors ───────────────────────────────────────────────

    #[test]
    fn test_toml_parse_error() {
        match TomlAccessPolicy::from_toml_str("this is not valid toml ][[[") {
            Err(LedgerError::Config { reason }) => {
                assert!(reason.contains("failed to parse access policy TOML"), "{reason}")
            }
            other => panic!("expected Config, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_digest_and_duplicate_token() {
        let bad = r#"
            [[credentials]]
            subject = "x"
            token_sha256 = "plaintext-token"
        "#;
        assert!(matches!(
            TomlAccessPolicy::from_toml_str(bad),
            Err(LedgerError::Config { .. })
        ));

        let digest = hash_token("same");
        let dup = format!(
            r#"
            [[credentials]]
            subject = "a"
            token_sha256 = "{digest}"

            [[credentials]]
            subject = "b"
            token_sha256 = "{digest}"
            "#
        );
        assert!(matches!(
            TomlAccessPolicy::from_toml_str(&dup),
            Err(LedgerError::Config { .. })
        ));
    }
}
