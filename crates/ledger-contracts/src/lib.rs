//! # ledger-contracts
//!
//! Shared types, reports, and error taxonomy for the tamper-evident audit
//! ledger.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions, input validation, and error types.

pub mod capability;
pub mod error;
pub mod query;
pub mod record;
pub mod report;

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use capability::{Principal, ScopeSet, SCOPE_APPEND};
    use error::LedgerError;
    use query::{SearchCriteria, TimeWindow, SEARCH_CAP};
    use record::{ActorType, AuditRecord, Outcome, RecordId, RecordInput};
    use report::VerificationReport;

    fn input() -> RecordInput {
        RecordInput {
            module: Some("pay".to_string()),
            action: Some("charge".to_string()),
            actor_type: Some(ActorType::User),
            actor_id: Some("u1".to_string()),
            result: Some(Outcome::Success),
            data_redacted: json!({ "amount": 42, "currency": "EUR" }),
            ..Default::default()
        }
    }

    fn committed(input: RecordInput) -> AuditRecord {
        AuditRecord::from_draft(
            input.validate().unwrap(),
            RecordId::new(),
            0,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            AuditRecord::GENESIS_HASH.to_string(),
        )
    }

    // ── RecordInput validation ───────────────────────────────────────────────

    #[test]
    fn validate_accepts_complete_input() {
        let draft = input().validate().unwrap();
        assert_eq!(draft.module, "pay");
        assert_eq!(draft.actor_type, ActorType::User);
        assert_eq!(draft.result, Outcome::Success);
    }

    #[test]
    fn validate_rejects_missing_classification_fields() {
        for field in ["module", "action", "actor_type", "result"] {
            let mut i = input();
            match field {
                "module" => i.module = None,
                "action" => i.action = None,
                "actor_type" => i.actor_type = None,
                _ => i.result = None,
            }
            match i.validate() {
                Err(LedgerError::Validation { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected Validation for {field}, got {:?}", other),
            }
        }
    }

    #[test]
    fn validate_rejects_blank_and_oversized_labels() {
        let mut blank = input();
        blank.module = Some("   ".to_string());
        assert!(matches!(blank.validate(), Err(LedgerError::Validation { .. })));

        let mut long = input();
        long.action = Some("x".repeat(record::MAX_LABEL_LEN + 1));
        assert!(matches!(long.validate(), Err(LedgerError::Validation { .. })));
    }

    #[test]
    fn unknown_enum_values_fail_to_parse() {
        let raw = json!({
            "module": "pay", "action": "charge",
            "actor_type": "robot", "result": "success"
        });
        assert!(serde_json::from_value::<RecordInput>(raw).is_err());
        assert!("maybe".parse::<Outcome>().is_err());
        assert_eq!("employee".parse::<ActorType>().unwrap(), ActorType::Employee);
    }

    #[test]
    fn engine_owned_fields_are_stripped() {
        let raw = json!({
            "module": "pay", "action": "charge",
            "actor_type": "service", "result": "allow",
            "id": "msg-7", "hash": "deadbeef", "prev_hash": 12,
            "created_at": "1999-01-01T00:00:00Z"
        });
        let mut parsed: RecordInput = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.client_id().as_deref(), Some("msg-7"));

        let stripped = parsed.strip_engine_fields();
        assert_eq!(stripped, vec!["id", "hash", "prev_hash", "created_at"]);
        assert!(parsed.id.is_none() && parsed.hash.is_none());
        assert!(parsed.client_id().is_none());
    }

    // ── SearchCriteria ───────────────────────────────────────────────────────

    #[test]
    fn search_limit_is_defaulted_and_clamped() {
        assert_eq!(SearchCriteria::default().effective_limit(), 100);
        let big = SearchCriteria { limit: Some(10_000), ..Default::default() };
        assert_eq!(big.effective_limit(), SEARCH_CAP);
        let zero = SearchCriteria { limit: Some(0), ..Default::default() };
        assert_eq!(zero.effective_limit(), 1);
    }

    #[test]
    fn search_matches_filters_and_free_text() {
        let record = committed(input());

        let hit = SearchCriteria {
            module: Some("pay".to_string()),
            result: Some(Outcome::Success),
            q: Some("eur".to_string()),
            ..Default::default()
        };
        assert!(hit.matches(&record));

        let wrong_result = SearchCriteria { result: Some(Outcome::Failure), ..Default::default() };
        assert!(!wrong_result.matches(&record));

        let wrong_actor = SearchCriteria { actor_id: Some("u2".to_string()), ..Default::default() };
        assert!(!wrong_actor.matches(&record));

        let no_text = SearchCriteria { q: Some("usd".to_string()), ..Default::default() };
        assert!(!no_text.matches(&record));
    }

    #[test]
    fn ciphertext_is_never_searched() {
        let mut i = input();
        i.data_ciphertext = Some("secret-needle".to_string());
        let record = committed(i);
        let crit = SearchCriteria { q: Some("needle".to_string()), ..Default::default() };
        assert!(!crit.matches(&record));
    }

    #[test]
    fn time_window_is_half_open() {
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let w = TimeWindow::between(from, to);
        assert!(w.contains(from));
        assert!(!w.contains(to));
        assert!(w.is_past_end(to));
        assert!(TimeWindow::unbounded().contains(to));
    }

    // ── Reports and principals ───────────────────────────────────────────────

    #[test]
    fn broken_report_converts_to_chain_broken() {
        let id = RecordId::new();
        let err = VerificationReport::broken(id, 3, "hash mismatch").into_result().unwrap_err();
        match err {
            LedgerError::ChainBroken { record_id, reason } => {
                assert_eq!(record_id, id.to_string());
                assert_eq!(reason, "hash mismatch");
            }
            other => panic!("expected ChainBroken, got {:?}", other),
        }
        assert!(VerificationReport::intact(5).into_result().is_ok());
    }

    #[test]
    fn principal_scopes_and_roles() {
        let p = Principal {
            subject: "billing".to_string(),
            scopes: [SCOPE_APPEND].into_iter().collect::<ScopeSet>(),
            roles: ["auditor".to_string()].into_iter().collect(),
        };
        assert!(p.scopes.has(SCOPE_APPEND));
        assert!(!p.scopes.has("audit:export"));
        assert!(p.has_role("auditor"));
    }

    // ── Error codes ──────────────────────────────────────────────────────────

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(LedgerError::validation("module", "is required").code(), "VALIDATION_ERROR");
        assert_eq!(
            LedgerError::Batch { index: 2, reason: "x".to_string() }.code(),
            "BATCH_ERROR"
        );
        assert_eq!(
            LedgerError::SealConflict {
                day: "2026-03-01".to_string(),
                archived: "a".to_string(),
                live: "b".to_string()
            }
            .code(),
            "SEAL_CONFLICT"
        );
        assert!(LedgerError::store("connection reset").is_transient());
        assert!(!LedgerError::validation("module", "x").is_transient());
    }

    #[test]
    fn error_display_carries_context() {
        let msg = LedgerError::Batch { index: 4, reason: "module is required".to_string() }.to_string();
        assert!(msg.contains("index 4"));
        assert!(msg.contains("module is required"));
    }
}
