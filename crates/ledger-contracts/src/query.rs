//! Read-side filter types: time windows and search criteria.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{ActorType, AuditRecord, Outcome};

/// Hard cap on records returned by a single search.
pub const SEARCH_CAP: usize = 500;

/// Limit applied when a search does not ask for one.
pub const DEFAULT_SEARCH_LIMIT: usize = 100;

/// A half-open time window `[from, to)`.  Absent bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// The whole chain.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| ts >= from) && self.to.map_or(true, |to| ts < to)
    }

    /// True when `ts` lies at or after the window's end.
    pub fn is_past_end(&self, ts: DateTime<Utc>) -> bool {
        self.to.is_some_and(|to| ts >= to)
    }
}

/// Filters accepted by the query service.
///
/// Every present field must match.  `q` is a case-insensitive substring test
/// against the redacted payload and the reason; the ciphertext is never
/// searched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    pub module: Option<String>,
    pub actor_type: Option<ActorType>,
    pub actor_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub action: Option<String>,
    pub result: Option<Outcome>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub q: Option<String>,
    pub limit: Option<usize>,
}

impl SearchCriteria {
    /// The limit actually applied: defaulted and clamped to `[1, SEARCH_CAP]`.
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, SEARCH_CAP)
    }

    /// Copy with the limit resolved and blank text filters dropped, so that
    /// equivalent requests share a cache entry.
    pub fn normalized(&self) -> Self {
        fn clean(v: &Option<String>) -> Option<String> {
            v.as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        }
        Self {
            module: clean(&self.module),
            actor_type: self.actor_type,
            actor_id: clean(&self.actor_id),
            resource_type: clean(&self.resource_type),
            resource_id: clean(&self.resource_id),
            action: clean(&self.action),
            result: self.result,
            from: self.from,
            to: self.to,
            q: clean(&self.q).map(|q| q.to_lowercase()),
            limit: Some(self.effective_limit()),
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            from: self.from,
            to: self.to,
        }
    }

    /// True if `record` satisfies every filter in this set.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        fn eq(filter: &Option<String>, value: &Option<String>) -> bool {
            match filter {
                None => true,
                Some(f) => value.as_deref() == Some(f.as_str()),
            }
        }

        if self.module.as_deref().is_some_and(|m| m != record.module) {
            return false;
        }
        if self.action.as_deref().is_some_and(|a| a != record.action) {
            return false;
        }
        if self.actor_type.is_some_and(|t| t != record.actor_type) {
            return false;
        }
        if self.result.is_some_and(|r| r != record.result) {
            return false;
        }
        if !eq(&self.actor_id, &record.actor_id)
            || !eq(&self.resource_type, &record.resource_type)
            || !eq(&self.resource_id, &record.resource_id)
        {
            return false;
        }
        if !self.window().contains(record.created_at) {
            return false;
        }
        if let Some(q) = &self.q {
            let needle = q.to_lowercase();
            let in_payload = !record.data_redacted.is_null()
                && record
                    .data_redacted
                    .to_string()
                    .to_lowercase()
                    .contains(&needle);
            let in_reason = record
                .reason
                .as_deref()
                .is_some_and(|r| r.to_lowercase().contains(&needle));
            if !in_payload && !in_reason {
                return false;
            }
        }
        true
    }
}
