use chrono::{DateTime, Utc};
use obconsent_domain::{
    ConsentStatus, ConsentStatusAuditRecord, ConsentType, DetailedConsentResource,
};
use serde::{Deserialize, Serialize};

/// Filter for consent searches.
///
/// Each list is an allow-list; an empty list places no restriction on that
/// dimension. The time range applies to `updated_time` and is inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentSearchFilter {
    /// Consent ids to include.
    pub consent_ids: Vec<String>,
    /// Client ids to include.
    pub client_ids: Vec<String>,
    /// Consent types to include.
    pub consent_types: Vec<ConsentType>,
    /// Statuses to include.
    pub statuses: Vec<ConsentStatus>,
    /// Users, any of whose authorizations qualifies a consent.
    pub user_ids: Vec<String>,
    /// Lower bound on `updated_time`.
    pub from_time: Option<DateTime<Utc>>,
    /// Upper bound on `updated_time`.
    pub to_time: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of results to skip.
    pub offset: Option<usize>,
}

impl ConsentSearchFilter {
    /// Returns whether an aggregate passes every dimension of the filter.
    #[must_use]
    pub fn matches(&self, detailed: &DetailedConsentResource) -> bool {
        let consent = &detailed.consent;
        allows(&self.consent_ids, &consent.consent_id)
            && allows(&self.client_ids, &consent.client_id)
            && allows(&self.consent_types, &consent.consent_type)
            && allows(&self.statuses, &consent.current_status)
            && (self.user_ids.is_empty()
                || self
                    .user_ids
                    .iter()
                    .any(|user_id| detailed.has_authorized_user(user_id)))
            && self
                .from_time
                .is_none_or(|from_time| consent.updated_time >= from_time)
            && self
                .to_time
                .is_none_or(|to_time| consent.updated_time <= to_time)
    }
}

/// Filter for status audit record searches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecordQuery {
    /// Consents to include; empty means all.
    pub consent_ids: Vec<String>,
    /// Only records transitioning into this status.
    pub status: Option<ConsentStatus>,
    /// Only records attributed to this actor.
    pub action_by: Option<String>,
    /// Lower bound on `action_time`.
    pub from_time: Option<DateTime<Utc>>,
    /// Upper bound on `action_time`.
    pub to_time: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of results to skip.
    pub offset: Option<usize>,
}

impl AuditRecordQuery {
    /// Returns whether a record passes every dimension of the query.
    #[must_use]
    pub fn matches(&self, record: &ConsentStatusAuditRecord) -> bool {
        allows(&self.consent_ids, &record.consent_id)
            && self
                .status
                .as_ref()
                .is_none_or(|status| *status == record.current_status)
            && self
                .action_by
                .as_deref()
                .is_none_or(|action_by| record.action_by.as_deref() == Some(action_by))
            && self
                .from_time
                .is_none_or(|from_time| record.action_time >= from_time)
            && self
                .to_time
                .is_none_or(|to_time| record.action_time <= to_time)
    }
}

/// Applies `offset` then `limit`; absent values mean no bound.
#[must_use]
pub fn paginate<T>(items: Vec<T>, limit: Option<usize>, offset: Option<usize>) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

fn allows<T: PartialEq>(allowed: &[T], value: &T) -> bool {
    allowed.is_empty() || allowed.contains(value)
}

#[cfg(test)]
mod tests {
    use super::paginate;

    #[test]
    fn paginate_without_bounds_returns_everything() {
        assert_eq!(paginate(vec![1, 2, 3], None, None), vec![1, 2, 3]);
    }

    #[test]
    fn paginate_skips_then_limits() {
        assert_eq!(paginate(vec![1, 2, 3, 4], Some(2), Some(1)), vec![2, 3]);
    }
}
