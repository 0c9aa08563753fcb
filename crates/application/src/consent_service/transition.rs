use obconsent_core::{AppError, AppResult, LogSafe, OrgId};
use obconsent_domain::amendment::diff_detailed_consents;
use obconsent_domain::{
    AmendmentStamp, ConsentResource, ConsentStatus, ConsentStatusAuditRecord,
    DetailedConsentResource,
};
use tracing::info;

use crate::consent_ports::ConsentTransaction;

use super::{ConsentService, ensure_not_revoked};

/// Who audit rows of a transition are attributed to.
pub(super) enum Attribution<'a> {
    /// One row per authorization, each attributed to that authorization's
    /// user, or to `fallback` when the authorization has none.
    PerAuthorization { fallback: Option<&'a str> },
    /// One row per authorization, all attributed to one actor.
    Actor(&'a str),
}

impl ConsentService {
    pub(super) async fn load_detailed(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        consent_id: &str,
    ) -> AppResult<DetailedConsentResource> {
        transaction
            .fetch_detailed_consent(org, consent_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("consent '{}' does not exist", LogSafe(consent_id)))
            })
    }

    /// Loads the aggregate and locks it against concurrent transitions.
    pub(super) async fn lock_detailed(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        consent_id: &str,
    ) -> AppResult<DetailedConsentResource> {
        transaction
            .fetch_detailed_consent_for_update(org, consent_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("consent '{}' does not exist", LogSafe(consent_id)))
            })
    }

    /// Moves one consent to `new_status` inside an open transaction.
    pub(super) async fn change_status_in(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        consent_id: &str,
        new_status: ConsentStatus,
        reason: &str,
        action_by: Option<&str>,
    ) -> AppResult<ConsentResource> {
        let before = self.lock_detailed(transaction, org, consent_id).await?;
        ensure_not_revoked(&before.consent)?;

        let now = self.clock.now();
        transaction
            .update_consent_status(org, consent_id, &new_status, now)
            .await?;

        let mut after = before.clone();
        after.consent.current_status = new_status;
        after.consent.updated_time = now;

        self.record_transition(
            transaction,
            org,
            &before,
            &after,
            reason,
            Attribution::PerAuthorization {
                fallback: action_by,
            },
        )
        .await?;

        Ok(after.consent)
    }

    /// Writes the audit rows and amendment history for `before` becoming `after`.
    ///
    /// A consent without authorization resources still gets one audit row.
    /// History rows hang off the first audit row.
    pub(super) async fn record_transition(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        before: &DetailedConsentResource,
        after: &DetailedConsentResource,
        reason: &str,
        attribution: Attribution<'_>,
    ) -> AppResult<Vec<ConsentStatusAuditRecord>> {
        let authorizations = &after.authorization_resources;
        let actors: Vec<Option<String>> = match attribution {
            Attribution::PerAuthorization { fallback } if authorizations.is_empty() => {
                vec![fallback.map(str::to_owned)]
            }
            Attribution::PerAuthorization { fallback } => authorizations
                .iter()
                .map(|authorization| {
                    authorization
                        .user_id
                        .clone()
                        .or_else(|| fallback.map(str::to_owned))
                })
                .collect(),
            Attribution::Actor(actor) => vec![Some(actor.to_owned()); authorizations.len().max(1)],
        };

        let action_time = after.consent.updated_time;
        let mut records = Vec::with_capacity(actors.len());
        for action_by in actors {
            let record = ConsentStatusAuditRecord {
                status_audit_id: self.ids.generate(),
                consent_id: after.consent_id().to_owned(),
                current_status: after.consent.current_status.clone(),
                previous_status: Some(before.consent.current_status.clone()),
                action_by,
                reason: Some(reason.to_owned()),
                action_time,
            };
            transaction
                .insert_status_audit_record(org, &record)
                .await?;
            records.push(record);
        }

        if let Some(first) = records.first() {
            let stamp = AmendmentStamp {
                history_id: self.ids.generate(),
                consent_id: after.consent_id().to_owned(),
                status_audit_id: first.status_audit_id.clone(),
                timestamp: action_time.timestamp(),
                reason: reason.to_owned(),
            };
            self.persist_history(transaction, org, &stamp, after, before)
                .await?;
        }

        info!(
            org_id = %org,
            consent_id = %LogSafe(after.consent_id()),
            previous_status = %LogSafe(before.consent.current_status.as_str()),
            current_status = %LogSafe(after.consent.current_status.as_str()),
            audit_rows = records.len(),
            "consent status transitioned"
        );

        Ok(records)
    }

    /// Persists one history row per non-empty facet diff and returns the row count.
    pub(super) async fn persist_history(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        stamp: &AmendmentStamp,
        current: &DetailedConsentResource,
        history: &DetailedConsentResource,
    ) -> AppResult<usize> {
        let entries = diff_detailed_consents(current, history).into_entries(stamp)?;
        for entry in &entries {
            transaction.insert_history_entry(org, entry).await?;
        }

        Ok(entries.len())
    }
}
