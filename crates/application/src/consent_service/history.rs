use std::collections::BTreeMap;

use obconsent_core::{AppError, AppResult, OrgId};
use obconsent_domain::amendment::replay_history;
use obconsent_domain::{AmendmentStamp, ConsentHistoryResource, DetailedConsentResource};

use super::{ConsentService, require_argument, require_non_blank};

impl ConsentService {
    /// Records how a consent differed before an amendment.
    ///
    /// `history.detailed_consent` is the state before the amendment and
    /// `current` the state after it; `current` is loaded when absent.
    /// Returns whether any history row was written.
    pub async fn store_consent_amendment_history(
        &self,
        org: &OrgId,
        status_audit_id: &str,
        history: ConsentHistoryResource,
        current: Option<DetailedConsentResource>,
    ) -> AppResult<bool> {
        require_non_blank(status_audit_id, "status audit id")?;
        require_non_blank(history.reason.as_str(), "amendment reason")?;
        require_non_blank(history.consent_id.as_str(), "consent id")?;
        if history.timestamp == 0 {
            return Err(AppError::BadRequest(
                "amendment timestamp must not be zero".to_owned(),
            ));
        }
        let Some(previous) = history.detailed_consent.as_ref() else {
            return Err(AppError::BadRequest(
                "amendment history requires the prior consent state".to_owned(),
            ));
        };

        let stamp = AmendmentStamp {
            history_id: self.id_or_generate(history.history_id.clone()),
            consent_id: history.consent_id.clone(),
            status_audit_id: status_audit_id.to_owned(),
            timestamp: history.timestamp,
            reason: history.reason.clone(),
        };

        let mut transaction = self.begin().await?;
        let result = async {
            let current = match current {
                Some(current) => current,
                None => {
                    self.load_detailed(&mut *transaction, org, stamp.consent_id.as_str())
                        .await?
                }
            };
            let written = self
                .persist_history(&mut *transaction, org, &stamp, &current, previous)
                .await?;
            Ok::<_, AppError>(written > 0)
        }
        .await;
        self.settle(transaction, "store_consent_amendment_history", result)
            .await
    }

    /// Rebuilds the consent as it was before each amendment.
    ///
    /// Keys of the result are status audit ids. An empty `status_audit_ids`
    /// returns every amendment of the consent.
    pub async fn get_consent_amendment_history_data(
        &self,
        org: &OrgId,
        status_audit_ids: &[String],
        consent_id: &str,
    ) -> AppResult<BTreeMap<String, ConsentHistoryResource>> {
        require_argument(consent_id, "consent id")?;

        let mut transaction = self.begin().await?;
        let result = async {
            let current = self.load_detailed(&mut *transaction, org, consent_id).await?;
            let entries = transaction.fetch_history_entries(org, consent_id).await?;
            Ok::<_, AppError>((current, entries))
        }
        .await;
        let (current, entries) = self
            .settle(transaction, "get_consent_amendment_history_data", result)
            .await?;

        let mut resolved = BTreeMap::new();
        for amendment in replay_history(&current, &entries)? {
            if !status_audit_ids.is_empty() && !status_audit_ids.contains(&amendment.status_audit_id)
            {
                continue;
            }
            resolved.insert(
                amendment.status_audit_id.clone(),
                ConsentHistoryResource {
                    history_id: Some(amendment.history_id),
                    consent_id: consent_id.to_owned(),
                    status_audit_id: amendment.status_audit_id,
                    timestamp: amendment.timestamp,
                    reason: amendment.reason,
                    detailed_consent: Some(amendment.snapshot),
                    entries: amendment.entries,
                },
            );
        }

        Ok(resolved)
    }
}
