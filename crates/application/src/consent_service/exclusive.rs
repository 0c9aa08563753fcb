use obconsent_core::{AppError, AppResult, LogSafe, OrgId};
use obconsent_domain::{ConsentStatus, DetailedConsentResource};
use tracing::info;

use crate::consent_ports::{
    ApplicableRevocation, AuthorizationInput, ConsentSearchFilter, ConsentTransaction,
    CreateConsentInput, ExclusiveConsent,
};

use super::mappings::deactivate_where;
use super::transition::Attribution;
use super::{ConsentService, require_non_blank};

const SUPERSEDED_REASON: &str = "Consent revoked";

impl ConsentService {
    /// Creates a consent after superseding the customer's existing consents
    /// of the same client and type.
    ///
    /// Existing consents in `exclusive.applicable_status` move to
    /// `exclusive.superseded_status` with their bindings deactivated, in the
    /// same transaction as the creation.
    pub async fn create_exclusive_consent(
        &self,
        org: &OrgId,
        input: CreateConsentInput,
        authorizations: Vec<AuthorizationInput>,
        exclusive: ExclusiveConsent,
    ) -> AppResult<DetailedConsentResource> {
        require_non_blank(exclusive.user_id.as_str(), "user id")?;
        let detailed = self.new_detailed_consent(org, input, authorizations)?;
        let filter = ConsentSearchFilter {
            client_ids: vec![detailed.consent.client_id.clone()],
            consent_types: vec![detailed.consent.consent_type],
            statuses: vec![exclusive.applicable_status.clone()],
            user_ids: vec![exclusive.user_id.clone()],
            ..ConsentSearchFilter::default()
        };

        let mut transaction = self.begin().await?;
        let result = async {
            let superseded = self
                .supersede_in(
                    &mut *transaction,
                    org,
                    &filter,
                    &exclusive.superseded_status,
                    exclusive.user_id.as_str(),
                )
                .await?;
            self.create_consent_in(&mut *transaction, org, &detailed)
                .await?;
            Ok::<_, AppError>(superseded)
        }
        .await;
        let superseded = self
            .settle(transaction, "create_exclusive_consent", result)
            .await?;

        info!(
            org_id = %org,
            consent_id = %LogSafe(detailed.consent_id()),
            superseded = superseded.len(),
            "exclusive consent created"
        );
        Ok(detailed)
    }

    /// Moves the customer's consents of one client and type from
    /// `applicable_status` to `revoked_status` in one transaction.
    ///
    /// Returns the ids of moved consents; finding none is not an error.
    pub async fn revoke_existing_applicable_consents(
        &self,
        org: &OrgId,
        revocation: ApplicableRevocation,
    ) -> AppResult<Vec<String>> {
        require_non_blank(revocation.client_id.as_str(), "client id")?;
        require_non_blank(revocation.user_id.as_str(), "user id")?;
        let filter = ConsentSearchFilter {
            client_ids: vec![revocation.client_id.clone()],
            consent_types: vec![revocation.consent_type],
            statuses: vec![revocation.applicable_status.clone()],
            user_ids: vec![revocation.user_id.clone()],
            ..ConsentSearchFilter::default()
        };

        let mut transaction = self.begin().await?;
        let result = self
            .supersede_in(
                &mut *transaction,
                org,
                &filter,
                &revocation.revoked_status,
                revocation.user_id.as_str(),
            )
            .await;
        self.settle(transaction, "revoke_existing_applicable_consents", result)
            .await
    }

    /// Moves every consent matching `filter` to `new_status` and deactivates
    /// its bindings. A consent that left the filtered status before it was
    /// locked is skipped.
    async fn supersede_in(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        filter: &ConsentSearchFilter,
        new_status: &ConsentStatus,
        actor: &str,
    ) -> AppResult<Vec<String>> {
        let candidates = transaction.search_detailed_consents(org, filter).await?;

        let mut superseded = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let consent_id = candidate.consent.consent_id;
            let before = self
                .lock_detailed(transaction, org, consent_id.as_str())
                .await?;
            if !filter.statuses.contains(&before.consent.current_status) {
                continue;
            }

            let now = self.clock.now();
            transaction
                .update_consent_status(org, consent_id.as_str(), new_status, now)
                .await?;
            let mut after = before.clone();
            after.consent.current_status = new_status.clone();
            after.consent.updated_time = now;
            deactivate_where(transaction, org, &mut after, |_| true).await?;

            self.record_transition(
                transaction,
                org,
                &before,
                &after,
                SUPERSEDED_REASON,
                Attribution::Actor(actor),
            )
            .await?;
            superseded.push(consent_id);
        }

        Ok(superseded)
    }
}
