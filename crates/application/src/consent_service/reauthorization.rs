use obconsent_core::{AppError, AppResult, LogSafe, OrgId};
use obconsent_domain::{AuthorizationResource, DetailedConsentResource};
use tracing::info;

use crate::consent_ports::{
    ConsentTransaction, DetailedAmendment, Reauthorization, ReauthorizationTarget,
};

use super::attributes::ensure_attribute_keys;
use super::mappings::{deactivate_where, ensure_accounts};
use super::transition::Attribution;
use super::{ConsentService, ensure_not_revoked, require_argument, require_non_blank};

const REAUTHORIZED_REASON: &str = "Consent re-authorized";
const AMENDED_REASON: &str = "Consent amended";

impl ConsentService {
    /// Re-authorises a consent with a new set of accounts.
    ///
    /// Bindings of accounts left out go inactive. With
    /// [`ReauthorizationTarget::Existing`] only accounts without an active
    /// binding are added; with [`ReauthorizationTarget::NewResource`] the
    /// customer's authorizations are retired and every requested account is
    /// bound under a new one.
    pub async fn reauthorize_consent(
        &self,
        org: &OrgId,
        reauthorization: Reauthorization,
    ) -> AppResult<DetailedConsentResource> {
        require_argument(reauthorization.consent_id.as_str(), "consent id")?;
        require_non_blank(reauthorization.user_id.as_str(), "user id")?;
        ensure_accounts(&reauthorization.accounts)?;
        match &reauthorization.target {
            ReauthorizationTarget::Existing { authorization_id } => {
                require_non_blank(authorization_id.as_str(), "authorization id")?;
            }
            ReauthorizationTarget::NewResource {
                existing_authorization_status,
                authorization_status,
                ..
            } => {
                require_non_blank(
                    existing_authorization_status.as_str(),
                    "existing authorization status",
                )?;
                require_non_blank(authorization_status.as_str(), "authorization status")?;
            }
        }

        let mut transaction = self.begin().await?;
        let result = self
            .reauthorize_in(&mut *transaction, org, &reauthorization)
            .await;
        let after = self
            .settle(transaction, "reauthorize_consent", result)
            .await?;

        info!(
            org_id = %org,
            consent_id = %LogSafe(after.consent_id()),
            mappings = after.mapping_resources.len(),
            "consent re-authorized"
        );
        Ok(after)
    }

    async fn reauthorize_in(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        reauthorization: &Reauthorization,
    ) -> AppResult<DetailedConsentResource> {
        let consent_id = reauthorization.consent_id.as_str();
        let user_id = reauthorization.user_id.as_str();
        let before = self.lock_detailed(transaction, org, consent_id).await?;
        ensure_not_revoked(&before.consent)?;

        let now = self.clock.now();
        let mut after = before.clone();
        let authorization_id = match &reauthorization.target {
            ReauthorizationTarget::Existing { authorization_id } => {
                owned_authorization(&after, authorization_id)?;
                authorization_id.clone()
            }
            ReauthorizationTarget::NewResource {
                existing_authorization_status,
                authorization_status,
                authorization_type,
            } => {
                let mut retired = Vec::new();
                for authorization in &mut after.authorization_resources {
                    if authorization.user_id.as_deref() == Some(user_id) {
                        authorization
                            .authorization_status
                            .clone_from(existing_authorization_status);
                        authorization.updated_time = now;
                        transaction.update_authorization(org, authorization).await?;
                        retired.push(authorization.authorization_id.clone());
                    }
                }
                deactivate_where(transaction, org, &mut after, |mapping| {
                    retired.contains(&mapping.authorization_id)
                })
                .await?;

                let authorization = AuthorizationResource {
                    authorization_id: self.ids.generate(),
                    consent_id: consent_id.to_owned(),
                    user_id: Some(user_id.to_owned()),
                    authorization_type: *authorization_type,
                    authorization_status: authorization_status.clone(),
                    updated_time: now,
                };
                transaction.insert_authorization(org, &authorization).await?;
                let authorization_id = authorization.authorization_id.clone();
                after.authorization_resources.push(authorization);
                authorization_id
            }
        };

        self.reconcile_accounts(
            transaction,
            org,
            &mut after,
            authorization_id.as_str(),
            &reauthorization.accounts,
        )
        .await?;

        transaction
            .update_consent_status(org, consent_id, &reauthorization.new_consent_status, now)
            .await?;
        after.consent.current_status = reauthorization.new_consent_status.clone();
        after.consent.updated_time = now;

        self.record_transition(
            transaction,
            org,
            &before,
            &after,
            REAUTHORIZED_REASON,
            Attribution::Actor(user_id),
        )
        .await?;

        Ok(after)
    }

    /// Amends consent data, account bindings, status and attributes together.
    ///
    /// One audit row set and one history record cover the whole amendment.
    pub async fn amend_detailed_consent(
        &self,
        org: &OrgId,
        amendment: DetailedAmendment,
    ) -> AppResult<DetailedConsentResource> {
        require_argument(amendment.consent_id.as_str(), "consent id")?;
        if amendment.receipt.is_none() && amendment.validity_period.is_none() {
            return Err(AppError::BadRequest(
                "an amendment must change the receipt or the validity period".to_owned(),
            ));
        }
        require_non_blank(amendment.authorization_id.as_str(), "authorization id")?;
        require_non_blank(amendment.action_by.as_str(), "user id")?;
        ensure_accounts(&amendment.accounts)?;
        ensure_attribute_keys(&amendment.attributes)?;

        let mut transaction = self.begin().await?;
        let result = self
            .amend_detailed_in(&mut *transaction, org, amendment)
            .await;
        self.settle(transaction, "amend_detailed_consent", result)
            .await
    }

    async fn amend_detailed_in(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        amendment: DetailedAmendment,
    ) -> AppResult<DetailedConsentResource> {
        let consent_id = amendment.consent_id.as_str();
        let before = self.lock_detailed(transaction, org, consent_id).await?;
        ensure_not_revoked(&before.consent)?;
        owned_authorization(&before, amendment.authorization_id.as_str())?;

        let now = self.clock.now();
        let mut after = before.clone();
        if let Some(receipt) = amendment.receipt {
            after.consent.receipt = Some(receipt);
        }
        if let Some(validity_period) = amendment.validity_period {
            after.consent.validity_period = Some(validity_period);
        }
        after.consent.current_status = amendment.new_consent_status;
        after.consent.updated_time = now;
        transaction.update_consent_data(org, &after.consent).await?;
        transaction
            .update_consent_status(org, consent_id, &after.consent.current_status, now)
            .await?;

        self.reconcile_accounts(
            transaction,
            org,
            &mut after,
            amendment.authorization_id.as_str(),
            &amendment.accounts,
        )
        .await?;

        if !amendment.attributes.is_empty() {
            transaction
                .upsert_attributes(org, consent_id, &amendment.attributes)
                .await?;
            after.attributes.extend(amendment.attributes);
        }

        self.record_transition(
            transaction,
            org,
            &before,
            &after,
            AMENDED_REASON,
            Attribution::Actor(amendment.action_by.as_str()),
        )
        .await?;

        Ok(after)
    }
}

fn owned_authorization<'a>(
    detailed: &'a DetailedConsentResource,
    authorization_id: &str,
) -> AppResult<&'a AuthorizationResource> {
    detailed
        .authorization_resources
        .iter()
        .find(|authorization| authorization.authorization_id == authorization_id)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "authorization '{}' does not belong to consent '{}'",
                LogSafe(authorization_id),
                LogSafe(detailed.consent_id())
            ))
        })
}
