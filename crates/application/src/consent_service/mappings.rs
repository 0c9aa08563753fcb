use std::collections::{BTreeMap, BTreeSet};

use obconsent_core::{AppError, AppResult, LogSafe, OrgId};
use obconsent_domain::{ConsentMappingResource, DetailedConsentResource, MappingStatus};

use crate::consent_ports::{AccountBinding, ConsentTransaction};

use super::transition::Attribution;
use super::{ConsentService, ensure_not_revoked, require_non_blank};

impl ConsentService {
    /// Completes an authorization by binding accounts and moving the consent on.
    ///
    /// The authorization gets the binding user and status, one active mapping
    /// is created per account and permission, and the status change is
    /// audited, all in one transaction.
    pub async fn bind_accounts_to_consent(
        &self,
        org: &OrgId,
        binding: AccountBinding,
    ) -> AppResult<DetailedConsentResource> {
        require_non_blank(binding.consent_id.as_str(), "consent id")?;
        require_non_blank(binding.authorization_id.as_str(), "authorization id")?;
        require_non_blank(binding.user_id.as_str(), "user id")?;
        require_non_blank(binding.authorization_status.as_str(), "authorization status")?;
        ensure_accounts(&binding.accounts)?;

        let mut transaction = self.begin().await?;
        let result = self
            .bind_accounts_in(&mut *transaction, org, &binding)
            .await;
        self.settle(transaction, "bind_accounts_to_consent", result)
            .await
    }

    async fn bind_accounts_in(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        binding: &AccountBinding,
    ) -> AppResult<DetailedConsentResource> {
        let consent_id = binding.consent_id.as_str();
        let before = self.lock_detailed(transaction, org, consent_id).await?;
        ensure_not_revoked(&before.consent)?;

        let now = self.clock.now();
        let mut after = before.clone();
        let authorization = after
            .authorization_resources
            .iter_mut()
            .find(|authorization| authorization.authorization_id == binding.authorization_id)
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "authorization '{}' does not belong to consent '{}'",
                    LogSafe(binding.authorization_id.as_str()),
                    LogSafe(consent_id)
                ))
            })?;
        authorization.user_id = Some(binding.user_id.clone());
        authorization.authorization_status = binding.authorization_status.clone();
        authorization.updated_time = now;
        transaction.update_authorization(org, authorization).await?;

        for (account_id, permissions) in &binding.accounts {
            for permission in permissions {
                let mapping = ConsentMappingResource {
                    mapping_id: self.ids.generate(),
                    authorization_id: binding.authorization_id.clone(),
                    account_id: account_id.clone(),
                    permission: permission.clone(),
                    mapping_status: MappingStatus::Active,
                };
                transaction.insert_mapping(org, consent_id, &mapping).await?;
                after.mapping_resources.push(mapping);
            }
        }

        transaction
            .update_consent_status(org, consent_id, &binding.new_consent_status, now)
            .await?;
        after.consent.current_status = binding.new_consent_status.clone();
        after.consent.updated_time = now;

        self.record_transition(
            transaction,
            org,
            &before,
            &after,
            "Accounts bound to consent",
            Attribution::PerAuthorization {
                fallback: Some(binding.user_id.as_str()),
            },
        )
        .await?;

        Ok(after)
    }

    /// Brings the active bindings of `after` in line with `accounts`.
    ///
    /// Bindings of accounts no longer requested go inactive. Requested
    /// accounts get new bindings under `authorization_id` unless they already
    /// have an active one.
    pub(super) async fn reconcile_accounts(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        after: &mut DetailedConsentResource,
        authorization_id: &str,
        accounts: &BTreeMap<String, Vec<String>>,
    ) -> AppResult<()> {
        let consent_id = after.consent.consent_id.clone();
        deactivate_where(transaction, org, after, |mapping| {
            !accounts.contains_key(&mapping.account_id)
        })
        .await?;

        let bound: BTreeSet<String> = after
            .mapping_resources
            .iter()
            .filter(|mapping| mapping.mapping_status == MappingStatus::Active)
            .map(|mapping| mapping.account_id.clone())
            .collect();
        for (account_id, permissions) in accounts {
            if bound.contains(account_id) {
                continue;
            }
            for permission in permissions {
                let mapping = ConsentMappingResource {
                    mapping_id: self.ids.generate(),
                    authorization_id: authorization_id.to_owned(),
                    account_id: account_id.clone(),
                    permission: permission.clone(),
                    mapping_status: MappingStatus::Active,
                };
                transaction
                    .insert_mapping(org, consent_id.as_str(), &mapping)
                    .await?;
                after.mapping_resources.push(mapping);
            }
        }

        Ok(())
    }

    /// Marks account bindings inactive.
    pub async fn deactivate_account_mappings(
        &self,
        org: &OrgId,
        mapping_ids: &[String],
    ) -> AppResult<()> {
        self.update_account_mapping_status(org, mapping_ids, MappingStatus::Inactive)
            .await
    }

    /// Sets the status of account bindings.
    pub async fn update_account_mapping_status(
        &self,
        org: &OrgId,
        mapping_ids: &[String],
        status: MappingStatus,
    ) -> AppResult<()> {
        if mapping_ids.is_empty() || mapping_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(AppError::BadRequest(
                "mapping ids must be provided and not blank".to_owned(),
            ));
        }

        let mut transaction = self.begin().await?;
        let result = transaction
            .update_mapping_status(org, mapping_ids, status)
            .await
            .map_err(AppError::from);
        self.settle(transaction, "update_account_mapping_status", result)
            .await
    }
}

/// Deactivates the active bindings of `after` selected by `retire` and
/// returns their ids.
pub(super) async fn deactivate_where(
    transaction: &mut dyn ConsentTransaction,
    org: &OrgId,
    after: &mut DetailedConsentResource,
    retire: impl Fn(&ConsentMappingResource) -> bool,
) -> AppResult<Vec<String>> {
    let mut retired = Vec::new();
    for mapping in &mut after.mapping_resources {
        if mapping.mapping_status == MappingStatus::Active && retire(mapping) {
            mapping.mapping_status = MappingStatus::Inactive;
            retired.push(mapping.mapping_id.clone());
        }
    }
    if !retired.is_empty() {
        transaction
            .update_mapping_status(org, &retired, MappingStatus::Inactive)
            .await?;
    }

    Ok(retired)
}

/// Fails unless every requested account carries at least one permission.
pub(super) fn ensure_accounts(accounts: &BTreeMap<String, Vec<String>>) -> AppResult<()> {
    if accounts.is_empty()
        || accounts.keys().any(|account_id| account_id.trim().is_empty())
        || accounts.values().any(Vec::is_empty)
    {
        return Err(AppError::BadRequest(
            "every bound account needs at least one permission".to_owned(),
        ));
    }

    Ok(())
}
