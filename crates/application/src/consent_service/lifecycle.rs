use obconsent_core::{AppError, AppResult, LogSafe, OrgId};
use obconsent_domain::{
    AuthorizationResource, ConsentResource, ConsentStatus, ConsentStatusAuditRecord,
    DetailedConsentResource,
};
use tracing::{info, warn};

use crate::consent_ports::{
    AmendConsentData, AuthorizationInput, BulkStatusUpdate, ConsentSearchFilter,
    ConsentTransaction, ConsentWithAttributes, CreateConsentInput, ExpirySweep,
};

use super::attributes::ensure_attribute_keys;
use super::mappings::deactivate_where;
use super::transition::Attribution;
use super::{ConsentService, ensure_not_revoked, require_argument, require_non_blank};

const CREATED_REASON: &str = "Consent created";
const EXPIRED_REASON: &str = "Consent validity period elapsed";

impl ConsentService {
    /// Creates a consent together with its initial authorization resources
    /// and attributes.
    pub async fn create_consent(
        &self,
        org: &OrgId,
        input: CreateConsentInput,
        authorizations: Vec<AuthorizationInput>,
    ) -> AppResult<DetailedConsentResource> {
        let detailed = self.new_detailed_consent(org, input, authorizations)?;

        let mut transaction = self.begin().await?;
        let result = self.create_consent_in(&mut *transaction, org, &detailed).await;
        self.settle(transaction, "create_consent", result).await?;

        info!(
            org_id = %org,
            consent_id = %LogSafe(detailed.consent_id()),
            consent_type = %detailed.consent.consent_type,
            "consent created"
        );
        Ok(detailed)
    }

    /// Validates creation input and builds the aggregate to insert.
    pub(super) fn new_detailed_consent(
        &self,
        org: &OrgId,
        input: CreateConsentInput,
        authorizations: Vec<AuthorizationInput>,
    ) -> AppResult<DetailedConsentResource> {
        require_non_blank(input.client_id.as_str(), "client id")?;
        for authorization in &authorizations {
            require_non_blank(
                authorization.authorization_status.as_str(),
                "authorization status",
            )?;
        }
        ensure_attribute_keys(&input.attributes)?;

        let now = self.clock.now();
        let consent = ConsentResource {
            consent_id: self.id_or_generate(input.consent_id),
            client_id: input.client_id,
            consent_type: input.consent_type,
            current_status: input.current_status,
            receipt: input.receipt,
            created_time: now,
            updated_time: now,
            validity_period: input.validity_period,
            org_id: org.clone(),
        };
        let authorization_resources: Vec<AuthorizationResource> = authorizations
            .into_iter()
            .map(|authorization| AuthorizationResource {
                authorization_id: self.id_or_generate(authorization.authorization_id),
                consent_id: consent.consent_id.clone(),
                user_id: authorization.user_id,
                authorization_type: authorization.authorization_type,
                authorization_status: authorization.authorization_status,
                updated_time: now,
            })
            .collect();

        Ok(DetailedConsentResource {
            consent,
            authorization_resources,
            mapping_resources: Vec::new(),
            attributes: input.attributes,
        })
    }

    pub(super) async fn create_consent_in(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        detailed: &DetailedConsentResource,
    ) -> AppResult<()> {
        transaction.insert_consent(org, &detailed.consent).await?;
        for authorization in &detailed.authorization_resources {
            transaction.insert_authorization(org, authorization).await?;
        }
        if !detailed.attributes.is_empty() {
            transaction
                .upsert_attributes(org, detailed.consent_id(), &detailed.attributes)
                .await?;
        }

        let actors: Vec<Option<String>> = if detailed.authorization_resources.is_empty() {
            vec![None]
        } else {
            detailed
                .authorization_resources
                .iter()
                .map(|authorization| authorization.user_id.clone())
                .collect()
        };
        for action_by in actors {
            let record = ConsentStatusAuditRecord {
                status_audit_id: self.ids.generate(),
                consent_id: detailed.consent_id().to_owned(),
                current_status: detailed.consent.current_status.clone(),
                previous_status: None,
                action_by,
                reason: Some(CREATED_REASON.to_owned()),
                action_time: detailed.consent.created_time,
            };
            transaction.insert_status_audit_record(org, &record).await?;
        }

        Ok(())
    }

    /// Returns a consent header, with its attributes when requested.
    pub async fn get_consent(
        &self,
        org: &OrgId,
        consent_id: &str,
        with_attributes: bool,
    ) -> AppResult<ConsentWithAttributes> {
        require_argument(consent_id, "consent id")?;

        let mut transaction = self.begin().await?;
        let result = async {
            let consent = transaction
                .fetch_consent(org, consent_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("consent '{}' does not exist", LogSafe(consent_id)))
                })?;
            let attributes = if with_attributes {
                Some(transaction.fetch_attributes(org, consent_id, None).await?)
            } else {
                None
            };

            Ok::<_, AppError>(ConsentWithAttributes {
                consent,
                attributes,
            })
        }
        .await;
        self.settle(transaction, "get_consent", result).await
    }

    /// Returns the full aggregate of one consent.
    pub async fn get_detailed_consent(
        &self,
        org: &OrgId,
        consent_id: &str,
    ) -> AppResult<DetailedConsentResource> {
        require_argument(consent_id, "consent id")?;

        let mut transaction = self.begin().await?;
        let result = self.load_detailed(&mut *transaction, org, consent_id).await;
        self.settle(transaction, "get_detailed_consent", result)
            .await
    }

    /// Returns aggregates matching `filter`.
    pub async fn search_detailed_consents(
        &self,
        org: &OrgId,
        filter: &ConsentSearchFilter,
    ) -> AppResult<Vec<DetailedConsentResource>> {
        let mut transaction = self.begin().await?;
        let result = transaction
            .search_detailed_consents(org, filter)
            .await
            .map_err(AppError::from);
        self.settle(transaction, "search_detailed_consents", result)
            .await
    }

    /// Moves a consent to `new_status`, writing audit rows and amendment history.
    ///
    /// Each authorization resource yields one audit row attributed to its
    /// user; `action_by` is recorded where an authorization has no user.
    pub async fn update_consent_status(
        &self,
        org: &OrgId,
        consent_id: &str,
        new_status: ConsentStatus,
        reason: &str,
        action_by: Option<&str>,
    ) -> AppResult<ConsentResource> {
        require_argument(consent_id, "consent id")?;

        let mut transaction = self.begin().await?;
        let result = self
            .change_status_in(
                &mut *transaction,
                org,
                consent_id,
                new_status,
                reason,
                action_by,
            )
            .await;
        self.settle(transaction, "update_consent_status", result)
            .await
    }

    /// Revokes a consent and deactivates its account bindings.
    ///
    /// Without `action_by` the revocation is attributed to the user of the
    /// first authorization resource.
    pub async fn revoke_consent(
        &self,
        org: &OrgId,
        consent_id: &str,
        action_by: Option<&str>,
        reason: &str,
    ) -> AppResult<ConsentResource> {
        require_argument(consent_id, "consent id")?;

        let mut transaction = self.begin().await?;
        let result = self
            .revoke_consent_in(&mut *transaction, org, consent_id, action_by, reason)
            .await;
        self.settle(transaction, "revoke_consent", result).await
    }

    async fn revoke_consent_in(
        &self,
        transaction: &mut dyn ConsentTransaction,
        org: &OrgId,
        consent_id: &str,
        action_by: Option<&str>,
        reason: &str,
    ) -> AppResult<ConsentResource> {
        let before = self.lock_detailed(transaction, org, consent_id).await?;
        ensure_not_revoked(&before.consent)?;

        let actor = action_by
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .or_else(|| before.first_authorized_user().map(str::to_owned))
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "no actor available to revoke consent '{}'",
                    LogSafe(consent_id)
                ))
            })?;

        let now = self.clock.now();
        transaction
            .update_consent_status(org, consent_id, &ConsentStatus::Revoked, now)
            .await?;

        let mut after = before.clone();
        after.consent.current_status = ConsentStatus::Revoked;
        after.consent.updated_time = now;
        deactivate_where(transaction, org, &mut after, |_| true).await?;

        self.record_transition(
            transaction,
            org,
            &before,
            &after,
            reason,
            Attribution::Actor(actor.as_str()),
        )
        .await?;

        Ok(after.consent)
    }

    /// Moves every consent matching the criteria to a new status.
    ///
    /// Each consent is updated in its own transaction. The first failure
    /// stops the run; consents already updated stay updated. Returns the ids
    /// of updated consents. At least one source status is required.
    pub async fn bulk_update_consent_status(
        &self,
        org: &OrgId,
        update: BulkStatusUpdate,
    ) -> AppResult<Vec<String>> {
        if update.from_statuses.is_empty() {
            return Err(AppError::BadRequest(
                "bulk status update needs at least one status to move consents from".to_owned(),
            ));
        }

        let filter = ConsentSearchFilter {
            client_ids: update.client_id.iter().cloned().collect(),
            consent_types: update.consent_type.into_iter().collect(),
            statuses: update.from_statuses.clone(),
            user_ids: update.user_id.iter().cloned().collect(),
            ..ConsentSearchFilter::default()
        };
        let matches = self.search_detailed_consents(org, &filter).await?;
        if matches.is_empty() {
            return Err(AppError::NotFound(
                "no consents match the bulk status update criteria".to_owned(),
            ));
        }

        let mut updated = Vec::with_capacity(matches.len());
        for detailed in matches {
            self.update_consent_status(
                org,
                detailed.consent_id(),
                update.new_status.clone(),
                update.reason.as_str(),
                update.user_id.as_deref(),
            )
            .await?;
            updated.push(detailed.consent.consent_id);
        }

        info!(
            org_id = %org,
            updated = updated.len(),
            new_status = %LogSafe(update.new_status.as_str()),
            "bulk consent status update finished"
        );
        Ok(updated)
    }

    /// Deletes a consent with its authorizations, bindings and attributes.
    ///
    /// Status audit and amendment history rows are kept.
    pub async fn delete_consent(&self, org: &OrgId, consent_id: &str) -> AppResult<()> {
        require_argument(consent_id, "consent id")?;

        let mut transaction = self.begin().await?;
        let result = async {
            if transaction.fetch_consent(org, consent_id).await?.is_none() {
                return Err(AppError::NotFound(format!(
                    "consent '{}' does not exist",
                    LogSafe(consent_id)
                )));
            }
            transaction.delete_consent(org, consent_id).await?;
            Ok::<_, AppError>(())
        }
        .await;
        self.settle(transaction, "delete_consent", result).await
    }

    /// Replaces the receipt and/or validity period of a consent.
    ///
    /// The status is unchanged; the amendment is still audited so its
    /// history rows have a status audit record to hang off.
    pub async fn amend_consent_data(
        &self,
        org: &OrgId,
        amendment: AmendConsentData,
    ) -> AppResult<DetailedConsentResource> {
        let AmendConsentData {
            consent_id,
            receipt,
            validity_period,
            reason,
            action_by,
        } = amendment;
        require_argument(consent_id.as_str(), "consent id")?;
        require_non_blank(reason.as_str(), "amendment reason")?;
        if receipt.is_none() && validity_period.is_none() {
            return Err(AppError::BadRequest(
                "an amendment must change the receipt or the validity period".to_owned(),
            ));
        }

        let mut transaction = self.begin().await?;
        let result = async {
            let before = self
                .lock_detailed(&mut *transaction, org, consent_id.as_str())
                .await?;
            ensure_not_revoked(&before.consent)?;

            let mut after = before.clone();
            if receipt.is_some() {
                after.consent.receipt = receipt;
            }
            if validity_period.is_some() {
                after.consent.validity_period = validity_period;
            }
            after.consent.updated_time = self.clock.now();

            transaction.update_consent_data(org, &after.consent).await?;
            self.record_transition(
                &mut *transaction,
                org,
                &before,
                &after,
                reason.as_str(),
                Attribution::PerAuthorization {
                    fallback: action_by.as_deref(),
                },
            )
            .await?;

            Ok::<_, AppError>(after)
        }
        .await;
        self.settle(transaction, "amend_consent_data", result).await
    }

    /// Expires every consent in an eligible status whose validity period has passed.
    ///
    /// Failures are logged and skipped so one bad consent does not block
    /// the sweep. Returns the ids of expired consents.
    pub async fn expire_lapsed_consents(
        &self,
        org: &OrgId,
        sweep: &ExpirySweep,
    ) -> AppResult<Vec<String>> {
        let filter = ConsentSearchFilter {
            statuses: sweep.eligible_statuses.clone(),
            ..ConsentSearchFilter::default()
        };
        let now = self.clock.now();
        let lapsed: Vec<String> = self
            .search_detailed_consents(org, &filter)
            .await?
            .into_iter()
            .filter(|detailed| {
                detailed
                    .consent
                    .validity_period
                    .is_some_and(|validity_period| validity_period < now)
            })
            .map(|detailed| detailed.consent.consent_id)
            .collect();

        let mut expired = Vec::with_capacity(lapsed.len());
        for consent_id in lapsed {
            match self
                .update_consent_status(
                    org,
                    consent_id.as_str(),
                    sweep.expired_status.clone(),
                    EXPIRED_REASON,
                    None,
                )
                .await
            {
                Ok(_) => expired.push(consent_id),
                Err(error) => warn!(
                    org_id = %org,
                    consent_id = %LogSafe(consent_id.as_str()),
                    error = %error.log_safe_message(),
                    "failed to expire consent"
                ),
            }
        }

        Ok(expired)
    }
}
