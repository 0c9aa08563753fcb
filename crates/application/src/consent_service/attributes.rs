use std::collections::BTreeMap;

use obconsent_core::{AppError, AppResult, LogSafe, OrgId};
use obconsent_domain::ConsentAttributes;

use super::{ConsentService, require_non_blank};

impl ConsentService {
    /// Stores attributes for a consent, replacing values of existing keys.
    pub async fn store_consent_attributes(
        &self,
        org: &OrgId,
        consent_id: &str,
        attributes: ConsentAttributes,
    ) -> AppResult<()> {
        self.upsert_attributes(org, consent_id, attributes, "store_consent_attributes")
            .await
    }

    /// Replaces values of the given attribute keys.
    pub async fn update_consent_attributes(
        &self,
        org: &OrgId,
        consent_id: &str,
        attributes: ConsentAttributes,
    ) -> AppResult<()> {
        self.upsert_attributes(org, consent_id, attributes, "update_consent_attributes")
            .await
    }

    async fn upsert_attributes(
        &self,
        org: &OrgId,
        consent_id: &str,
        attributes: ConsentAttributes,
        operation: &'static str,
    ) -> AppResult<()> {
        require_non_blank(consent_id, "consent id")?;
        if attributes.is_empty() {
            return Err(AppError::BadRequest(
                "consent attributes must not be empty".to_owned(),
            ));
        }
        ensure_attribute_keys(&attributes)?;

        let mut transaction = self.begin().await?;
        let result = transaction
            .upsert_attributes(org, consent_id, &attributes)
            .await
            .map_err(AppError::from);
        self.settle(transaction, operation, result).await
    }

    /// Returns attributes of an existing consent, optionally restricted to `keys`.
    pub async fn get_consent_attributes(
        &self,
        org: &OrgId,
        consent_id: &str,
        keys: Option<&[String]>,
    ) -> AppResult<ConsentAttributes> {
        require_non_blank(consent_id, "consent id")?;
        if keys.is_some_and(<[String]>::is_empty) {
            return Err(AppError::BadRequest(
                "attribute keys must not be empty".to_owned(),
            ));
        }

        let mut transaction = self.begin().await?;
        let result = async {
            if transaction.fetch_consent(org, consent_id).await?.is_none() {
                return Err(AppError::BadRequest(format!(
                    "consent '{}' does not exist",
                    LogSafe(consent_id)
                )));
            }
            Ok::<_, AppError>(transaction.fetch_attributes(org, consent_id, keys).await?)
        }
        .await;
        self.settle(transaction, "get_consent_attributes", result)
            .await
    }

    /// Deletes the given attribute keys of a consent.
    pub async fn delete_consent_attributes(
        &self,
        org: &OrgId,
        consent_id: &str,
        keys: &[String],
    ) -> AppResult<()> {
        require_non_blank(consent_id, "consent id")?;
        if keys.is_empty() {
            return Err(AppError::BadRequest(
                "attribute keys must not be empty".to_owned(),
            ));
        }

        let mut transaction = self.begin().await?;
        let result = transaction
            .delete_attributes(org, consent_id, keys)
            .await
            .map_err(AppError::from);
        self.settle(transaction, "delete_consent_attributes", result)
            .await
    }

    /// Returns consent id to value for every consent carrying attribute `name`.
    pub async fn get_consent_attributes_by_name(
        &self,
        org: &OrgId,
        name: &str,
    ) -> AppResult<BTreeMap<String, String>> {
        require_non_blank(name, "attribute name")?;

        let mut transaction = self.begin().await?;
        let result = transaction
            .fetch_attributes_by_name(org, name)
            .await
            .map_err(AppError::from);
        self.settle(transaction, "get_consent_attributes_by_name", result)
            .await
    }

    /// Returns ids of consents whose attribute `name` equals `value`.
    pub async fn get_consent_ids_by_attribute(
        &self,
        org: &OrgId,
        name: &str,
        value: &str,
    ) -> AppResult<Vec<String>> {
        require_non_blank(name, "attribute name")?;
        require_non_blank(value, "attribute value")?;

        let mut transaction = self.begin().await?;
        let result = transaction
            .fetch_consent_ids_by_attribute(org, name, value)
            .await
            .map_err(AppError::from);
        self.settle(transaction, "get_consent_ids_by_attribute", result)
            .await
    }
}

pub(super) fn ensure_attribute_keys(attributes: &ConsentAttributes) -> AppResult<()> {
    if attributes.keys().any(|key| key.trim().is_empty()) {
        return Err(AppError::BadRequest(
            "consent attribute keys must not be blank".to_owned(),
        ));
    }

    Ok(())
}
