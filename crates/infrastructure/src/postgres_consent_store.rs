use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use obconsent_application::{
    AuditRecordQuery, ConsentSearchFilter, ConsentStore, ConsentTransaction, StoreError,
};
use obconsent_core::OrgId;
use obconsent_domain::{
    AuthorizationResource, AuthorizationType, ChangedDataType, ConsentAttributes,
    ConsentHistoryEntry, ConsentMappingResource, ConsentResource, ConsentStatus,
    ConsentStatusAuditRecord, ConsentType, DetailedConsentResource, MappingStatus,
};
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder, Transaction};

mod attributes;
mod audit;
mod authorizations;
mod consents;
mod history;
mod mappings;

/// PostgreSQL-backed consent store.
#[derive(Clone)]
pub struct PostgresConsentStore {
    pool: PgPool,
}

impl PostgresConsentStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConsentStore for PostgresConsentStore {
    async fn begin(&self) -> Result<Box<dyn ConsentTransaction>, StoreError> {
        let transaction = self.pool.begin().await.map_err(|error| {
            StoreError::Transaction(format!("failed to start consent transaction: {error}"))
        })?;

        Ok(Box::new(PostgresConsentTransaction {
            transaction: Some(transaction),
        }))
    }
}

/// Open database transaction; taken on commit or rollback.
struct PostgresConsentTransaction {
    transaction: Option<Transaction<'static, Postgres>>,
}

impl PostgresConsentTransaction {
    fn connection(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.transaction.as_deref_mut().ok_or_else(finished)
    }

    fn finish(&mut self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.transaction.take().ok_or_else(finished)
    }
}

fn finished() -> StoreError {
    StoreError::Transaction("transaction has already finished".to_owned())
}

fn to_i64(value: usize, name: &str) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|error| StoreError::Retrieval(format!("invalid {name} value '{value}': {error}")))
}

#[derive(Debug, FromRow)]
struct ConsentRow {
    org_id: String,
    consent_id: String,
    client_id: String,
    consent_type: String,
    current_status: String,
    receipt: Option<String>,
    created_time: DateTime<Utc>,
    updated_time: DateTime<Utc>,
    validity_period: Option<DateTime<Utc>>,
}

impl TryFrom<ConsentRow> for ConsentResource {
    type Error = StoreError;

    fn try_from(row: ConsentRow) -> Result<Self, Self::Error> {
        let consent_type = ConsentType::from_str(row.consent_type.as_str()).map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to decode consent '{}': {error}",
                row.consent_id
            ))
        })?;
        let org_id = OrgId::new(row.org_id).map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to decode consent '{}': {error}",
                row.consent_id
            ))
        })?;

        Ok(Self {
            consent_id: row.consent_id,
            client_id: row.client_id,
            consent_type,
            current_status: ConsentStatus::from(row.current_status),
            receipt: row.receipt,
            created_time: row.created_time,
            updated_time: row.updated_time,
            validity_period: row.validity_period,
            org_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct AuthorizationRow {
    authorization_id: String,
    consent_id: String,
    user_id: Option<String>,
    authorization_type: String,
    authorization_status: String,
    updated_time: DateTime<Utc>,
}

impl TryFrom<AuthorizationRow> for AuthorizationResource {
    type Error = StoreError;

    fn try_from(row: AuthorizationRow) -> Result<Self, Self::Error> {
        let authorization_type = AuthorizationType::from_str(row.authorization_type.as_str())
            .map_err(|error| {
                StoreError::Retrieval(format!(
                    "failed to decode authorization '{}': {error}",
                    row.authorization_id
                ))
            })?;

        Ok(Self {
            authorization_id: row.authorization_id,
            consent_id: row.consent_id,
            user_id: row.user_id,
            authorization_type,
            authorization_status: row.authorization_status,
            updated_time: row.updated_time,
        })
    }
}

#[derive(Debug, FromRow)]
struct MappingRow {
    mapping_id: String,
    consent_id: String,
    authorization_id: String,
    account_id: String,
    permission: String,
    mapping_status: String,
}

impl MappingRow {
    fn into_resource(self) -> Result<(String, ConsentMappingResource), StoreError> {
        let mapping_status = MappingStatus::from_str(self.mapping_status.as_str()).map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to decode mapping '{}': {error}",
                self.mapping_id
            ))
        })?;

        Ok((
            self.consent_id,
            ConsentMappingResource {
                mapping_id: self.mapping_id,
                authorization_id: self.authorization_id,
                account_id: self.account_id,
                permission: self.permission,
                mapping_status,
            },
        ))
    }
}

#[derive(Debug, FromRow)]
struct StatusAuditRow {
    status_audit_id: String,
    consent_id: String,
    current_status: String,
    previous_status: Option<String>,
    action_by: Option<String>,
    reason: Option<String>,
    action_time: DateTime<Utc>,
}

impl From<StatusAuditRow> for ConsentStatusAuditRecord {
    fn from(row: StatusAuditRow) -> Self {
        Self {
            status_audit_id: row.status_audit_id,
            consent_id: row.consent_id,
            current_status: ConsentStatus::from(row.current_status),
            previous_status: row.previous_status.map(ConsentStatus::from),
            action_by: row.action_by,
            reason: row.reason,
            action_time: row.action_time,
        }
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    history_id: String,
    consent_id: String,
    record_id: String,
    status_audit_id: String,
    changed_timestamp: i64,
    reason: String,
    data_type: String,
    changed_data: Value,
}

impl TryFrom<HistoryRow> for ConsentHistoryEntry {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let data_type = ChangedDataType::from_str(row.data_type.as_str()).map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to decode history row '{}': {error}",
                row.history_id
            ))
        })?;

        Ok(Self {
            history_id: row.history_id,
            consent_id: row.consent_id,
            record_id: row.record_id,
            status_audit_id: row.status_audit_id,
            timestamp: row.changed_timestamp,
            reason: row.reason,
            data_type,
            changed_data: row.changed_data,
        })
    }
}

#[async_trait]
impl ConsentTransaction for PostgresConsentTransaction {
    async fn commit(&mut self) -> Result<(), StoreError> {
        self.finish()?.commit().await.map_err(|error| {
            StoreError::Transaction(format!("failed to commit consent transaction: {error}"))
        })
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.finish()?.rollback().await.map_err(|error| {
            StoreError::Transaction(format!("failed to roll back consent transaction: {error}"))
        })
    }

    async fn insert_consent(
        &mut self,
        org: &OrgId,
        consent: &ConsentResource,
    ) -> Result<(), StoreError> {
        self.insert_consent_impl(org, consent).await
    }

    async fn fetch_consent(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<ConsentResource>, StoreError> {
        self.fetch_consent_impl(org, consent_id).await
    }

    async fn fetch_detailed_consent(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<DetailedConsentResource>, StoreError> {
        let Some(consent) = self.fetch_consent_impl(org, consent_id).await? else {
            return Ok(None);
        };

        Ok(self.assemble_detailed(org, vec![consent]).await?.pop())
    }

    async fn fetch_detailed_consent_for_update(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<DetailedConsentResource>, StoreError> {
        let Some(consent) = self.lock_consent_impl(org, consent_id).await? else {
            return Ok(None);
        };

        Ok(self.assemble_detailed(org, vec![consent]).await?.pop())
    }

    async fn search_detailed_consents(
        &mut self,
        org: &OrgId,
        filter: &ConsentSearchFilter,
    ) -> Result<Vec<DetailedConsentResource>, StoreError> {
        let consents = self.search_consents_impl(org, filter).await?;
        self.assemble_detailed(org, consents).await
    }

    async fn update_consent_status(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        status: &ConsentStatus,
        updated_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update_consent_status_impl(org, consent_id, status, updated_time)
            .await
    }

    async fn update_consent_data(
        &mut self,
        org: &OrgId,
        consent: &ConsentResource,
    ) -> Result<(), StoreError> {
        self.update_consent_data_impl(org, consent).await
    }

    async fn delete_consent(&mut self, org: &OrgId, consent_id: &str) -> Result<(), StoreError> {
        self.delete_consent_impl(org, consent_id).await
    }

    async fn insert_authorization(
        &mut self,
        org: &OrgId,
        authorization: &AuthorizationResource,
    ) -> Result<(), StoreError> {
        self.insert_authorization_impl(org, authorization).await
    }

    async fn fetch_authorization(
        &mut self,
        org: &OrgId,
        authorization_id: &str,
    ) -> Result<Option<AuthorizationResource>, StoreError> {
        self.fetch_authorization_impl(org, authorization_id).await
    }

    async fn search_authorizations(
        &mut self,
        org: &OrgId,
        consent_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<AuthorizationResource>, StoreError> {
        self.search_authorizations_impl(org, consent_id, user_id)
            .await
    }

    async fn update_authorization(
        &mut self,
        org: &OrgId,
        authorization: &AuthorizationResource,
    ) -> Result<(), StoreError> {
        self.update_authorization_impl(org, authorization).await
    }

    async fn delete_authorization(
        &mut self,
        org: &OrgId,
        authorization_id: &str,
    ) -> Result<(), StoreError> {
        self.delete_authorization_impl(org, authorization_id).await
    }

    async fn insert_mapping(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        mapping: &ConsentMappingResource,
    ) -> Result<(), StoreError> {
        self.insert_mapping_impl(org, consent_id, mapping).await
    }

    async fn update_mapping_status(
        &mut self,
        org: &OrgId,
        mapping_ids: &[String],
        status: MappingStatus,
    ) -> Result<(), StoreError> {
        self.update_mapping_status_impl(org, mapping_ids, status)
            .await
    }

    async fn upsert_attributes(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        attributes: &ConsentAttributes,
    ) -> Result<(), StoreError> {
        self.upsert_attributes_impl(org, consent_id, attributes)
            .await
    }

    async fn fetch_attributes(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        keys: Option<&[String]>,
    ) -> Result<ConsentAttributes, StoreError> {
        self.fetch_attributes_impl(org, consent_id, keys).await
    }

    async fn fetch_attributes_by_name(
        &mut self,
        org: &OrgId,
        name: &str,
    ) -> Result<BTreeMap<String, String>, StoreError> {
        self.fetch_attributes_by_name_impl(org, name).await
    }

    async fn fetch_consent_ids_by_attribute(
        &mut self,
        org: &OrgId,
        name: &str,
        value: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.fetch_consent_ids_by_attribute_impl(org, name, value)
            .await
    }

    async fn delete_attributes(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        keys: &[String],
    ) -> Result<(), StoreError> {
        self.delete_attributes_impl(org, consent_id, keys).await
    }

    async fn insert_status_audit_record(
        &mut self,
        org: &OrgId,
        record: &ConsentStatusAuditRecord,
    ) -> Result<(), StoreError> {
        self.insert_status_audit_record_impl(org, record).await
    }

    async fn search_status_audit_records(
        &mut self,
        org: &OrgId,
        query: &AuditRecordQuery,
    ) -> Result<Vec<ConsentStatusAuditRecord>, StoreError> {
        self.search_status_audit_records_impl(org, query).await
    }

    async fn fetch_status_audit_record(
        &mut self,
        org: &OrgId,
        status_audit_id: &str,
    ) -> Result<ConsentStatusAuditRecord, StoreError> {
        self.fetch_status_audit_record_impl(org, status_audit_id)
            .await
    }

    async fn insert_history_entry(
        &mut self,
        org: &OrgId,
        entry: &ConsentHistoryEntry,
    ) -> Result<(), StoreError> {
        self.insert_history_entry_impl(org, entry).await
    }

    async fn fetch_history_entries(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Vec<ConsentHistoryEntry>, StoreError> {
        self.fetch_history_entries_impl(org, consent_id).await
    }
}
