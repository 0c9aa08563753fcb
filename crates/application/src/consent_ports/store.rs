use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use obconsent_core::{AppError, OrgId, PersistenceFailure};
use obconsent_domain::{
    AuthorizationResource, ConsentAttributes, ConsentHistoryEntry, ConsentMappingResource,
    ConsentResource, ConsentStatus, ConsentStatusAuditRecord, DetailedConsentResource,
    MappingStatus,
};
use thiserror::Error;

use super::queries::{AuditRecordQuery, ConsentSearchFilter};

/// Failure signalled by a consent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row could not be inserted.
    #[error("insertion failed: {0}")]
    Insertion(String),

    /// A row could not be read.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// A single-record query matched nothing.
    #[error("no records found: {0}")]
    NoRecordsFound(String),

    /// A row could not be updated.
    #[error("update failed: {0}")]
    Update(String),

    /// A row could not be deleted.
    #[error("deletion failed: {0}")]
    Deletion(String),

    /// Begin, commit or rollback failed.
    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        let (kind, message) = match error {
            StoreError::NoRecordsFound(message) => return AppError::NotFound(message),
            StoreError::Insertion(message) => (PersistenceFailure::Insertion, message),
            StoreError::Retrieval(message) => (PersistenceFailure::Retrieval, message),
            StoreError::Update(message) => (PersistenceFailure::Update, message),
            StoreError::Deletion(message) => (PersistenceFailure::Deletion, message),
            StoreError::Transaction(message) => (PersistenceFailure::Transaction, message),
        };

        AppError::Persistence { kind, message }
    }
}

/// Persistence port for the consent aggregate.
#[async_trait]
pub trait ConsentStore: Send + Sync {
    /// Opens a transaction. Dropping it without commit discards its writes.
    async fn begin(&self) -> Result<Box<dyn ConsentTransaction>, StoreError>;
}

/// Unit of work over consent rows, partitioned by organization.
#[async_trait]
pub trait ConsentTransaction: Send {
    /// Makes every write in this transaction durable.
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Discards every write in this transaction.
    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Inserts a consent header row.
    async fn insert_consent(
        &mut self,
        org: &OrgId,
        consent: &ConsentResource,
    ) -> Result<(), StoreError>;

    /// Returns a consent header row.
    async fn fetch_consent(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<ConsentResource>, StoreError>;

    /// Returns the full aggregate of one consent.
    async fn fetch_detailed_consent(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<DetailedConsentResource>, StoreError>;

    /// Returns the full aggregate of one consent and holds a write lock on
    /// its header row until the transaction ends.
    ///
    /// Every read-check-write path loads through this method so concurrent
    /// transitions of one consent serialize.
    async fn fetch_detailed_consent_for_update(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<DetailedConsentResource>, StoreError>;

    /// Returns aggregates matching a filter, newest update first.
    async fn search_detailed_consents(
        &mut self,
        org: &OrgId,
        filter: &ConsentSearchFilter,
    ) -> Result<Vec<DetailedConsentResource>, StoreError>;

    /// Sets the status and update time of a consent.
    async fn update_consent_status(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        status: &ConsentStatus,
        updated_time: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Replaces the receipt, validity period and update time of a consent.
    async fn update_consent_data(
        &mut self,
        org: &OrgId,
        consent: &ConsentResource,
    ) -> Result<(), StoreError>;

    /// Deletes a consent with its authorizations, mappings and attributes.
    async fn delete_consent(&mut self, org: &OrgId, consent_id: &str) -> Result<(), StoreError>;

    /// Inserts an authorization resource.
    async fn insert_authorization(
        &mut self,
        org: &OrgId,
        authorization: &AuthorizationResource,
    ) -> Result<(), StoreError>;

    /// Returns one authorization resource.
    async fn fetch_authorization(
        &mut self,
        org: &OrgId,
        authorization_id: &str,
    ) -> Result<Option<AuthorizationResource>, StoreError>;

    /// Returns authorization resources filtered by consent and/or user.
    async fn search_authorizations(
        &mut self,
        org: &OrgId,
        consent_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<AuthorizationResource>, StoreError>;

    /// Overwrites user, status and update time of an authorization resource.
    async fn update_authorization(
        &mut self,
        org: &OrgId,
        authorization: &AuthorizationResource,
    ) -> Result<(), StoreError>;

    /// Deletes an authorization resource.
    async fn delete_authorization(
        &mut self,
        org: &OrgId,
        authorization_id: &str,
    ) -> Result<(), StoreError>;

    /// Inserts an account binding for a consent.
    async fn insert_mapping(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        mapping: &ConsentMappingResource,
    ) -> Result<(), StoreError>;

    /// Sets the status of several account bindings.
    async fn update_mapping_status(
        &mut self,
        org: &OrgId,
        mapping_ids: &[String],
        status: MappingStatus,
    ) -> Result<(), StoreError>;

    /// Inserts or replaces attributes by key.
    async fn upsert_attributes(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        attributes: &ConsentAttributes,
    ) -> Result<(), StoreError>;

    /// Returns attributes of a consent, optionally restricted to `keys`.
    async fn fetch_attributes(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        keys: Option<&[String]>,
    ) -> Result<ConsentAttributes, StoreError>;

    /// Returns consent id to value for every consent carrying attribute `name`.
    async fn fetch_attributes_by_name(
        &mut self,
        org: &OrgId,
        name: &str,
    ) -> Result<BTreeMap<String, String>, StoreError>;

    /// Returns ids of consents whose attribute `name` equals `value`.
    async fn fetch_consent_ids_by_attribute(
        &mut self,
        org: &OrgId,
        name: &str,
        value: &str,
    ) -> Result<Vec<String>, StoreError>;

    /// Deletes attributes by key.
    async fn delete_attributes(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        keys: &[String],
    ) -> Result<(), StoreError>;

    /// Appends a status audit record.
    async fn insert_status_audit_record(
        &mut self,
        org: &OrgId,
        record: &ConsentStatusAuditRecord,
    ) -> Result<(), StoreError>;

    /// Returns status audit records matching a query, newest first.
    async fn search_status_audit_records(
        &mut self,
        org: &OrgId,
        query: &AuditRecordQuery,
    ) -> Result<Vec<ConsentStatusAuditRecord>, StoreError>;

    /// Returns one status audit record, or [`StoreError::NoRecordsFound`].
    async fn fetch_status_audit_record(
        &mut self,
        org: &OrgId,
        status_audit_id: &str,
    ) -> Result<ConsentStatusAuditRecord, StoreError>;

    /// Appends an amendment history row.
    async fn insert_history_entry(
        &mut self,
        org: &OrgId,
        entry: &ConsentHistoryEntry,
    ) -> Result<(), StoreError>;

    /// Returns every amendment history row of a consent in insertion order.
    async fn fetch_history_entries(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Vec<ConsentHistoryEntry>, StoreError>;
}
