use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use obconsent_application::{
    AuditRecordQuery, ConsentSearchFilter, ConsentStore, ConsentTransaction, StoreError, paginate,
};
use obconsent_core::OrgId;
use obconsent_domain::{
    AuthorizationResource, ConsentAttributes, ConsentHistoryEntry, ConsentMappingResource,
    ConsentResource, ConsentStatus, ConsentStatusAuditRecord, DetailedConsentResource,
    MappingStatus,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

type Tables = BTreeMap<OrgId, OrgTables>;

#[derive(Debug, Clone)]
struct StoredMapping {
    consent_id: String,
    mapping: ConsentMappingResource,
}

#[derive(Debug, Clone, Default)]
struct OrgTables {
    consents: BTreeMap<String, ConsentResource>,
    authorizations: BTreeMap<String, AuthorizationResource>,
    mappings: BTreeMap<String, StoredMapping>,
    attributes: BTreeMap<String, ConsentAttributes>,
    audit_records: Vec<ConsentStatusAuditRecord>,
    history: Vec<ConsentHistoryEntry>,
}

impl OrgTables {
    fn detailed(&self, consent_id: &str) -> Option<DetailedConsentResource> {
        let consent = self.consents.get(consent_id)?.clone();
        let mut authorization_resources: Vec<AuthorizationResource> = self
            .authorizations
            .values()
            .filter(|authorization| authorization.consent_id == consent_id)
            .cloned()
            .collect();
        authorization_resources.sort_by(|left, right| left.updated_time.cmp(&right.updated_time));

        Some(DetailedConsentResource {
            consent,
            authorization_resources,
            mapping_resources: self
                .mappings
                .values()
                .filter(|stored| stored.consent_id == consent_id)
                .map(|stored| stored.mapping.clone())
                .collect(),
            attributes: self.attributes.get(consent_id).cloned().unwrap_or_default(),
        })
    }

    fn consent_mut(&mut self, consent_id: &str) -> Result<&mut ConsentResource, StoreError> {
        self.consents
            .get_mut(consent_id)
            .ok_or_else(|| StoreError::Update(format!("consent '{consent_id}' does not exist")))
    }

    fn require_consent(&self, consent_id: &str) -> Result<(), StoreError> {
        if self.consents.contains_key(consent_id) {
            Ok(())
        } else {
            Err(StoreError::Insertion(format!(
                "consent '{consent_id}' does not exist"
            )))
        }
    }
}

/// In-memory consent store partitioned by organization.
///
/// A transaction holds the store lock until it ends and writes to private
/// copies of the organizations it touches, so transactions are serialized
/// and a rollback leaves no trace.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConsentStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryConsentStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentStore for InMemoryConsentStore {
    async fn begin(&self) -> Result<Box<dyn ConsentTransaction>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        Ok(Box::new(InMemoryConsentTransaction {
            guard: Some(guard),
            touched: Tables::new(),
        }))
    }
}

struct InMemoryConsentTransaction {
    guard: Option<OwnedMutexGuard<Tables>>,
    touched: Tables,
}

impl InMemoryConsentTransaction {
    /// Returns the private copy of one organization, copying it on first use.
    fn org(&mut self, org: &OrgId) -> Result<&mut OrgTables, StoreError> {
        let Some(committed) = self.guard.as_deref() else {
            return Err(StoreError::Transaction(
                "transaction has already finished".to_owned(),
            ));
        };

        Ok(self
            .touched
            .entry(org.clone())
            .or_insert_with(|| committed.get(org).cloned().unwrap_or_default()))
    }

    fn finish(&mut self) -> Result<OwnedMutexGuard<Tables>, StoreError> {
        self.guard.take().ok_or_else(|| {
            StoreError::Transaction("transaction has already finished".to_owned())
        })
    }
}

#[async_trait]
impl ConsentTransaction for InMemoryConsentTransaction {
    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut guard = self.finish()?;
        guard.extend(std::mem::take(&mut self.touched));
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.finish()?;
        self.touched.clear();
        Ok(())
    }

    async fn insert_consent(
        &mut self,
        org: &OrgId,
        consent: &ConsentResource,
    ) -> Result<(), StoreError> {
        let tables = self.org(org)?;
        if tables.consents.contains_key(&consent.consent_id) {
            return Err(StoreError::Insertion(format!(
                "consent '{}' already exists",
                consent.consent_id
            )));
        }

        tables
            .consents
            .insert(consent.consent_id.clone(), consent.clone());
        Ok(())
    }

    async fn fetch_consent(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<ConsentResource>, StoreError> {
        Ok(self.org(org)?.consents.get(consent_id).cloned())
    }

    async fn fetch_detailed_consent(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<DetailedConsentResource>, StoreError> {
        Ok(self.org(org)?.detailed(consent_id))
    }

    async fn fetch_detailed_consent_for_update(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<DetailedConsentResource>, StoreError> {
        Ok(self.org(org)?.detailed(consent_id))
    }

    async fn search_detailed_consents(
        &mut self,
        org: &OrgId,
        filter: &ConsentSearchFilter,
    ) -> Result<Vec<DetailedConsentResource>, StoreError> {
        let tables = self.org(org)?;
        let mut matches: Vec<DetailedConsentResource> = tables
            .consents
            .keys()
            .filter_map(|consent_id| tables.detailed(consent_id))
            .filter(|detailed| filter.matches(detailed))
            .collect();
        matches.sort_by(|left, right| {
            right
                .consent
                .updated_time
                .cmp(&left.consent.updated_time)
                .then_with(|| left.consent.consent_id.cmp(&right.consent.consent_id))
        });

        Ok(paginate(matches, filter.limit, filter.offset))
    }

    async fn update_consent_status(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        status: &ConsentStatus,
        updated_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let consent = self.org(org)?.consent_mut(consent_id)?;
        consent.current_status = status.clone();
        consent.updated_time = updated_time;
        Ok(())
    }

    async fn update_consent_data(
        &mut self,
        org: &OrgId,
        consent: &ConsentResource,
    ) -> Result<(), StoreError> {
        let stored = self.org(org)?.consent_mut(consent.consent_id.as_str())?;
        stored.receipt = consent.receipt.clone();
        stored.validity_period = consent.validity_period;
        stored.updated_time = consent.updated_time;
        Ok(())
    }

    async fn delete_consent(&mut self, org: &OrgId, consent_id: &str) -> Result<(), StoreError> {
        let tables = self.org(org)?;
        if tables.consents.remove(consent_id).is_none() {
            return Err(StoreError::Deletion(format!(
                "consent '{consent_id}' does not exist"
            )));
        }

        tables
            .authorizations
            .retain(|_, authorization| authorization.consent_id != consent_id);
        tables
            .mappings
            .retain(|_, stored| stored.consent_id != consent_id);
        tables.attributes.remove(consent_id);
        Ok(())
    }

    async fn insert_authorization(
        &mut self,
        org: &OrgId,
        authorization: &AuthorizationResource,
    ) -> Result<(), StoreError> {
        let tables = self.org(org)?;
        tables.require_consent(authorization.consent_id.as_str())?;
        if tables
            .authorizations
            .contains_key(&authorization.authorization_id)
        {
            return Err(StoreError::Insertion(format!(
                "authorization '{}' already exists",
                authorization.authorization_id
            )));
        }

        tables
            .authorizations
            .insert(authorization.authorization_id.clone(), authorization.clone());
        Ok(())
    }

    async fn fetch_authorization(
        &mut self,
        org: &OrgId,
        authorization_id: &str,
    ) -> Result<Option<AuthorizationResource>, StoreError> {
        Ok(self.org(org)?.authorizations.get(authorization_id).cloned())
    }

    async fn search_authorizations(
        &mut self,
        org: &OrgId,
        consent_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<AuthorizationResource>, StoreError> {
        Ok(self
            .org(org)?
            .authorizations
            .values()
            .filter(|authorization| {
                consent_id.is_none_or(|consent_id| authorization.consent_id == consent_id)
                    && user_id
                        .is_none_or(|user_id| authorization.user_id.as_deref() == Some(user_id))
            })
            .cloned()
            .collect())
    }

    async fn update_authorization(
        &mut self,
        org: &OrgId,
        authorization: &AuthorizationResource,
    ) -> Result<(), StoreError> {
        let stored = self
            .org(org)?
            .authorizations
            .get_mut(&authorization.authorization_id)
            .ok_or_else(|| {
                StoreError::Update(format!(
                    "authorization '{}' does not exist",
                    authorization.authorization_id
                ))
            })?;
        *stored = authorization.clone();
        Ok(())
    }

    async fn delete_authorization(
        &mut self,
        org: &OrgId,
        authorization_id: &str,
    ) -> Result<(), StoreError> {
        let tables = self.org(org)?;
        if tables.authorizations.remove(authorization_id).is_none() {
            return Err(StoreError::Deletion(format!(
                "authorization '{authorization_id}' does not exist"
            )));
        }

        tables
            .mappings
            .retain(|_, stored| stored.mapping.authorization_id != authorization_id);
        Ok(())
    }

    async fn insert_mapping(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        mapping: &ConsentMappingResource,
    ) -> Result<(), StoreError> {
        let tables = self.org(org)?;
        tables.require_consent(consent_id)?;
        if tables.mappings.contains_key(&mapping.mapping_id) {
            return Err(StoreError::Insertion(format!(
                "mapping '{}' already exists",
                mapping.mapping_id
            )));
        }

        tables.mappings.insert(
            mapping.mapping_id.clone(),
            StoredMapping {
                consent_id: consent_id.to_owned(),
                mapping: mapping.clone(),
            },
        );
        Ok(())
    }

    async fn update_mapping_status(
        &mut self,
        org: &OrgId,
        mapping_ids: &[String],
        status: MappingStatus,
    ) -> Result<(), StoreError> {
        let tables = self.org(org)?;
        for mapping_id in mapping_ids {
            let mapping = tables
                .mappings
                .get_mut(mapping_id)
                .map(|stored| &mut stored.mapping)
                .ok_or_else(|| {
                    StoreError::Update(format!("mapping '{mapping_id}' does not exist"))
                })?;
            mapping.mapping_status = status;
        }

        Ok(())
    }

    async fn upsert_attributes(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        attributes: &ConsentAttributes,
    ) -> Result<(), StoreError> {
        let tables = self.org(org)?;
        tables.require_consent(consent_id)?;
        tables
            .attributes
            .entry(consent_id.to_owned())
            .or_default()
            .extend(
                attributes
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
        Ok(())
    }

    async fn fetch_attributes(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        keys: Option<&[String]>,
    ) -> Result<ConsentAttributes, StoreError> {
        let Some(attributes) = self.org(org)?.attributes.get(consent_id) else {
            return Ok(ConsentAttributes::new());
        };

        Ok(attributes
            .iter()
            .filter(|(key, _)| keys.is_none_or(|keys| keys.contains(key)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn fetch_attributes_by_name(
        &mut self,
        org: &OrgId,
        name: &str,
    ) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self
            .org(org)?
            .attributes
            .iter()
            .filter_map(|(consent_id, attributes)| {
                attributes
                    .get(name)
                    .map(|value| (consent_id.clone(), value.clone()))
            })
            .collect())
    }

    async fn fetch_consent_ids_by_attribute(
        &mut self,
        org: &OrgId,
        name: &str,
        value: &str,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .org(org)?
            .attributes
            .iter()
            .filter(|(_, attributes)| attributes.get(name).map(String::as_str) == Some(value))
            .map(|(consent_id, _)| consent_id.clone())
            .collect())
    }

    async fn delete_attributes(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        keys: &[String],
    ) -> Result<(), StoreError> {
        if let Some(attributes) = self.org(org)?.attributes.get_mut(consent_id) {
            attributes.retain(|key, _| !keys.contains(key));
        }

        Ok(())
    }

    async fn insert_status_audit_record(
        &mut self,
        org: &OrgId,
        record: &ConsentStatusAuditRecord,
    ) -> Result<(), StoreError> {
        let tables = self.org(org)?;
        if tables
            .audit_records
            .iter()
            .any(|stored| stored.status_audit_id == record.status_audit_id)
        {
            return Err(StoreError::Insertion(format!(
                "status audit record '{}' already exists",
                record.status_audit_id
            )));
        }

        tables.audit_records.push(record.clone());
        Ok(())
    }

    async fn search_status_audit_records(
        &mut self,
        org: &OrgId,
        query: &AuditRecordQuery,
    ) -> Result<Vec<ConsentStatusAuditRecord>, StoreError> {
        let mut records: Vec<ConsentStatusAuditRecord> = self
            .org(org)?
            .audit_records
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        records.sort_by(|left, right| right.action_time.cmp(&left.action_time));

        Ok(paginate(records, query.limit, query.offset))
    }

    async fn fetch_status_audit_record(
        &mut self,
        org: &OrgId,
        status_audit_id: &str,
    ) -> Result<ConsentStatusAuditRecord, StoreError> {
        self.org(org)?
            .audit_records
            .iter()
            .find(|record| record.status_audit_id == status_audit_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::NoRecordsFound(format!(
                    "status audit record '{status_audit_id}' does not exist"
                ))
            })
    }

    async fn insert_history_entry(
        &mut self,
        org: &OrgId,
        entry: &ConsentHistoryEntry,
    ) -> Result<(), StoreError> {
        self.org(org)?.history.push(entry.clone());
        Ok(())
    }

    async fn fetch_history_entries(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Vec<ConsentHistoryEntry>, StoreError> {
        Ok(self
            .org(org)?
            .history
            .iter()
            .filter(|entry| entry.consent_id == consent_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests;
