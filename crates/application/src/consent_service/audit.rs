use obconsent_core::{AppError, AppResult, OrgId};
use obconsent_domain::ConsentStatusAuditRecord;

use crate::consent_ports::{AuditRecordQuery, StoreError};

use super::{ConsentService, require_non_blank};

impl ConsentService {
    /// Returns status audit records matching `query`. No match is an empty list.
    pub async fn search_consent_status_audit_records(
        &self,
        org: &OrgId,
        query: &AuditRecordQuery,
    ) -> AppResult<Vec<ConsentStatusAuditRecord>> {
        let mut transaction = self.begin().await?;
        let result = transaction
            .search_status_audit_records(org, query)
            .await
            .map_err(AppError::from);
        self.settle(transaction, "search_consent_status_audit_records", result)
            .await
    }

    /// Returns status audit records of the given consents, paginated.
    pub async fn get_consent_status_audit_records(
        &self,
        org: &OrgId,
        consent_ids: &[String],
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> AppResult<Vec<ConsentStatusAuditRecord>> {
        let query = AuditRecordQuery {
            consent_ids: consent_ids.to_vec(),
            limit,
            offset,
            ..AuditRecordQuery::default()
        };
        self.search_consent_status_audit_records(org, &query).await
    }

    /// Returns one status audit record.
    pub async fn get_consent_status_audit_record(
        &self,
        org: &OrgId,
        status_audit_id: &str,
    ) -> AppResult<ConsentStatusAuditRecord> {
        require_non_blank(status_audit_id, "status audit id")?;

        let mut transaction = self.begin().await?;
        let result = match transaction
            .fetch_status_audit_record(org, status_audit_id)
            .await
        {
            Err(StoreError::NoRecordsFound(message)) => Err(AppError::BadRequest(message)),
            other => other.map_err(AppError::from),
        };
        self.settle(transaction, "get_consent_status_audit_record", result)
            .await
    }
}
