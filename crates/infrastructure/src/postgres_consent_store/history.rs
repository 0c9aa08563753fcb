use super::*;

impl PostgresConsentTransaction {
    pub(super) async fn insert_history_entry_impl(
        &mut self,
        org: &OrgId,
        entry: &ConsentHistoryEntry,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO consent_history (
                org_id,
                history_id,
                consent_id,
                record_id,
                status_audit_id,
                changed_timestamp,
                reason,
                data_type,
                changed_data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(org.as_str())
        .bind(entry.history_id.as_str())
        .bind(entry.consent_id.as_str())
        .bind(entry.record_id.as_str())
        .bind(entry.status_audit_id.as_str())
        .bind(entry.timestamp)
        .bind(entry.reason.as_str())
        .bind(entry.data_type.as_str())
        .bind(&entry.changed_data)
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Insertion(format!(
                "failed to insert history row '{}' for consent '{}' in org '{org}': {error}",
                entry.history_id, entry.consent_id
            ))
        })?;

        Ok(())
    }

    pub(super) async fn fetch_history_entries_impl(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Vec<ConsentHistoryEntry>, StoreError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT
                history_id,
                consent_id,
                record_id,
                status_audit_id,
                changed_timestamp,
                reason,
                data_type,
                changed_data
            FROM consent_history
            WHERE org_id = $1 AND consent_id = $2
            ORDER BY history_sequence ASC
            "#,
        )
        .bind(org.as_str())
        .bind(consent_id)
        .fetch_all(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to fetch history of consent '{consent_id}' in org '{org}': {error}"
            ))
        })?;

        rows.into_iter().map(ConsentHistoryEntry::try_from).collect()
    }
}
