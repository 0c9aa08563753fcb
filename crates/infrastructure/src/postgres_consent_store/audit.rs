use super::*;

impl PostgresConsentTransaction {
    pub(super) async fn insert_status_audit_record_impl(
        &mut self,
        org: &OrgId,
        record: &ConsentStatusAuditRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO consent_status_audit (
                org_id,
                status_audit_id,
                consent_id,
                current_status,
                previous_status,
                action_by,
                reason,
                action_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(org.as_str())
        .bind(record.status_audit_id.as_str())
        .bind(record.consent_id.as_str())
        .bind(record.current_status.as_str())
        .bind(record.previous_status.as_ref().map(ConsentStatus::as_str))
        .bind(record.action_by.as_deref())
        .bind(record.reason.as_deref())
        .bind(record.action_time)
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Insertion(format!(
                "failed to insert status audit record for consent '{}' in org '{org}': {error}",
                record.consent_id
            ))
        })?;

        Ok(())
    }

    pub(super) async fn search_status_audit_records_impl(
        &mut self,
        org: &OrgId,
        query: &AuditRecordQuery,
    ) -> Result<Vec<ConsentStatusAuditRecord>, StoreError> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT status_audit_id, consent_id, current_status, previous_status, action_by, \
             reason, action_time FROM consent_status_audit WHERE org_id = ",
        );
        builder.push_bind(org.as_str());

        if !query.consent_ids.is_empty() {
            builder.push(" AND consent_id = ANY(");
            builder.push_bind(query.consent_ids.clone());
            builder.push(")");
        }
        if let Some(status) = &query.status {
            builder.push(" AND current_status = ");
            builder.push_bind(status.as_str().to_owned());
        }
        if let Some(action_by) = &query.action_by {
            builder.push(" AND action_by = ");
            builder.push_bind(action_by.clone());
        }
        if let Some(from_time) = query.from_time {
            builder.push(" AND action_time >= ");
            builder.push_bind(from_time);
        }
        if let Some(to_time) = query.to_time {
            builder.push(" AND action_time <= ");
            builder.push_bind(to_time);
        }

        builder.push(" ORDER BY action_time DESC, status_audit_id ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(to_i64(limit, "audit search limit")?);
        }
        if let Some(offset) = query.offset {
            builder.push(" OFFSET ");
            builder.push_bind(to_i64(offset, "audit search offset")?);
        }

        let rows = builder
            .build_query_as::<StatusAuditRow>()
            .fetch_all(self.connection()?)
            .await
            .map_err(|error| {
                StoreError::Retrieval(format!(
                    "failed to search status audit records in org '{org}': {error}"
                ))
            })?;

        Ok(rows.into_iter().map(ConsentStatusAuditRecord::from).collect())
    }

    pub(super) async fn fetch_status_audit_record_impl(
        &mut self,
        org: &OrgId,
        status_audit_id: &str,
    ) -> Result<ConsentStatusAuditRecord, StoreError> {
        let row = sqlx::query_as::<_, StatusAuditRow>(
            r#"
            SELECT
                status_audit_id,
                consent_id,
                current_status,
                previous_status,
                action_by,
                reason,
                action_time
            FROM consent_status_audit
            WHERE org_id = $1 AND status_audit_id = $2
            "#,
        )
        .bind(org.as_str())
        .bind(status_audit_id)
        .fetch_optional(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to fetch status audit record '{status_audit_id}' in org '{org}': {error}"
            ))
        })?;

        row.map(ConsentStatusAuditRecord::from).ok_or_else(|| {
            StoreError::NoRecordsFound(format!(
                "status audit record '{status_audit_id}' does not exist"
            ))
        })
    }
}
