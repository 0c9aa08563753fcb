use super::*;

const CONSENT_COLUMNS: &str = "org_id, consent_id, client_id, consent_type, current_status, \
     receipt, created_time, updated_time, validity_period";

impl PostgresConsentTransaction {
    pub(super) async fn insert_consent_impl(
        &mut self,
        org: &OrgId,
        consent: &ConsentResource,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO consents (
                org_id,
                consent_id,
                client_id,
                consent_type,
                current_status,
                receipt,
                created_time,
                updated_time,
                validity_period
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(org.as_str())
        .bind(consent.consent_id.as_str())
        .bind(consent.client_id.as_str())
        .bind(consent.consent_type.as_str())
        .bind(consent.current_status.as_str())
        .bind(consent.receipt.as_deref())
        .bind(consent.created_time)
        .bind(consent.updated_time)
        .bind(consent.validity_period)
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Insertion(format!(
                "failed to insert consent '{}' in org '{org}': {error}",
                consent.consent_id
            ))
        })?;

        Ok(())
    }

    pub(super) async fn fetch_consent_impl(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<ConsentResource>, StoreError> {
        let row = sqlx::query_as::<_, ConsentRow>(
            r#"
            SELECT
                org_id,
                consent_id,
                client_id,
                consent_type,
                current_status,
                receipt,
                created_time,
                updated_time,
                validity_period
            FROM consents
            WHERE org_id = $1 AND consent_id = $2
            "#,
        )
        .bind(org.as_str())
        .bind(consent_id)
        .fetch_optional(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to fetch consent '{consent_id}' in org '{org}': {error}"
            ))
        })?;

        row.map(ConsentResource::try_from).transpose()
    }

    pub(super) async fn lock_consent_impl(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<Option<ConsentResource>, StoreError> {
        let row = sqlx::query_as::<_, ConsentRow>(
            r#"
            SELECT
                org_id,
                consent_id,
                client_id,
                consent_type,
                current_status,
                receipt,
                created_time,
                updated_time,
                validity_period
            FROM consents
            WHERE org_id = $1 AND consent_id = $2
            FOR UPDATE
            "#,
        )
        .bind(org.as_str())
        .bind(consent_id)
        .fetch_optional(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to lock consent '{consent_id}' in org '{org}': {error}"
            ))
        })?;

        row.map(ConsentResource::try_from).transpose()
    }

    pub(super) async fn search_consents_impl(
        &mut self,
        org: &OrgId,
        filter: &ConsentSearchFilter,
    ) -> Result<Vec<ConsentResource>, StoreError> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT ");
        builder.push(CONSENT_COLUMNS);
        builder.push(" FROM consents WHERE org_id = ");
        builder.push_bind(org.as_str());

        if !filter.consent_ids.is_empty() {
            builder.push(" AND consent_id = ANY(");
            builder.push_bind(filter.consent_ids.clone());
            builder.push(")");
        }
        if !filter.client_ids.is_empty() {
            builder.push(" AND client_id = ANY(");
            builder.push_bind(filter.client_ids.clone());
            builder.push(")");
        }
        if !filter.consent_types.is_empty() {
            let consent_types: Vec<String> = filter
                .consent_types
                .iter()
                .map(|consent_type| consent_type.as_str().to_owned())
                .collect();
            builder.push(" AND consent_type = ANY(");
            builder.push_bind(consent_types);
            builder.push(")");
        }
        if !filter.statuses.is_empty() {
            let statuses: Vec<String> = filter
                .statuses
                .iter()
                .map(|status| status.as_str().to_owned())
                .collect();
            builder.push(" AND current_status = ANY(");
            builder.push_bind(statuses);
            builder.push(")");
        }
        if !filter.user_ids.is_empty() {
            builder.push(
                " AND EXISTS (SELECT 1 FROM consent_authorizations authorization_row \
                 WHERE authorization_row.org_id = consents.org_id \
                 AND authorization_row.consent_id = consents.consent_id \
                 AND authorization_row.user_id = ANY(",
            );
            builder.push_bind(filter.user_ids.clone());
            builder.push("))");
        }
        if let Some(from_time) = filter.from_time {
            builder.push(" AND updated_time >= ");
            builder.push_bind(from_time);
        }
        if let Some(to_time) = filter.to_time {
            builder.push(" AND updated_time <= ");
            builder.push_bind(to_time);
        }

        builder.push(" ORDER BY updated_time DESC, consent_id ASC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ");
            builder.push_bind(to_i64(limit, "consent search limit")?);
        }
        if let Some(offset) = filter.offset {
            builder.push(" OFFSET ");
            builder.push_bind(to_i64(offset, "consent search offset")?);
        }

        let rows = builder
            .build_query_as::<ConsentRow>()
            .fetch_all(self.connection()?)
            .await
            .map_err(|error| {
                StoreError::Retrieval(format!("failed to search consents in org '{org}': {error}"))
            })?;

        rows.into_iter().map(ConsentResource::try_from).collect()
    }

    /// Loads the children of `consents` in one round trip per table and
    /// keeps the order of `consents`.
    pub(super) async fn assemble_detailed(
        &mut self,
        org: &OrgId,
        consents: Vec<ConsentResource>,
    ) -> Result<Vec<DetailedConsentResource>, StoreError> {
        if consents.is_empty() {
            return Ok(Vec::new());
        }

        let consent_ids: Vec<String> = consents
            .iter()
            .map(|consent| consent.consent_id.clone())
            .collect();
        let mut authorizations = self.authorizations_for(org, &consent_ids).await?;
        let mut mappings = self.mappings_for(org, &consent_ids).await?;
        let mut attributes = self.attributes_for(org, &consent_ids).await?;

        Ok(consents
            .into_iter()
            .map(|consent| {
                let consent_id = consent.consent_id.as_str();
                DetailedConsentResource {
                    authorization_resources: authorizations.remove(consent_id).unwrap_or_default(),
                    mapping_resources: mappings.remove(consent_id).unwrap_or_default(),
                    attributes: attributes.remove(consent_id).unwrap_or_default(),
                    consent,
                }
            })
            .collect())
    }

    pub(super) async fn update_consent_status_impl(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        status: &ConsentStatus,
        updated_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE consents
            SET current_status = $3, updated_time = $4
            WHERE org_id = $1 AND consent_id = $2
            "#,
        )
        .bind(org.as_str())
        .bind(consent_id)
        .bind(status.as_str())
        .bind(updated_time)
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Update(format!(
                "failed to update status of consent '{consent_id}' in org '{org}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Update(format!(
                "consent '{consent_id}' does not exist"
            )));
        }

        Ok(())
    }

    pub(super) async fn update_consent_data_impl(
        &mut self,
        org: &OrgId,
        consent: &ConsentResource,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE consents
            SET receipt = $3, validity_period = $4, updated_time = $5
            WHERE org_id = $1 AND consent_id = $2
            "#,
        )
        .bind(org.as_str())
        .bind(consent.consent_id.as_str())
        .bind(consent.receipt.as_deref())
        .bind(consent.validity_period)
        .bind(consent.updated_time)
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Update(format!(
                "failed to update consent '{}' in org '{org}': {error}",
                consent.consent_id
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Update(format!(
                "consent '{}' does not exist",
                consent.consent_id
            )));
        }

        Ok(())
    }

    pub(super) async fn delete_consent_impl(
        &mut self,
        org: &OrgId,
        consent_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM consents WHERE org_id = $1 AND consent_id = $2")
            .bind(org.as_str())
            .bind(consent_id)
            .execute(self.connection()?)
            .await
            .map_err(|error| {
                StoreError::Deletion(format!(
                    "failed to delete consent '{consent_id}' in org '{org}': {error}"
                ))
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Deletion(format!(
                "consent '{consent_id}' does not exist"
            )));
        }

        Ok(())
    }
}
