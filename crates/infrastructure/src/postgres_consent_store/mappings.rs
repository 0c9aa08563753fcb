use std::collections::BTreeSet;

use super::*;

impl PostgresConsentTransaction {
    pub(super) async fn insert_mapping_impl(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        mapping: &ConsentMappingResource,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO consent_mappings (
                org_id,
                mapping_id,
                consent_id,
                authorization_id,
                account_id,
                permission,
                mapping_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(org.as_str())
        .bind(mapping.mapping_id.as_str())
        .bind(consent_id)
        .bind(mapping.authorization_id.as_str())
        .bind(mapping.account_id.as_str())
        .bind(mapping.permission.as_str())
        .bind(mapping.mapping_status.as_str())
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Insertion(format!(
                "failed to insert mapping '{}' for consent '{consent_id}' in org '{org}': {error}",
                mapping.mapping_id
            ))
        })?;

        Ok(())
    }

    pub(super) async fn mappings_for(
        &mut self,
        org: &OrgId,
        consent_ids: &[String],
    ) -> Result<BTreeMap<String, Vec<ConsentMappingResource>>, StoreError> {
        let rows = sqlx::query_as::<_, MappingRow>(
            r#"
            SELECT
                mapping_id,
                consent_id,
                authorization_id,
                account_id,
                permission,
                mapping_status
            FROM consent_mappings
            WHERE org_id = $1 AND consent_id = ANY($2)
            ORDER BY mapping_id ASC
            "#,
        )
        .bind(org.as_str())
        .bind(consent_ids)
        .fetch_all(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!("failed to load mappings in org '{org}': {error}"))
        })?;

        let mut grouped: BTreeMap<String, Vec<ConsentMappingResource>> = BTreeMap::new();
        for row in rows {
            let (consent_id, mapping) = row.into_resource()?;
            grouped.entry(consent_id).or_default().push(mapping);
        }

        Ok(grouped)
    }

    pub(super) async fn update_mapping_status_impl(
        &mut self,
        org: &OrgId,
        mapping_ids: &[String],
        status: MappingStatus,
    ) -> Result<(), StoreError> {
        let distinct: BTreeSet<&str> = mapping_ids.iter().map(String::as_str).collect();
        if distinct.is_empty() {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE consent_mappings
            SET mapping_status = $2
            WHERE org_id = $1 AND mapping_id = ANY($3)
            "#,
        )
        .bind(org.as_str())
        .bind(status.as_str())
        .bind(mapping_ids)
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Update(format!(
                "failed to update mapping status in org '{org}': {error}"
            ))
        })?;

        let expected = u64::try_from(distinct.len()).unwrap_or(u64::MAX);
        if result.rows_affected() != expected {
            return Err(StoreError::Update(format!(
                "{} of {expected} mappings exist in org '{org}'",
                result.rows_affected()
            )));
        }

        Ok(())
    }
}
