use super::*;

impl PostgresConsentTransaction {
    pub(super) async fn insert_authorization_impl(
        &mut self,
        org: &OrgId,
        authorization: &AuthorizationResource,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO consent_authorizations (
                org_id,
                authorization_id,
                consent_id,
                user_id,
                authorization_type,
                authorization_status,
                updated_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(org.as_str())
        .bind(authorization.authorization_id.as_str())
        .bind(authorization.consent_id.as_str())
        .bind(authorization.user_id.as_deref())
        .bind(authorization.authorization_type.as_str())
        .bind(authorization.authorization_status.as_str())
        .bind(authorization.updated_time)
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Insertion(format!(
                "failed to insert authorization '{}' for consent '{}' in org '{org}': {error}",
                authorization.authorization_id, authorization.consent_id
            ))
        })?;

        Ok(())
    }

    pub(super) async fn fetch_authorization_impl(
        &mut self,
        org: &OrgId,
        authorization_id: &str,
    ) -> Result<Option<AuthorizationResource>, StoreError> {
        let row = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            SELECT
                authorization_id,
                consent_id,
                user_id,
                authorization_type,
                authorization_status,
                updated_time
            FROM consent_authorizations
            WHERE org_id = $1 AND authorization_id = $2
            "#,
        )
        .bind(org.as_str())
        .bind(authorization_id)
        .fetch_optional(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to fetch authorization '{authorization_id}' in org '{org}': {error}"
            ))
        })?;

        row.map(AuthorizationResource::try_from).transpose()
    }

    pub(super) async fn search_authorizations_impl(
        &mut self,
        org: &OrgId,
        consent_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<AuthorizationResource>, StoreError> {
        let rows = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            SELECT
                authorization_id,
                consent_id,
                user_id,
                authorization_type,
                authorization_status,
                updated_time
            FROM consent_authorizations
            WHERE org_id = $1
                AND ($2::TEXT IS NULL OR consent_id = $2)
                AND ($3::TEXT IS NULL OR user_id = $3)
            ORDER BY authorization_id
            "#,
        )
        .bind(org.as_str())
        .bind(consent_id)
        .bind(user_id)
        .fetch_all(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to search authorizations in org '{org}': {error}"
            ))
        })?;

        rows.into_iter().map(AuthorizationResource::try_from).collect()
    }

    pub(super) async fn authorizations_for(
        &mut self,
        org: &OrgId,
        consent_ids: &[String],
    ) -> Result<BTreeMap<String, Vec<AuthorizationResource>>, StoreError> {
        let rows = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            SELECT
                authorization_id,
                consent_id,
                user_id,
                authorization_type,
                authorization_status,
                updated_time
            FROM consent_authorizations
            WHERE org_id = $1 AND consent_id = ANY($2)
            ORDER BY updated_time ASC, authorization_id ASC
            "#,
        )
        .bind(org.as_str())
        .bind(consent_ids)
        .fetch_all(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to load authorizations in org '{org}': {error}"
            ))
        })?;

        let mut grouped: BTreeMap<String, Vec<AuthorizationResource>> = BTreeMap::new();
        for row in rows {
            let authorization = AuthorizationResource::try_from(row)?;
            grouped
                .entry(authorization.consent_id.clone())
                .or_default()
                .push(authorization);
        }

        Ok(grouped)
    }

    pub(super) async fn update_authorization_impl(
        &mut self,
        org: &OrgId,
        authorization: &AuthorizationResource,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE consent_authorizations
            SET user_id = $3, authorization_status = $4, updated_time = $5
            WHERE org_id = $1 AND authorization_id = $2
            "#,
        )
        .bind(org.as_str())
        .bind(authorization.authorization_id.as_str())
        .bind(authorization.user_id.as_deref())
        .bind(authorization.authorization_status.as_str())
        .bind(authorization.updated_time)
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Update(format!(
                "failed to update authorization '{}' in org '{org}': {error}",
                authorization.authorization_id
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Update(format!(
                "authorization '{}' does not exist",
                authorization.authorization_id
            )));
        }

        Ok(())
    }

    pub(super) async fn delete_authorization_impl(
        &mut self,
        org: &OrgId,
        authorization_id: &str,
    ) -> Result<(), StoreError> {
        let connection = self.connection()?;
        let result = sqlx::query(
            "DELETE FROM consent_authorizations WHERE org_id = $1 AND authorization_id = $2",
        )
        .bind(org.as_str())
        .bind(authorization_id)
        .execute(&mut *connection)
        .await
        .map_err(|error| {
            StoreError::Deletion(format!(
                "failed to delete authorization '{authorization_id}' in org '{org}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Deletion(format!(
                "authorization '{authorization_id}' does not exist"
            )));
        }

        sqlx::query("DELETE FROM consent_mappings WHERE org_id = $1 AND authorization_id = $2")
            .bind(org.as_str())
            .bind(authorization_id)
            .execute(&mut *connection)
            .await
            .map_err(|error| {
                StoreError::Deletion(format!(
                    "failed to delete mappings of authorization '{authorization_id}' in org '{org}': {error}"
                ))
            })?;

        Ok(())
    }
}
