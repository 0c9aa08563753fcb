use super::*;

impl PostgresConsentTransaction {
    pub(super) async fn upsert_attributes_impl(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        attributes: &ConsentAttributes,
    ) -> Result<(), StoreError> {
        if attributes.is_empty() {
            return Ok(());
        }

        let (keys, values): (Vec<String>, Vec<String>) = attributes
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .unzip();

        sqlx::query(
            r#"
            INSERT INTO consent_attributes (org_id, consent_id, attribute_key, attribute_value)
            SELECT $1, $2, input.attribute_key, input.attribute_value
            FROM UNNEST($3::TEXT[], $4::TEXT[]) AS input(attribute_key, attribute_value)
            ON CONFLICT (org_id, consent_id, attribute_key)
            DO UPDATE SET attribute_value = EXCLUDED.attribute_value
            "#,
        )
        .bind(org.as_str())
        .bind(consent_id)
        .bind(keys)
        .bind(values)
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Insertion(format!(
                "failed to store attributes of consent '{consent_id}' in org '{org}': {error}"
            ))
        })?;

        Ok(())
    }

    pub(super) async fn fetch_attributes_impl(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        keys: Option<&[String]>,
    ) -> Result<ConsentAttributes, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT attribute_key, attribute_value
            FROM consent_attributes
            WHERE org_id = $1
                AND consent_id = $2
                AND ($3::TEXT[] IS NULL OR attribute_key = ANY($3))
            "#,
        )
        .bind(org.as_str())
        .bind(consent_id)
        .bind(keys)
        .fetch_all(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to fetch attributes of consent '{consent_id}' in org '{org}': {error}"
            ))
        })?;

        Ok(rows.into_iter().collect())
    }

    pub(super) async fn attributes_for(
        &mut self,
        org: &OrgId,
        consent_ids: &[String],
    ) -> Result<BTreeMap<String, ConsentAttributes>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            r#"
            SELECT consent_id, attribute_key, attribute_value
            FROM consent_attributes
            WHERE org_id = $1 AND consent_id = ANY($2)
            "#,
        )
        .bind(org.as_str())
        .bind(consent_ids)
        .fetch_all(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!("failed to load attributes in org '{org}': {error}"))
        })?;

        let mut grouped: BTreeMap<String, ConsentAttributes> = BTreeMap::new();
        for (consent_id, key, value) in rows {
            grouped.entry(consent_id).or_default().insert(key, value);
        }

        Ok(grouped)
    }

    pub(super) async fn fetch_attributes_by_name_impl(
        &mut self,
        org: &OrgId,
        name: &str,
    ) -> Result<BTreeMap<String, String>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT consent_id, attribute_value
            FROM consent_attributes
            WHERE org_id = $1 AND attribute_key = $2
            "#,
        )
        .bind(org.as_str())
        .bind(name)
        .fetch_all(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to fetch attribute '{name}' in org '{org}': {error}"
            ))
        })?;

        Ok(rows.into_iter().collect())
    }

    pub(super) async fn fetch_consent_ids_by_attribute_impl(
        &mut self,
        org: &OrgId,
        name: &str,
        value: &str,
    ) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT consent_id
            FROM consent_attributes
            WHERE org_id = $1 AND attribute_key = $2 AND attribute_value = $3
            ORDER BY consent_id
            "#,
        )
        .bind(org.as_str())
        .bind(name)
        .bind(value)
        .fetch_all(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Retrieval(format!(
                "failed to find consents by attribute '{name}' in org '{org}': {error}"
            ))
        })
    }

    pub(super) async fn delete_attributes_impl(
        &mut self,
        org: &OrgId,
        consent_id: &str,
        keys: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM consent_attributes
            WHERE org_id = $1 AND consent_id = $2 AND attribute_key = ANY($3)
            "#,
        )
        .bind(org.as_str())
        .bind(consent_id)
        .bind(keys)
        .execute(self.connection()?)
        .await
        .map_err(|error| {
            StoreError::Deletion(format!(
                "failed to delete attributes of consent '{consent_id}' in org '{org}': {error}"
            ))
        })?;

        Ok(())
    }
}
