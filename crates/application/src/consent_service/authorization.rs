use obconsent_core::{AppError, AppResult, LogSafe, OrgId};
use obconsent_domain::AuthorizationResource;

use crate::consent_ports::{AuthorizationInput, AuthorizationUpdate, ConsentTransaction};

use super::{ConsentService, ensure_not_revoked, require_non_blank};

impl ConsentService {
    /// Attaches a new authorization resource to a consent that is not revoked.
    pub async fn create_consent_authorization(
        &self,
        org: &OrgId,
        consent_id: &str,
        input: AuthorizationInput,
    ) -> AppResult<AuthorizationResource> {
        require_non_blank(consent_id, "consent id")?;
        require_non_blank(input.authorization_status.as_str(), "authorization status")?;

        let authorization = AuthorizationResource {
            authorization_id: self.id_or_generate(input.authorization_id),
            consent_id: consent_id.to_owned(),
            user_id: input.user_id,
            authorization_type: input.authorization_type,
            authorization_status: input.authorization_status,
            updated_time: self.clock.now(),
        };

        let mut transaction = self.begin().await?;
        let result = async {
            let detailed = self.lock_detailed(&mut *transaction, org, consent_id).await?;
            ensure_not_revoked(&detailed.consent)?;
            transaction.insert_authorization(org, &authorization).await?;
            Ok::<_, AppError>(())
        }
        .await;
        self.settle(transaction, "create_consent_authorization", result)
            .await?;

        Ok(authorization)
    }

    /// Returns one authorization resource.
    pub async fn get_authorization_resource(
        &self,
        org: &OrgId,
        authorization_id: &str,
    ) -> AppResult<AuthorizationResource> {
        require_non_blank(authorization_id, "authorization id")?;

        let mut transaction = self.begin().await?;
        let result = load_authorization(&mut *transaction, org, authorization_id).await;
        self.settle(transaction, "get_authorization_resource", result)
            .await
    }

    /// Changes the status and/or user of an authorization resource.
    pub async fn update_authorization_resource(
        &self,
        org: &OrgId,
        authorization_id: &str,
        update: AuthorizationUpdate,
    ) -> AppResult<AuthorizationResource> {
        require_non_blank(authorization_id, "authorization id")?;
        if let Some(status) = update.authorization_status.as_deref() {
            require_non_blank(status, "authorization status")?;
        }
        if update.authorization_status.is_none() && update.user_id.is_none() {
            return Err(AppError::BadRequest(
                "authorization update must change the status or the user".to_owned(),
            ));
        }

        let mut transaction = self.begin().await?;
        let result = async {
            let mut authorization =
                load_authorization(&mut *transaction, org, authorization_id).await?;
            if let Some(status) = update.authorization_status {
                authorization.authorization_status = status;
            }
            if let Some(user_id) = update.user_id {
                authorization.user_id = Some(user_id);
            }
            authorization.updated_time = self.clock.now();
            transaction.update_authorization(org, &authorization).await?;
            Ok::<_, AppError>(authorization)
        }
        .await;
        self.settle(transaction, "update_authorization_resource", result)
            .await
    }

    /// Deletes an authorization resource.
    pub async fn delete_authorization_resource(
        &self,
        org: &OrgId,
        authorization_id: &str,
    ) -> AppResult<()> {
        require_non_blank(authorization_id, "authorization id")?;

        let mut transaction = self.begin().await?;
        let result = async {
            load_authorization(&mut *transaction, org, authorization_id).await?;
            transaction
                .delete_authorization(org, authorization_id)
                .await?;
            Ok::<_, AppError>(())
        }
        .await;
        self.settle(transaction, "delete_authorization_resource", result)
            .await
    }

    /// Returns authorization resources filtered by consent and/or user.
    pub async fn search_authorizations(
        &self,
        org: &OrgId,
        consent_id: Option<&str>,
        user_id: Option<&str>,
    ) -> AppResult<Vec<AuthorizationResource>> {
        let mut transaction = self.begin().await?;
        let result = transaction
            .search_authorizations(org, consent_id, user_id)
            .await
            .map_err(AppError::from);
        self.settle(transaction, "search_authorizations", result)
            .await
    }
}

async fn load_authorization(
    transaction: &mut dyn ConsentTransaction,
    org: &OrgId,
    authorization_id: &str,
) -> AppResult<AuthorizationResource> {
    transaction
        .fetch_authorization(org, authorization_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "authorization '{}' does not exist",
                LogSafe(authorization_id)
            ))
        })
}
