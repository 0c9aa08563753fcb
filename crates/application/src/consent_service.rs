use std::sync::Arc;

use obconsent_core::{AppError, AppResult, ConflictKind, LogSafe};
use obconsent_domain::ConsentResource;
use tracing::{debug, warn};

use crate::consent_ports::{Clock, ConsentStore, ConsentTransaction, IdGenerator};

mod attributes;
mod audit;
mod authorization;
mod exclusive;
mod history;
mod lifecycle;
mod mappings;
mod reauthorization;
mod transition;

/// Consent lifecycle service.
///
/// Every public operation runs in exactly one store transaction: it commits
/// when the operation succeeds and rolls back before the error is returned
/// otherwise. Bulk operations open one transaction per consent.
#[derive(Clone)]
pub struct ConsentService {
    store: Arc<dyn ConsentStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl ConsentService {
    /// Creates a service over a store, a clock and an id generator.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConsentStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { store, clock, ids }
    }

    async fn begin(&self) -> AppResult<Box<dyn ConsentTransaction>> {
        Ok(self.store.begin().await?)
    }

    /// Commits on success, rolls back on failure, and hands `result` back.
    async fn settle<T>(
        &self,
        mut transaction: Box<dyn ConsentTransaction>,
        operation: &'static str,
        result: AppResult<T>,
    ) -> AppResult<T> {
        match result {
            Ok(value) => {
                transaction.commit().await?;
                debug!(operation, "consent transaction committed");
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    warn!(
                        operation,
                        error = %LogSafe(rollback_error.to_string().as_str()),
                        "failed to roll back consent transaction"
                    );
                }
                warn!(
                    operation,
                    error = %error.log_safe_message(),
                    "consent transaction rolled back"
                );
                Err(error)
            }
        }
    }

    fn id_or_generate(&self, supplied: Option<String>) -> String {
        supplied
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.ids.generate())
    }
}

fn require_non_blank<'a>(value: &'a str, name: &str) -> AppResult<&'a str> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{name} must not be blank")));
    }

    Ok(value)
}

fn require_argument<'a>(value: &'a str, name: &str) -> AppResult<&'a str> {
    if value.trim().is_empty() {
        return Err(AppError::MissingArgument(format!("{name} must be provided")));
    }

    Ok(value)
}

fn ensure_not_revoked(consent: &ConsentResource) -> AppResult<()> {
    if consent.current_status.is_terminal() {
        return Err(AppError::Conflict(ConflictKind::AlreadyRevoked {
            consent_id: consent.consent_id.clone(),
        }));
    }

    Ok(())
}

#[cfg(test)]
mod tests;
