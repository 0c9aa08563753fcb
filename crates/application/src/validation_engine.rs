//! Consent validation run before a request may act on a consent.
//!
//! Checks short-circuit: the first failing rule decides the result and no
//! later rule runs. Failures never escape as errors; they are reported in
//! [`ConsentValidationResult`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use obconsent_core::LogSafe;
use obconsent_domain::{ConsentType, DetailedConsentResource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::consent_ports::Clock;

mod accounts;
mod common;
pub mod error_codes;
mod payments;
mod vrp;

use accounts::AccountsValidator;
use payments::{FundsConfirmationValidator, PaymentsValidator};
use vrp::VrpValidator;

/// Request facts a consent is validated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsentValidateData {
    /// Consent aggregate loaded for the request.
    pub comprehensive_consent: Option<DetailedConsentResource>,
    /// Caller user id, possibly carrying a tenant domain suffix.
    pub user_id: String,
    /// Client id bound to the access token.
    pub client_id: Option<String>,
    /// Consent id bound to the access token.
    pub consent_id: Option<String>,
    /// Resource path of the request.
    pub request_path: String,
    /// Path and query parameters.
    pub resource_params: BTreeMap<String, String>,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Submission payload, for submission flows.
    pub payload: Option<Value>,
}

/// Outcome of one validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentValidationResult {
    /// Whether the request may proceed.
    pub valid: bool,
    /// Machine-readable code of the failing rule.
    pub error_code: Option<String>,
    /// Human-readable message of the failing rule.
    pub error_message: Option<String>,
    /// HTTP status a gateway should answer with.
    pub http_code: Option<u16>,
}

impl ConsentValidationResult {
    fn passed() -> Self {
        Self {
            valid: true,
            error_code: None,
            error_message: None,
            http_code: None,
        }
    }
}

/// Deployment settings of the validation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Tenant domain suffix stripped from caller user ids.
    pub user_domain_suffix: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            user_domain_suffix: "@carbon.super".to_owned(),
        }
    }
}

/// A failed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ValidationFailure {
    code: &'static str,
    message: String,
    http_code: u16,
}

impl ValidationFailure {
    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            http_code: 400,
        }
    }

    fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            http_code: 401,
        }
    }

    fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            http_code: 403,
        }
    }

    fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            http_code: 500,
        }
    }
}

impl From<ValidationFailure> for ConsentValidationResult {
    fn from(failure: ValidationFailure) -> Self {
        Self {
            valid: false,
            error_code: Some(failure.code.to_owned()),
            error_message: Some(failure.message),
            http_code: Some(failure.http_code),
        }
    }
}

type RuleResult = Result<(), ValidationFailure>;

/// Everything a type-specific validator reads.
struct ValidationContext<'a> {
    data: &'a ConsentValidateData,
    consent: &'a DetailedConsentResource,
    receipt: &'a Map<String, Value>,
    now: DateTime<Utc>,
}

/// Rules specific to one consent type.
trait ConsentTypeValidator {
    fn validate(&self, context: &ValidationContext<'_>) -> RuleResult;
}

/// Dispatches validation by consent type.
#[derive(Clone)]
pub struct ConsentValidationEngine {
    clock: Arc<dyn Clock>,
    config: ValidationConfig,
}

impl ConsentValidationEngine {
    /// Creates an engine reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, config: ValidationConfig) -> Self {
        Self { clock, config }
    }

    /// Validates a request against its consent.
    #[must_use]
    pub fn validate(&self, data: &ConsentValidateData) -> ConsentValidationResult {
        match self.run(data) {
            Ok(()) => {
                debug!(
                    consent_id = %LogSafe(data.consent_id.as_deref().unwrap_or_default()),
                    request_path = %LogSafe(data.request_path.as_str()),
                    "consent validation passed"
                );
                ConsentValidationResult::passed()
            }
            Err(failure) => {
                warn!(
                    consent_id = %LogSafe(data.consent_id.as_deref().unwrap_or_default()),
                    request_path = %LogSafe(data.request_path.as_str()),
                    error_code = failure.code,
                    error_message = %LogSafe(failure.message.as_str()),
                    http_code = failure.http_code,
                    "consent validation failed"
                );
                failure.into()
            }
        }
    }

    fn run(&self, data: &ConsentValidateData) -> RuleResult {
        let (consent, receipt) = common::load_receipt(data.comprehensive_consent.as_ref())?;
        common::ensure_user_matches(data, consent, self.config.user_domain_suffix.as_str())?;
        common::ensure_client_matches(data, consent)?;

        let context = ValidationContext {
            data,
            consent,
            receipt: &receipt,
            now: self.clock.now(),
        };
        match consent.consent.consent_type {
            ConsentType::Accounts => AccountsValidator.validate(&context),
            ConsentType::Payments => PaymentsValidator.validate(&context),
            ConsentType::FundsConfirmation => FundsConfirmationValidator.validate(&context),
            ConsentType::VariableRecurringPayment => VrpValidator.validate(&context),
        }
    }
}
