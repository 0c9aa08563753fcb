use chrono::DateTime;
use obconsent_domain::{ConsentStatus, DetailedConsentResource};
use serde_json::{Map, Value};

use super::error_codes::{
    FIELD_INVALID, FIELD_MISSING, RESOURCE_CONSENT_MISMATCH, RESOURCE_INVALID_CONSENT_STATUS,
    RESOURCE_INVALID_FORMAT, RESOURCE_NOT_FOUND, UNEXPECTED_ERROR,
};
use super::{ConsentValidateData, RuleResult, ValidationContext, ValidationFailure};

pub(super) type JsonObject = Map<String, Value>;

/// Receipt pointer of the consent expiry instant.
pub(super) const EXPIRATION_POINTER: &str = "/Data/ExpirationDateTime";

pub(super) fn load_receipt(
    consent: Option<&DetailedConsentResource>,
) -> Result<(&DetailedConsentResource, JsonObject), ValidationFailure> {
    let not_found =
        || ValidationFailure::bad_request(RESOURCE_NOT_FOUND, "Consent Details cannot be found");
    let consent = consent.ok_or_else(not_found)?;
    let receipt = consent
        .consent
        .receipt
        .as_deref()
        .filter(|receipt| !receipt.trim().is_empty())
        .ok_or_else(not_found)?;

    match serde_json::from_str::<Value>(receipt) {
        Ok(Value::Object(receipt)) => Ok((consent, receipt)),
        _ => Err(ValidationFailure::bad_request(
            RESOURCE_INVALID_FORMAT,
            "Consent receipt is not in the correct JSON format",
        )),
    }
}

pub(super) fn ensure_user_matches(
    data: &ConsentValidateData,
    consent: &DetailedConsentResource,
    domain_suffix: &str,
) -> RuleResult {
    let strip = |user_id: &str| -> String {
        let trimmed = user_id.trim();
        trimmed
            .strip_suffix(domain_suffix)
            .unwrap_or(trimmed)
            .to_owned()
    };
    let caller = strip(data.user_id.as_str());
    let authorized = !caller.is_empty()
        && consent
            .authorization_resources
            .iter()
            .filter_map(|authorization| authorization.user_id.as_deref())
            .any(|user_id| strip(user_id) == caller);

    if authorized {
        Ok(())
    } else {
        Err(ValidationFailure::bad_request(
            RESOURCE_CONSENT_MISMATCH,
            "Invalid User Id",
        ))
    }
}

pub(super) fn ensure_client_matches(
    data: &ConsentValidateData,
    consent: &DetailedConsentResource,
) -> RuleResult {
    let token_client = data
        .client_id
        .as_deref()
        .filter(|client_id| !client_id.trim().is_empty());
    let consent_client = Some(consent.consent.client_id.as_str())
        .filter(|client_id| !client_id.trim().is_empty());

    match (token_client, consent_client) {
        (Some(token_client), Some(consent_client)) if token_client == consent_client => Ok(()),
        _ => Err(ValidationFailure::forbidden(
            RESOURCE_CONSENT_MISMATCH,
            "Invalid Client Id",
        )),
    }
}

pub(super) fn ensure_path_prefix(context: &ValidationContext<'_>, prefixes: &[&str]) -> RuleResult {
    let path = context.data.request_path.as_str();
    let matches = prefixes.iter().any(|prefix| {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?']))
    });

    if matches {
        Ok(())
    } else {
        Err(ValidationFailure::unauthorized(
            FIELD_INVALID,
            "Path requested is invalid",
        ))
    }
}

pub(super) fn ensure_authorised(context: &ValidationContext<'_>) -> RuleResult {
    if context.consent.consent.current_status == ConsentStatus::Authorised {
        Ok(())
    } else {
        Err(ValidationFailure::bad_request(
            RESOURCE_INVALID_CONSENT_STATUS,
            "Consent is not in the correct state",
        ))
    }
}

/// Fails when the receipt instant at `pointer` is in the past. An absent instant never expires.
pub(super) fn ensure_not_expired(context: &ValidationContext<'_>, pointer: &str) -> RuleResult {
    let Some(value) = context.receipt_value(pointer) else {
        return Ok(());
    };
    let expiry = value
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .ok_or_else(|| {
            ValidationFailure::internal(
                UNEXPECTED_ERROR,
                "Consent expiry date time is not in the correct format",
            )
        })?;

    if expiry < context.now {
        return Err(ValidationFailure::bad_request(
            RESOURCE_INVALID_CONSENT_STATUS,
            "Provided consent is expired",
        ));
    }

    Ok(())
}

/// Checks the consent id binding of a submission and returns its `Data` object.
pub(super) fn submission_data<'p>(
    context: &ValidationContext<'_>,
    payload: &'p Value,
) -> Result<&'p JsonObject, ValidationFailure> {
    let token_consent_id = context
        .data
        .consent_id
        .as_deref()
        .filter(|consent_id| !consent_id.trim().is_empty())
        .ok_or_else(|| ValidationFailure::bad_request(FIELD_MISSING, "Invalid consent ID"))?;
    if token_consent_id != context.consent.consent_id() {
        return Err(consent_id_mismatch());
    }

    let data = payload
        .get("Data")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            ValidationFailure::bad_request(
                RESOURCE_INVALID_FORMAT,
                "Invalid Submission payload Data Object found",
            )
        })?;

    let submitted_consent_id = data
        .get("ConsentId")
        .and_then(Value::as_str)
        .filter(|consent_id| !consent_id.trim().is_empty())
        .ok_or_else(|| ValidationFailure::bad_request(FIELD_MISSING, "Invalid consent ID"))?;
    if submitted_consent_id != token_consent_id {
        return Err(consent_id_mismatch());
    }

    Ok(data)
}

fn consent_id_mismatch() -> ValidationFailure {
    ValidationFailure::bad_request(RESOURCE_CONSENT_MISMATCH, "Consent ID mismatch")
}

/// Returns the `Initiation` object of a submission's `Data`.
pub(super) fn submitted_initiation(data: &JsonObject) -> Result<&JsonObject, ValidationFailure> {
    data.get("Initiation")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            ValidationFailure::bad_request(
                RESOURCE_INVALID_FORMAT,
                "Invalid Submission payload Initiation Object found",
            )
        })
}

/// Fails unless the submitted initiation equals the one stored in the receipt.
pub(super) fn ensure_initiation_matches(
    context: &ValidationContext<'_>,
    initiation: &JsonObject,
) -> RuleResult {
    match context.receipt_value("/Data/Initiation").and_then(Value::as_object) {
        Some(consented) if consented == initiation => Ok(()),
        _ => Err(ValidationFailure::bad_request(
            RESOURCE_CONSENT_MISMATCH,
            "Initiation payloads does not match",
        )),
    }
}

impl ValidationContext<'_> {
    /// Looks up a JSON pointer in the receipt; `null` counts as absent.
    pub(super) fn receipt_value(&self, pointer: &str) -> Option<&Value> {
        let path = pointer.strip_prefix('/')?;
        let (head, tail) = path.find('/').map_or((path, ""), |split| path.split_at(split));
        let key = head.replace("~1", "/").replace("~0", "~");

        self.receipt
            .get(&key)?
            .pointer(tail)
            .filter(|value| !value.is_null())
    }
}
