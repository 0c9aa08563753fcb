use serde_json::Value;

use super::common::{
    EXPIRATION_POINTER, JsonObject, ensure_authorised, ensure_initiation_matches,
    ensure_not_expired, ensure_path_prefix, submission_data,
};
use super::error_codes::{
    FIELD_INVALID, FIELD_MISSING, RESOURCE_CONSENT_MISMATCH, RESOURCE_INVALID_FORMAT,
};
use super::{ConsentTypeValidator, RuleResult, ValidationContext, ValidationFailure};

const VRP_PATH_PREFIXES: &[&str] = &["/domestic-vrp-consents", "/domestic-vrps"];
const CONTROL_PARAMETERS_VALID_TO_POINTER: &str = "/Data/ControlParameters/ValidToDateTime";

/// Variable recurring payment consents.
///
/// A submission is checked piecewise before the whole initiation is compared,
/// so a caller learns which part of the payload disagrees with the consent.
pub(super) struct VrpValidator;

impl ConsentTypeValidator for VrpValidator {
    fn validate(&self, context: &ValidationContext<'_>) -> RuleResult {
        ensure_path_prefix(context, VRP_PATH_PREFIXES)?;
        ensure_authorised(context)?;
        ensure_not_expired(context, EXPIRATION_POINTER)?;
        ensure_not_expired(context, CONTROL_PARAMETERS_VALID_TO_POINTER)?;

        let Some(payload) = context.data.payload.as_ref() else {
            return Ok(());
        };
        let data = submission_data(context, payload)?;
        let initiation = required_object(
            data,
            "Initiation",
            "Initiation is not found or is empty in the request.",
            "Initiation is not in the correct JSON format in the request",
        )?;
        let instruction = required_object(
            data,
            "Instruction",
            "Instruction is not found or empty in the request.",
            "Instruction is not in the correct JSON format in the request",
        )?;
        let consented = context
            .receipt_value("/Data/Initiation")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                ValidationFailure::bad_request(
                    RESOURCE_CONSENT_MISMATCH,
                    "Initiation payloads does not match",
                )
            })?;

        validate_initiation(initiation, consented)?;
        validate_instruction(instruction, consented)?;
        validate_risk(context, payload)?;
        ensure_initiation_matches(context, initiation)
    }
}

fn required_object<'a>(
    parent: &'a JsonObject,
    key: &str,
    missing: &str,
    malformed: &str,
) -> Result<&'a JsonObject, ValidationFailure> {
    match parent.get(key) {
        None | Some(Value::Null) => Err(ValidationFailure::bad_request(FIELD_MISSING, missing)),
        Some(Value::Object(object)) if object.is_empty() => {
            Err(ValidationFailure::bad_request(FIELD_MISSING, missing))
        }
        Some(Value::Object(object)) => Ok(object),
        Some(_) => Err(ValidationFailure::bad_request(
            RESOURCE_INVALID_FORMAT,
            malformed,
        )),
    }
}

fn validate_initiation(submitted: &JsonObject, consented: &JsonObject) -> RuleResult {
    match (submitted.get("CreditorAccount"), consented.get("CreditorAccount")) {
        (Some(Value::Object(submitted)), Some(Value::Object(consented))) => {
            validate_creditor_account(submitted, consented)?;
        }
        (Some(_), Some(_)) => {
            return Err(ValidationFailure::bad_request(
                FIELD_MISSING,
                "Creditor Account present under initiation isn't present in the correct JSON format in the request.",
            ));
        }
        _ => {
            return Err(ValidationFailure::bad_request(
                FIELD_MISSING,
                "Creditor Account isn't present in the request.",
            ));
        }
    }

    match (submitted.get("DebtorAccount"), consented.get("DebtorAccount")) {
        (None, None) => {}
        (Some(Value::Object(submitted)), Some(Value::Object(consented))) => {
            validate_debtor_account(submitted, consented)?;
        }
        (Some(_), Some(_)) => {
            return Err(ValidationFailure::bad_request(
                FIELD_MISSING,
                "Debtor Account isn't present in the correct JSON format in the request.",
            ));
        }
        _ => {
            return Err(ValidationFailure::bad_request(
                RESOURCE_CONSENT_MISMATCH,
                "Debtor Account mismatch",
            ));
        }
    }

    validate_remittance_information(
        submitted,
        consented,
        "Remittance info present under initiation isn't present in the request",
        "Remittance info of initiation is not present in the correct JSON format in the request.",
    )
}

fn validate_instruction(instruction: &JsonObject, consented: &JsonObject) -> RuleResult {
    required_string(
        instruction,
        "InstructionIdentification",
        "Instruction Identification isn't present in the request",
        "Value associated with INSTRUCTION_IDENTIFICATION key is not a String instance",
    )?;
    required_string(
        instruction,
        "EndToEndIdentification",
        "End to End Identification isn't present in the request",
        "Value associated with END_TO_END_IDENTIFICATION key is not a String instance",
    )?;

    match (instruction.get("CreditorAccount"), consented.get("CreditorAccount")) {
        (Some(Value::Object(submitted)), Some(Value::Object(consented))) => {
            validate_creditor_account(submitted, consented)?;
        }
        (Some(_), Some(_)) => {
            return Err(ValidationFailure::bad_request(
                FIELD_MISSING,
                "Creditor Account present under instruction isn't present in the correct JSON format in the request.",
            ));
        }
        _ => {
            return Err(ValidationFailure::bad_request(
                FIELD_MISSING,
                "Creditor Account isn't present in the request.",
            ));
        }
    }

    validate_instructed_amount(instruction)?;

    validate_remittance_information(
        instruction,
        consented,
        "Remittance info present under instruction isn't present in the request",
        "Remittance info of instruction is not present in the correct JSON format in the request.",
    )
}

fn required_string(
    parent: &JsonObject,
    key: &str,
    missing: &str,
    not_string: &str,
) -> RuleResult {
    match parent.get(key) {
        None | Some(Value::Null) => Err(ValidationFailure::bad_request(FIELD_MISSING, missing)),
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err(ValidationFailure::bad_request(FIELD_INVALID, not_string)),
    }
}

fn validate_instructed_amount(instruction: &JsonObject) -> RuleResult {
    let amount = match instruction.get("InstructedAmount") {
        None | Some(Value::Null) => {
            return Err(ValidationFailure::bad_request(
                FIELD_MISSING,
                "Instructed Amount isn't present in the payload",
            ));
        }
        Some(Value::Object(amount)) => amount,
        Some(_) => {
            return Err(ValidationFailure::bad_request(
                RESOURCE_INVALID_FORMAT,
                "Instructed Amount is not in the correct JSON format in the request",
            ));
        }
    };

    for (key, message) in [
        ("Amount", "Value associated with Amount key is not a String instance"),
        ("Currency", "Value associated with Currency key is not a String instance"),
    ] {
        if !amount.get(key).is_some_and(Value::is_string) {
            return Err(ValidationFailure::bad_request(FIELD_INVALID, message));
        }
    }

    Ok(())
}

fn validate_creditor_account(submitted: &JsonObject, consented: &JsonObject) -> RuleResult {
    compare_mandatory(
        submitted,
        consented,
        "SchemeName",
        "Creditor Accounts Scheme isn't present in the request or in the consent.",
        "Creditor Accounts Scheme does not match",
    )?;
    compare_mandatory(
        submitted,
        consented,
        "Identification",
        "Creditor Account Identification isn't present in the request or in the consent.",
        "Creditor Account Identification does not match",
    )?;
    compare_optional(
        submitted,
        consented,
        "Name",
        "Creditor Account Name does not match",
    )?;
    compare_optional(
        submitted,
        consented,
        "SecondaryIdentification",
        "Creditor Account Secondary Identification does not match",
    )
}

fn validate_debtor_account(submitted: &JsonObject, consented: &JsonObject) -> RuleResult {
    compare_mandatory(
        submitted,
        consented,
        "SchemeName",
        "Debtor Account Scheme name isn't present in the request or in the consent",
        "Debtor Account Scheme name does not match",
    )?;
    compare_mandatory(
        submitted,
        consented,
        "Identification",
        "Debtor Account Identification isn't present in the request or in the consent",
        "Debtor Account Identification does not match",
    )?;
    compare_optional(
        submitted,
        consented,
        "Name",
        "Debtor Account Name does not match",
    )?;
    compare_optional(
        submitted,
        consented,
        "SecondaryIdentification",
        "Debtor Account Secondary Identification does not match",
    )
}

fn validate_remittance_information(
    submitted: &JsonObject,
    consented: &JsonObject,
    missing: &str,
    malformed: &str,
) -> RuleResult {
    match (
        submitted.get("RemittanceInformation"),
        consented.get("RemittanceInformation"),
    ) {
        (Some(Value::Object(submitted)), Some(Value::Object(consented))) => {
            compare_optional(
                submitted,
                consented,
                "Reference",
                "Remittance info does not match",
            )?;
            compare_optional(
                submitted,
                consented,
                "Unstructured",
                "Remittance Information Unstructured does not match",
            )
        }
        (Some(_), Some(_)) => Err(ValidationFailure::bad_request(FIELD_MISSING, malformed)),
        _ => Err(ValidationFailure::bad_request(FIELD_MISSING, missing)),
    }
}

fn validate_risk(context: &ValidationContext<'_>, payload: &Value) -> RuleResult {
    let submitted = match payload.get("Risk") {
        None | Some(Value::Null) => {
            return Err(ValidationFailure::bad_request(
                FIELD_MISSING,
                "Risk is not found or empty in the request.",
            ));
        }
        Some(Value::Object(risk)) => risk,
        Some(_) => {
            return Err(ValidationFailure::bad_request(
                RESOURCE_INVALID_FORMAT,
                "Risk parameter is not in the correct JSON format",
            ));
        }
    };
    let consented = context.receipt_value("/Risk").and_then(Value::as_object);

    match consented {
        Some(consented) if consented == submitted => Ok(()),
        _ => Err(ValidationFailure::bad_request(
            RESOURCE_CONSENT_MISMATCH,
            "RISK does not match",
        )),
    }
}

/// Both sides must carry a non-empty string and the strings must be equal.
fn compare_mandatory(
    submitted: &JsonObject,
    consented: &JsonObject,
    key: &str,
    missing: &str,
    mismatch: &str,
) -> RuleResult {
    let Some(submitted) = submitted.get(key) else {
        return Err(ValidationFailure::bad_request(FIELD_MISSING, missing));
    };
    let submitted = submitted.as_str().filter(|value| !value.is_empty());
    let consented = consented.get(key).and_then(Value::as_str);

    match (submitted, consented) {
        (Some(submitted), Some(consented)) if submitted == consented => Ok(()),
        _ => Err(ValidationFailure::bad_request(
            RESOURCE_CONSENT_MISMATCH,
            mismatch,
        )),
    }
}

/// Compared only when both sides carry a non-empty value.
fn compare_optional(
    submitted: &JsonObject,
    consented: &JsonObject,
    key: &str,
    mismatch: &str,
) -> RuleResult {
    let value = |object: &JsonObject| {
        object
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    match (value(submitted), value(consented)) {
        (Some(submitted), Some(consented)) if submitted != consented => Err(
            ValidationFailure::bad_request(RESOURCE_CONSENT_MISMATCH, mismatch),
        ),
        _ => Ok(()),
    }
}
