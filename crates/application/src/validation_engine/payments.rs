use super::common::{
    EXPIRATION_POINTER, ensure_authorised, ensure_initiation_matches, ensure_not_expired,
    ensure_path_prefix, submission_data, submitted_initiation,
};
use super::{ConsentTypeValidator, RuleResult, ValidationContext};

const PAYMENT_PATH_PREFIXES: &[&str] = &[
    "/domestic-payment-consents",
    "/domestic-payments",
    "/domestic-scheduled-payment-consents",
    "/domestic-scheduled-payments",
    "/domestic-standing-order-consents",
    "/domestic-standing-orders",
    "/international-payment-consents",
    "/international-payments",
    "/international-scheduled-payment-consents",
    "/international-scheduled-payments",
    "/international-standing-order-consents",
    "/international-standing-orders",
    "/file-payment-consents",
    "/file-payments",
    "/payments",
];

const FUNDS_CONFIRMATION_PATH_PREFIXES: &[&str] =
    &["/funds-confirmation-consents", "/funds-confirmations"];

/// Payment initiation consents.
pub(super) struct PaymentsValidator;

impl ConsentTypeValidator for PaymentsValidator {
    fn validate(&self, context: &ValidationContext<'_>) -> RuleResult {
        ensure_path_prefix(context, PAYMENT_PATH_PREFIXES)?;
        ensure_authorised(context)?;
        ensure_not_expired(context, EXPIRATION_POINTER)?;

        if let Some(payload) = context.data.payload.as_ref() {
            let data = submission_data(context, payload)?;
            let initiation = submitted_initiation(data)?;
            ensure_initiation_matches(context, initiation)?;
        }

        Ok(())
    }
}

/// Confirmation of funds consents.
///
/// A funds confirmation request carries no initiation, so only the consent
/// id binding of a submission is checked.
pub(super) struct FundsConfirmationValidator;

impl ConsentTypeValidator for FundsConfirmationValidator {
    fn validate(&self, context: &ValidationContext<'_>) -> RuleResult {
        ensure_path_prefix(context, FUNDS_CONFIRMATION_PATH_PREFIXES)?;
        ensure_authorised(context)?;
        ensure_not_expired(context, EXPIRATION_POINTER)?;

        if let Some(payload) = context.data.payload.as_ref() {
            submission_data(context, payload)?;
        }

        Ok(())
    }
}
