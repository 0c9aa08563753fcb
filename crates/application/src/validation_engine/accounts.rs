use serde_json::Value;

use super::common::{
    EXPIRATION_POINTER, ensure_authorised, ensure_not_expired, ensure_path_prefix,
};
use super::error_codes::RESOURCE_CONSENT_MISMATCH;
use super::{ConsentTypeValidator, RuleResult, ValidationContext, ValidationFailure};

const ACCOUNTS_PREFIX: &str = "/accounts";

/// Account information consents.
pub(super) struct AccountsValidator;

impl ConsentTypeValidator for AccountsValidator {
    fn validate(&self, context: &ValidationContext<'_>) -> RuleResult {
        ensure_path_prefix(context, &[ACCOUNTS_PREFIX])?;
        ensure_permission_granted(context)?;
        ensure_authorised(context)?;
        ensure_not_expired(context, EXPIRATION_POINTER)
    }
}

fn ensure_permission_granted(context: &ValidationContext<'_>) -> RuleResult {
    let granted: Vec<&str> = context
        .receipt_value("/Data/Permissions")
        .and_then(Value::as_array)
        .map(|permissions| permissions.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let covered = required_permissions(context.data.request_path.as_str())
        .is_some_and(|accepted| accepted.iter().any(|permission| granted.contains(permission)));

    if covered {
        Ok(())
    } else {
        Err(ValidationFailure::forbidden(
            RESOURCE_CONSENT_MISMATCH,
            "Permission mismatch. Consent does not contain necessary permissions",
        ))
    }
}

/// Permissions any one of which allows the read implied by `path`.
///
/// `/accounts` and `/accounts/{id}` need account permissions; deeper paths
/// are keyed by their last segment, so `/accounts/{id}/statements/{sid}/transactions`
/// needs transaction permissions.
fn required_permissions(path: &str) -> Option<&'static [&'static str]> {
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();

    let resource = match segments.as_slice() {
        ["accounts"] | ["accounts", _] => "accounts",
        ["accounts", _, .., last] => *last,
        _ => return None,
    };
    let resource = if segments.len() >= 4 && segments.get(2) == Some(&"statements") {
        match resource {
            "transactions" | "file" => resource,
            _ => "statements",
        }
    } else {
        resource
    };

    let permissions: &'static [&'static str] = match resource {
        "accounts" => &["ReadAccountsBasic", "ReadAccountsDetail"],
        "balances" => &["ReadBalances"],
        "transactions" => &[
            "ReadTransactionsBasic",
            "ReadTransactionsDetail",
            "ReadTransactionsCredits",
            "ReadTransactionsDebits",
        ],
        "beneficiaries" => &["ReadBeneficiariesBasic", "ReadBeneficiariesDetail"],
        "direct-debits" => &["ReadDirectDebits"],
        "standing-orders" => &["ReadStandingOrdersBasic", "ReadStandingOrdersDetail"],
        "scheduled-payments" => &["ReadScheduledPaymentsBasic", "ReadScheduledPaymentsDetail"],
        "statements" | "file" => &["ReadStatementsBasic", "ReadStatementsDetail"],
        "party" => &["ReadParty", "ReadPartyPSU"],
        "offers" => &["ReadOffers"],
        "product" => &["ReadProducts"],
        _ => return None,
    };

    Some(permissions)
}
