use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use obconsent_core::{AppError, OrgId};
use serde::{Deserialize, Serialize};

/// Kind of access a consent grants to a third party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentType {
    /// Account information access.
    Accounts,
    /// Payment initiation.
    Payments,
    /// Confirmation of funds.
    FundsConfirmation,
    /// Variable recurring payments.
    VariableRecurringPayment,
}

impl ConsentType {
    /// Returns a stable storage value for this consent type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Payments => "payments",
            Self::FundsConfirmation => "funds-confirmation",
            Self::VariableRecurringPayment => "variable-recurring-payment",
        }
    }
}

impl Display for ConsentType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for ConsentType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "accounts" => Ok(Self::Accounts),
            "payments" => Ok(Self::Payments),
            "funds-confirmation" | "fundsconfirmations" => Ok(Self::FundsConfirmation),
            "variable-recurring-payment" | "vrp" => Ok(Self::VariableRecurringPayment),
            _ => Err(AppError::BadRequest(format!(
                "unknown consent type value '{value}'"
            ))),
        }
    }
}

/// Lifecycle status of a consent.
///
/// Well-known statuses parse case-insensitively, so `authorised` and
/// `Authorised` are the same value. Anything else is kept verbatim in
/// [`ConsentStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConsentStatus {
    /// Created and waiting for the customer.
    AwaitingAuthorisation,
    /// Authorised by the customer.
    Authorised,
    /// Rejected by the customer.
    Rejected,
    /// Revoked. Terminal.
    Revoked,
    /// Validity period elapsed.
    Expired,
    /// Single-use consent already used.
    Consumed,
    /// File payment consent waiting for the file.
    AwaitingUpload,
    /// Deployment-specific status.
    Other(String),
}

impl ConsentStatus {
    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AwaitingAuthorisation => "AwaitingAuthorisation",
            Self::Authorised => "Authorised",
            Self::Rejected => "Rejected",
            Self::Revoked => "Revoked",
            Self::Expired => "Expired",
            Self::Consumed => "Consumed",
            Self::AwaitingUpload => "AwaitingUpload",
            Self::Other(value) => value.as_str(),
        }
    }

    /// Returns whether no further transition is accepted.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoked)
    }

    /// Parses a status string, folding well-known values case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "awaitingauthorisation" => Self::AwaitingAuthorisation,
            "authorised" => Self::Authorised,
            "rejected" => Self::Rejected,
            "revoked" => Self::Revoked,
            "expired" => Self::Expired,
            "consumed" => Self::Consumed,
            "awaitingupload" => Self::AwaitingUpload,
            _ => Self::Other(value.trim().to_owned()),
        }
    }
}

impl Display for ConsentStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl From<String> for ConsentStatus {
    fn from(value: String) -> Self {
        Self::parse(value.as_str())
    }
}

impl From<&str> for ConsentStatus {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<ConsentStatus> for String {
    fn from(value: ConsentStatus) -> Self {
        value.as_str().to_owned()
    }
}

/// Kind of act an authorization resource records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationType {
    /// The customer authorising the consent.
    Authorization,
    /// The customer cancelling a previous authorization.
    Cancellation,
}

impl AuthorizationType {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::Cancellation => "cancellation",
        }
    }
}

impl FromStr for AuthorizationType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "authorization" | "authorisation" => Ok(Self::Authorization),
            "cancellation" => Ok(Self::Cancellation),
            _ => Err(AppError::BadRequest(format!(
                "unknown authorization type value '{value}'"
            ))),
        }
    }
}

/// Status of a consent to account binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    /// Binding is in effect.
    Active,
    /// Binding was withdrawn.
    Inactive,
}

impl MappingStatus {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl FromStr for MappingStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            _ => Err(AppError::BadRequest(format!(
                "unknown mapping status value '{value}'"
            ))),
        }
    }
}

/// Consent header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentResource {
    /// Opaque unique identifier.
    pub consent_id: String,
    /// Third party the consent was issued to.
    pub client_id: String,
    /// Access kind.
    pub consent_type: ConsentType,
    /// Current lifecycle status.
    pub current_status: ConsentStatus,
    /// Original initiation payload as JSON text.
    pub receipt: Option<String>,
    /// Creation instant.
    pub created_time: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_time: DateTime<Utc>,
    /// Expiry instant, if any.
    pub validity_period: Option<DateTime<Utc>>,
    /// Partition key.
    pub org_id: OrgId,
}

/// One user's authorization or cancellation act against a consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResource {
    /// Opaque unique identifier.
    pub authorization_id: String,
    /// Owning consent.
    pub consent_id: String,
    /// Customer identifier, once known.
    pub user_id: Option<String>,
    /// Kind of act.
    pub authorization_type: AuthorizationType,
    /// Free-form status of the authorization flow.
    pub authorization_status: String,
    /// Last mutation instant.
    pub updated_time: DateTime<Utc>,
}

/// Binding between an authorization and a concrete account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentMappingResource {
    /// Opaque unique identifier.
    pub mapping_id: String,
    /// Authorization the binding was made under.
    pub authorization_id: String,
    /// Bound account.
    pub account_id: String,
    /// Permission granted on the account.
    pub permission: String,
    /// Whether the binding is in effect.
    pub mapping_status: MappingStatus,
}

/// String attributes attached to a consent.
pub type ConsentAttributes = BTreeMap<String, String>;

/// Consent plus everything attached to it.
///
/// Cloning yields an independent snapshot, which is what amendment history
/// compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedConsentResource {
    /// Header row.
    pub consent: ConsentResource,
    /// Authorization resources in creation order.
    pub authorization_resources: Vec<AuthorizationResource>,
    /// Account bindings.
    pub mapping_resources: Vec<ConsentMappingResource>,
    /// Attribute bag.
    pub attributes: ConsentAttributes,
}

impl DetailedConsentResource {
    /// Returns the consent identifier.
    #[must_use]
    pub fn consent_id(&self) -> &str {
        self.consent.consent_id.as_str()
    }

    /// Returns the user of the first authorization resource that has one.
    #[must_use]
    pub fn first_authorized_user(&self) -> Option<&str> {
        self.authorization_resources
            .iter()
            .find_map(|authorization| authorization.user_id.as_deref())
    }

    /// Returns whether any authorization resource belongs to `user_id`.
    #[must_use]
    pub fn has_authorized_user(&self, user_id: &str) -> bool {
        self.authorization_resources
            .iter()
            .any(|authorization| authorization.user_id.as_deref() == Some(user_id))
    }
}

/// Append-only record of one status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentStatusAuditRecord {
    /// Opaque unique identifier.
    pub status_audit_id: String,
    /// Consent that transitioned.
    pub consent_id: String,
    /// Status after the transition.
    pub current_status: ConsentStatus,
    /// Status before the transition.
    pub previous_status: Option<ConsentStatus>,
    /// Actor the transition is attributed to.
    pub action_by: Option<String>,
    /// Free-form reason.
    pub reason: Option<String>,
    /// Transition instant.
    pub action_time: DateTime<Utc>,
}
