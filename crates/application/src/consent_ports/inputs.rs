use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use obconsent_domain::{
    AuthorizationType, ConsentAttributes, ConsentResource, ConsentStatus, ConsentType,
};
use serde::{Deserialize, Serialize};

/// Input payload for consent initiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConsentInput {
    /// Identifier to use; generated when absent or blank.
    pub consent_id: Option<String>,
    /// Third party the consent is issued to.
    pub client_id: String,
    /// Access kind.
    pub consent_type: ConsentType,
    /// Initial status.
    pub current_status: ConsentStatus,
    /// Initiation payload as JSON text.
    pub receipt: Option<String>,
    /// Expiry instant.
    pub validity_period: Option<DateTime<Utc>>,
    /// Attributes stored with the consent.
    #[serde(default)]
    pub attributes: ConsentAttributes,
}

/// Input payload for an authorization resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationInput {
    /// Identifier to use; generated when absent or blank.
    pub authorization_id: Option<String>,
    /// Customer, once known.
    pub user_id: Option<String>,
    /// Kind of act.
    pub authorization_type: AuthorizationType,
    /// Status of the authorization flow.
    pub authorization_status: String,
}

/// Partial update of an authorization resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationUpdate {
    /// New flow status.
    pub authorization_status: Option<String>,
    /// New customer.
    pub user_id: Option<String>,
}

/// Consent header with its attributes when requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentWithAttributes {
    /// Header row.
    pub consent: ConsentResource,
    /// Attributes, present when they were requested.
    pub attributes: Option<ConsentAttributes>,
}

/// Criteria and target of a bulk status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkStatusUpdate {
    /// Restrict to one client.
    pub client_id: Option<String>,
    /// Status to move matches to.
    pub new_status: ConsentStatus,
    /// Reason recorded on every audit row.
    pub reason: String,
    /// Restrict to consents authorised by this user; also the recorded actor.
    pub user_id: Option<String>,
    /// Restrict to one consent type.
    pub consent_type: Option<ConsentType>,
    /// Statuses a consent must currently be in.
    pub from_statuses: Vec<ConsentStatus>,
}

/// Binding of customer accounts to an authorised consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBinding {
    /// Consent being authorised.
    pub consent_id: String,
    /// Authorization the binding is made under.
    pub authorization_id: String,
    /// Customer completing the authorization.
    pub user_id: String,
    /// Status to record on the authorization.
    pub authorization_status: String,
    /// Status to move the consent to.
    pub new_consent_status: ConsentStatus,
    /// Account id to granted permissions.
    pub accounts: BTreeMap<String, Vec<String>>,
}

/// Replacement of the mutable data of a consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendConsentData {
    /// Consent to amend.
    pub consent_id: String,
    /// New receipt.
    pub receipt: Option<String>,
    /// New expiry instant.
    pub validity_period: Option<DateTime<Utc>>,
    /// Reason recorded with the amendment.
    pub reason: String,
    /// Actor the amendment is attributed to.
    pub action_by: Option<String>,
}

/// Re-authorization of a consent by a customer who has authorised it before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reauthorization {
    /// Consent being re-authorised.
    pub consent_id: String,
    /// Customer re-authorising.
    pub user_id: String,
    /// Account id to granted permissions after re-authorization.
    pub accounts: BTreeMap<String, Vec<String>>,
    /// Status to move the consent to.
    pub new_consent_status: ConsentStatus,
    /// Authorization the new bindings are made under.
    pub target: ReauthorizationTarget,
}

/// Authorization resource a re-authorization binds accounts under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReauthorizationTarget {
    /// Reuse an authorization of the consent. Only accounts without an
    /// active binding are added.
    Existing {
        /// Authorization of the consent.
        authorization_id: String,
    },
    /// Retire the customer's authorizations and bind every requested account
    /// under a fresh one.
    NewResource {
        /// Status given to the customer's previous authorizations.
        existing_authorization_status: String,
        /// Status of the new authorization.
        authorization_status: String,
        /// Kind of the new authorization.
        authorization_type: AuthorizationType,
    },
}

/// Amendment of consent data, account bindings and attributes in one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedAmendment {
    /// Consent to amend.
    pub consent_id: String,
    /// New receipt.
    pub receipt: Option<String>,
    /// New expiry instant.
    pub validity_period: Option<DateTime<Utc>>,
    /// Authorization new bindings are made under.
    pub authorization_id: String,
    /// Account id to granted permissions after the amendment.
    pub accounts: BTreeMap<String, Vec<String>>,
    /// Status to move the consent to.
    pub new_consent_status: ConsentStatus,
    /// Attributes to insert or replace.
    pub attributes: ConsentAttributes,
    /// Customer the amendment is attributed to.
    pub action_by: String,
}

/// Statuses used when a new consent supersedes a customer's existing ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusiveConsent {
    /// Customer whose consents are superseded.
    pub user_id: String,
    /// Status an existing consent must be in to be superseded.
    pub applicable_status: ConsentStatus,
    /// Status superseded consents move to.
    pub superseded_status: ConsentStatus,
}

/// Criteria and target of revoking a customer's consents of one client and type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicableRevocation {
    /// Client the consents were issued to.
    pub client_id: String,
    /// Customer who authorised them; also the recorded actor.
    pub user_id: String,
    /// Access kind.
    pub consent_type: ConsentType,
    /// Status a consent must be in to be revoked.
    pub applicable_status: ConsentStatus,
    /// Status revoked consents move to.
    pub revoked_status: ConsentStatus,
}

/// Parameters of one expiry sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirySweep {
    /// Statuses in which a lapsed consent is expired.
    pub eligible_statuses: Vec<ConsentStatus>,
    /// Status lapsed consents move to.
    pub expired_status: ConsentStatus,
}

impl Default for ExpirySweep {
    fn default() -> Self {
        Self {
            eligible_statuses: vec![ConsentStatus::Authorised],
            expired_status: ConsentStatus::Expired,
        }
    }
}
