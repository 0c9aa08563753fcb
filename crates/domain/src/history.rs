use std::str::FromStr;

use obconsent_core::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consent::DetailedConsentResource;

/// Facet of the consent aggregate a history row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedDataType {
    /// Scalar fields of the consent header.
    BasicConsentData,
    /// Attribute bag.
    ConsentAttributes,
    /// One account binding.
    ConsentMapping,
    /// One authorization resource.
    ConsentAuthResource,
}

impl ChangedDataType {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BasicConsentData => "basic_consent_data",
            Self::ConsentAttributes => "consent_attributes",
            Self::ConsentMapping => "consent_mapping",
            Self::ConsentAuthResource => "consent_auth_resource",
        }
    }
}

impl FromStr for ChangedDataType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "basic_consent_data" => Ok(Self::BasicConsentData),
            "consent_attributes" => Ok(Self::ConsentAttributes),
            "consent_mapping" => Ok(Self::ConsentMapping),
            "consent_auth_resource" => Ok(Self::ConsentAuthResource),
            _ => Err(AppError::Internal(format!(
                "unknown changed data type value '{value}'"
            ))),
        }
    }
}

/// One persisted amendment history row.
///
/// `record_id` is the consent id for basic and attribute rows and the
/// mapping or authorization id for entity rows. `changed_data` holds prior
/// values only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentHistoryEntry {
    /// Identifier shared by every row of one amendment.
    pub history_id: String,
    /// Consent the amendment belongs to.
    pub consent_id: String,
    /// Entity the row describes.
    pub record_id: String,
    /// Status audit record that triggered the amendment.
    pub status_audit_id: String,
    /// Amendment instant in epoch seconds.
    pub timestamp: i64,
    /// Free-form reason.
    pub reason: String,
    /// Facet the row describes.
    pub data_type: ChangedDataType,
    /// Prior values of the fields that changed.
    pub changed_data: Value,
}

/// One amendment of a consent with the aggregate snapshot it relates to.
///
/// When stored, `detailed_consent` is the state before the amendment. When
/// returned from a history query it is the reconstructed state before the
/// amendment, alongside the rows it was rebuilt from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentHistoryResource {
    /// Shared row identifier; generated when absent.
    pub history_id: Option<String>,
    /// Consent the amendment belongs to.
    pub consent_id: String,
    /// Status audit record that triggered the amendment.
    pub status_audit_id: String,
    /// Amendment instant in epoch seconds.
    pub timestamp: i64,
    /// Free-form reason.
    pub reason: String,
    /// Snapshot before the amendment.
    pub detailed_consent: Option<DetailedConsentResource>,
    /// Rows the snapshot was rebuilt from.
    pub entries: Vec<ConsentHistoryEntry>,
}
