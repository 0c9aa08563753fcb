//! Consent aggregate model and amendment history rules.

#![forbid(unsafe_code)]

pub mod amendment;
mod consent;
mod history;

pub use amendment::{AmendmentDiff, AmendmentStamp, EntityDelta, ReplayedAmendment};
pub use consent::{
    AuthorizationResource, AuthorizationType, ConsentAttributes, ConsentMappingResource,
    ConsentResource, ConsentStatus, ConsentStatusAuditRecord, ConsentType,
    DetailedConsentResource, MappingStatus,
};
pub use history::{ChangedDataType, ConsentHistoryEntry, ConsentHistoryResource};
