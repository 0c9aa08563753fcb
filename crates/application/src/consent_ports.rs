mod inputs;
mod queries;
mod store;
mod support;

pub use inputs::{
    AccountBinding, AmendConsentData, ApplicableRevocation, AuthorizationInput,
    AuthorizationUpdate, BulkStatusUpdate, ConsentWithAttributes, CreateConsentInput,
    DetailedAmendment, ExclusiveConsent, ExpirySweep, Reauthorization, ReauthorizationTarget,
};
pub use queries::{AuditRecordQuery, ConsentSearchFilter, paginate};
pub use store::{ConsentStore, ConsentTransaction, StoreError};
pub use support::{Clock, IdGenerator};
