//! Consent lifecycle services, persistence ports and request validation.

#![forbid(unsafe_code)]

mod consent_ports;
mod consent_service;
pub mod validation_engine;

pub use consent_ports::{
    AccountBinding, AmendConsentData, ApplicableRevocation, AuditRecordQuery, AuthorizationInput,
    AuthorizationUpdate, BulkStatusUpdate, Clock, ConsentSearchFilter, ConsentStore,
    ConsentTransaction, ConsentWithAttributes, CreateConsentInput, DetailedAmendment,
    ExclusiveConsent, ExpirySweep, IdGenerator, Reauthorization, ReauthorizationTarget,
    StoreError, paginate,
};
pub use consent_service::ConsentService;
pub use validation_engine::{
    ConsentValidateData, ConsentValidationEngine, ConsentValidationResult, ValidationConfig,
};
