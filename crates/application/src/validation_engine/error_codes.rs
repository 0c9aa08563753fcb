//! Machine-readable codes reported by failed validations.

/// A field is present but has the wrong type or value.
pub const FIELD_INVALID: &str = "OB.Field.Invalid";
/// A mandatory field is absent.
pub const FIELD_MISSING: &str = "OB.Field.Missing";
/// A document is not in the expected shape.
pub const RESOURCE_INVALID_FORMAT: &str = "OB.Resource.InvalidFormat";
/// The request does not agree with the consent.
pub const RESOURCE_CONSENT_MISMATCH: &str = "OB.Resource.ConsentMismatch";
/// The consent is not in a usable status.
pub const RESOURCE_INVALID_CONSENT_STATUS: &str = "OB.Resource.InvalidConsentStatus";
/// The consent could not be found.
pub const RESOURCE_NOT_FOUND: &str = "OB.Resource.NotFound";
/// The consent data could not be interpreted.
pub const UNEXPECTED_ERROR: &str = "OB.UnexpectedError";
