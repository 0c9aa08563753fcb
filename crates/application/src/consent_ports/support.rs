use chrono::{DateTime, Utc};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Source of unique identifiers for consents, authorizations, audit and history rows.
pub trait IdGenerator: Send + Sync {
    /// Returns a new unique identifier.
    fn generate(&self) -> String;
}
