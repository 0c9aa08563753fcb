//! Amendment history differencing and replay.
//!
//! Every diff records the *prior* value of what changed, so a stored row
//! answers "what was it before". Entity lists are compared by id, never by
//! position. Reverting a row against the newer snapshot yields the older
//! snapshot, which is how historical states are rebuilt.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use obconsent_core::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::consent::{
    AuthorizationResource, ConsentAttributes, ConsentMappingResource, ConsentResource,
    ConsentStatus, DetailedConsentResource,
};
use crate::history::{ChangedDataType, ConsentHistoryEntry};

/// JSON object of field name to value.
pub type FieldMap = Map<String, Value>;

/// Change of one mapping or authorization entity between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum EntityDelta {
    /// Present only in the newer snapshot.
    Added,
    /// Present in both with differing fields; holds the prior values.
    Modified {
        /// Prior values of the differing fields.
        previous: FieldMap,
    },
    /// Present only in the older snapshot; holds the full prior entity.
    Removed {
        /// Every field of the removed entity.
        previous: FieldMap,
    },
}

/// Every facet diff between two aggregate snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmendmentDiff {
    /// Prior values of changed header fields.
    pub basic: FieldMap,
    /// Prior values of changed attributes; `null` for added keys.
    pub attributes: FieldMap,
    /// Per-mapping deltas keyed by mapping id.
    pub mappings: BTreeMap<String, EntityDelta>,
    /// Per-authorization deltas keyed by authorization id.
    pub authorizations: BTreeMap<String, EntityDelta>,
}

/// Identity shared by every row written for one amendment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmendmentStamp {
    /// Shared row identifier.
    pub history_id: String,
    /// Consent the amendment belongs to.
    pub consent_id: String,
    /// Triggering status audit record.
    pub status_audit_id: String,
    /// Amendment instant in epoch seconds.
    pub timestamp: i64,
    /// Free-form reason.
    pub reason: String,
}

impl AmendmentDiff {
    /// Returns whether the two snapshots were identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.basic.is_empty()
            && self.attributes.is_empty()
            && self.mappings.is_empty()
            && self.authorizations.is_empty()
    }

    /// Converts the diff into persistable rows, one per non-empty facet or entity.
    pub fn into_entries(self, stamp: &AmendmentStamp) -> AppResult<Vec<ConsentHistoryEntry>> {
        let mut entries = Vec::new();
        let row = |record_id: &str, data_type: ChangedDataType, changed_data: Value| {
            ConsentHistoryEntry {
                history_id: stamp.history_id.clone(),
                consent_id: stamp.consent_id.clone(),
                record_id: record_id.to_owned(),
                status_audit_id: stamp.status_audit_id.clone(),
                timestamp: stamp.timestamp,
                reason: stamp.reason.clone(),
                data_type,
                changed_data,
            }
        };

        if !self.basic.is_empty() {
            entries.push(row(
                stamp.consent_id.as_str(),
                ChangedDataType::BasicConsentData,
                Value::Object(self.basic),
            ));
        }
        if !self.attributes.is_empty() {
            entries.push(row(
                stamp.consent_id.as_str(),
                ChangedDataType::ConsentAttributes,
                Value::Object(self.attributes),
            ));
        }
        for (mapping_id, delta) in self.mappings {
            entries.push(row(
                mapping_id.as_str(),
                ChangedDataType::ConsentMapping,
                delta_to_value(&delta)?,
            ));
        }
        for (authorization_id, delta) in self.authorizations {
            entries.push(row(
                authorization_id.as_str(),
                ChangedDataType::ConsentAuthResource,
                delta_to_value(&delta)?,
            ));
        }

        Ok(entries)
    }
}

/// Compares every facet of two snapshots.
#[must_use]
pub fn diff_detailed_consents(
    current: &DetailedConsentResource,
    history: &DetailedConsentResource,
) -> AmendmentDiff {
    AmendmentDiff {
        basic: diff_basic_consent_data(&current.consent, &history.consent),
        attributes: diff_consent_attributes(&current.attributes, &history.attributes),
        mappings: diff_mapping_resources(&current.mapping_resources, &history.mapping_resources),
        authorizations: diff_authorization_resources(
            &current.authorization_resources,
            &history.authorization_resources,
        ),
    }
}

/// Returns prior values of the header fields that differ.
#[must_use]
pub fn diff_basic_consent_data(current: &ConsentResource, history: &ConsentResource) -> FieldMap {
    diff_fields(&basic_fields(current), &basic_fields(history))
}

/// Returns prior values of changed or removed keys, and `null` for added keys.
#[must_use]
pub fn diff_consent_attributes(
    current: &ConsentAttributes,
    history: &ConsentAttributes,
) -> FieldMap {
    let mut changed = FieldMap::new();
    for (key, previous) in history {
        if current.get(key) != Some(previous) {
            changed.insert(key.clone(), Value::String(previous.clone()));
        }
    }
    for key in current.keys() {
        if !history.contains_key(key) {
            changed.insert(key.clone(), Value::Null);
        }
    }

    changed
}

/// Compares account bindings by mapping id.
#[must_use]
pub fn diff_mapping_resources(
    current: &[ConsentMappingResource],
    history: &[ConsentMappingResource],
) -> BTreeMap<String, EntityDelta> {
    diff_entities(current, history)
}

/// Compares authorization resources by authorization id.
#[must_use]
pub fn diff_authorization_resources(
    current: &[AuthorizationResource],
    history: &[AuthorizationResource],
) -> BTreeMap<String, EntityDelta> {
    diff_entities(current, history)
}

/// Applies one stored row to `snapshot`, turning it into the state before that row's amendment.
pub fn revert_entry(
    snapshot: &mut DetailedConsentResource,
    entry: &ConsentHistoryEntry,
) -> AppResult<()> {
    match entry.data_type {
        ChangedDataType::BasicConsentData => {
            revert_basic_consent_data(&mut snapshot.consent, object(&entry.changed_data)?)
        }
        ChangedDataType::ConsentAttributes => {
            revert_consent_attributes(&mut snapshot.attributes, object(&entry.changed_data)?)
        }
        ChangedDataType::ConsentMapping => revert_entity(
            &mut snapshot.mapping_resources,
            entry.record_id.as_str(),
            value_to_delta(&entry.changed_data)?,
        ),
        ChangedDataType::ConsentAuthResource => revert_entity(
            &mut snapshot.authorization_resources,
            entry.record_id.as_str(),
            value_to_delta(&entry.changed_data)?,
        ),
    }
}

/// A historical snapshot rebuilt from stored rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedAmendment {
    /// Shared row identifier of the amendment.
    pub history_id: String,
    /// Triggering status audit record.
    pub status_audit_id: String,
    /// Amendment instant in epoch seconds.
    pub timestamp: i64,
    /// Free-form reason.
    pub reason: String,
    /// Aggregate as it was before the amendment.
    pub snapshot: DetailedConsentResource,
    /// Rows the amendment consisted of.
    pub entries: Vec<ConsentHistoryEntry>,
}

/// Rebuilds every historical snapshot, newest amendment first.
///
/// `entries` must be in the order they were stored. Amendments are undone
/// in reverse storage order, so two amendments sharing a timestamp still
/// replay correctly.
pub fn replay_history(
    current: &DetailedConsentResource,
    entries: &[ConsentHistoryEntry],
) -> AppResult<Vec<ReplayedAmendment>> {
    let mut positions: BTreeMap<&str, usize> = BTreeMap::new();
    let mut ordered: Vec<Vec<&ConsentHistoryEntry>> = Vec::new();
    for entry in entries {
        let position = *positions
            .entry(entry.history_id.as_str())
            .or_insert_with(|| {
                ordered.push(Vec::new());
                ordered.len() - 1
            });
        ordered[position].push(entry);
    }
    ordered.reverse();

    let mut snapshot = current.clone();
    let mut replayed = Vec::with_capacity(ordered.len());
    for rows in ordered {
        let Some(first) = rows.first() else {
            continue;
        };
        let (history_id, status_audit_id, timestamp, reason) = (
            first.history_id.clone(),
            first.status_audit_id.clone(),
            first.timestamp,
            first.reason.clone(),
        );
        for row in &rows {
            revert_entry(&mut snapshot, row)?;
        }
        replayed.push(ReplayedAmendment {
            history_id,
            status_audit_id,
            timestamp,
            reason,
            snapshot: snapshot.clone(),
            entries: rows.into_iter().cloned().collect(),
        });
    }

    Ok(replayed)
}

trait TrackedEntity: Serialize + DeserializeOwned {
    fn entity_id(&self) -> &str;
    fn fields(&self) -> FieldMap;
}

impl TrackedEntity for ConsentMappingResource {
    fn entity_id(&self) -> &str {
        self.mapping_id.as_str()
    }

    fn fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("mapping_id".to_owned(), Value::from(self.mapping_id.as_str()));
        fields.insert(
            "authorization_id".to_owned(),
            Value::from(self.authorization_id.as_str()),
        );
        fields.insert("account_id".to_owned(), Value::from(self.account_id.as_str()));
        fields.insert("permission".to_owned(), Value::from(self.permission.as_str()));
        fields.insert(
            "mapping_status".to_owned(),
            Value::from(self.mapping_status.as_str()),
        );
        fields
    }
}

impl TrackedEntity for AuthorizationResource {
    fn entity_id(&self) -> &str {
        self.authorization_id.as_str()
    }

    fn fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(
            "authorization_id".to_owned(),
            Value::from(self.authorization_id.as_str()),
        );
        fields.insert("consent_id".to_owned(), Value::from(self.consent_id.as_str()));
        fields.insert(
            "user_id".to_owned(),
            self.user_id.as_deref().map_or(Value::Null, Value::from),
        );
        fields.insert(
            "authorization_type".to_owned(),
            Value::from(self.authorization_type.as_str()),
        );
        fields.insert(
            "authorization_status".to_owned(),
            Value::from(self.authorization_status.as_str()),
        );
        fields.insert("updated_time".to_owned(), instant_value(&self.updated_time));
        fields
    }
}

fn basic_fields(consent: &ConsentResource) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("client_id".to_owned(), Value::from(consent.client_id.as_str()));
    fields.insert(
        "consent_type".to_owned(),
        Value::from(consent.consent_type.as_str()),
    );
    fields.insert(
        "current_status".to_owned(),
        Value::from(consent.current_status.as_str()),
    );
    fields.insert(
        "receipt".to_owned(),
        consent.receipt.as_deref().map_or(Value::Null, Value::from),
    );
    fields.insert("created_time".to_owned(), instant_value(&consent.created_time));
    fields.insert("updated_time".to_owned(), instant_value(&consent.updated_time));
    fields.insert(
        "validity_period".to_owned(),
        consent
            .validity_period
            .as_ref()
            .map_or(Value::Null, instant_value),
    );
    fields
}

fn instant_value(instant: &DateTime<Utc>) -> Value {
    Value::String(instant.to_rfc3339())
}

fn diff_fields(current: &FieldMap, history: &FieldMap) -> FieldMap {
    history
        .iter()
        .filter(|(key, previous)| current.get(key.as_str()) != Some(*previous))
        .map(|(key, previous)| (key.clone(), previous.clone()))
        .collect()
}

fn diff_entities<T: TrackedEntity>(current: &[T], history: &[T]) -> BTreeMap<String, EntityDelta> {
    let current_by_id: BTreeMap<&str, &T> = current
        .iter()
        .map(|entity| (entity.entity_id(), entity))
        .collect();
    let history_by_id: BTreeMap<&str, &T> = history
        .iter()
        .map(|entity| (entity.entity_id(), entity))
        .collect();

    let mut deltas = BTreeMap::new();
    for (entity_id, previous) in &history_by_id {
        match current_by_id.get(entity_id) {
            None => {
                deltas.insert(
                    (*entity_id).to_owned(),
                    EntityDelta::Removed {
                        previous: previous.fields(),
                    },
                );
            }
            Some(present) => {
                let changed = diff_fields(&present.fields(), &previous.fields());
                if !changed.is_empty() {
                    deltas.insert(
                        (*entity_id).to_owned(),
                        EntityDelta::Modified { previous: changed },
                    );
                }
            }
        }
    }
    for entity_id in current_by_id.keys() {
        if !history_by_id.contains_key(entity_id) {
            deltas.insert((*entity_id).to_owned(), EntityDelta::Added);
        }
    }

    deltas
}

fn revert_basic_consent_data(consent: &mut ConsentResource, previous: &FieldMap) -> AppResult<()> {
    for (key, value) in previous {
        match key.as_str() {
            "client_id" => consent.client_id = text(key, value)?,
            "consent_type" => consent.consent_type = text(key, value)?.parse()?,
            "current_status" => {
                consent.current_status = ConsentStatus::parse(text(key, value)?.as_str());
            }
            "receipt" => consent.receipt = optional_text(key, value)?,
            "created_time" => consent.created_time = instant(key, value)?,
            "updated_time" => consent.updated_time = instant(key, value)?,
            "validity_period" => {
                consent.validity_period = match optional_text(key, value)? {
                    Some(_) => Some(instant(key, value)?),
                    None => None,
                };
            }
            _ => {
                return Err(AppError::Internal(format!(
                    "unknown basic consent field '{key}' in history"
                )));
            }
        }
    }

    Ok(())
}

fn revert_consent_attributes(
    attributes: &mut ConsentAttributes,
    previous: &FieldMap,
) -> AppResult<()> {
    for (key, value) in previous {
        match value {
            Value::Null => {
                attributes.remove(key);
            }
            Value::String(prior) => {
                attributes.insert(key.clone(), prior.clone());
            }
            _ => {
                return Err(AppError::Internal(format!(
                    "attribute '{key}' in history is not a string"
                )));
            }
        }
    }

    Ok(())
}

fn revert_entity<T: TrackedEntity>(
    entities: &mut Vec<T>,
    record_id: &str,
    delta: EntityDelta,
) -> AppResult<()> {
    match delta {
        EntityDelta::Added => entities.retain(|entity| entity.entity_id() != record_id),
        EntityDelta::Modified { previous } => {
            let entity = entities
                .iter_mut()
                .find(|entity| entity.entity_id() == record_id)
                .ok_or_else(|| {
                    AppError::Internal(format!(
                        "history modifies '{record_id}' which is not in the snapshot"
                    ))
                })?;
            let mut fields = entity.fields();
            fields.extend(previous);
            *entity = entity_from_fields(fields)?;
        }
        EntityDelta::Removed { previous } => {
            if !entities.iter().any(|entity| entity.entity_id() == record_id) {
                entities.push(entity_from_fields(previous)?);
            }
        }
    }

    Ok(())
}

fn entity_from_fields<T: DeserializeOwned>(fields: FieldMap) -> AppResult<T> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|error| AppError::Internal(format!("failed to rebuild entity from history: {error}")))
}

fn delta_to_value(delta: &EntityDelta) -> AppResult<Value> {
    serde_json::to_value(delta)
        .map_err(|error| AppError::Internal(format!("failed to encode entity delta: {error}")))
}

fn value_to_delta(value: &Value) -> AppResult<EntityDelta> {
    serde_json::from_value(value.clone())
        .map_err(|error| AppError::Internal(format!("failed to decode entity delta: {error}")))
}

fn object(value: &Value) -> AppResult<&FieldMap> {
    value
        .as_object()
        .ok_or_else(|| AppError::Internal("history changed data must be an object".to_owned()))
}

fn text(key: &str, value: &Value) -> AppResult<String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| AppError::Internal(format!("history field '{key}' must be a string")))
}

fn optional_text(key: &str, value: &Value) -> AppResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        _ => text(key, value).map(Some),
    }
}

fn instant(key: &str, value: &Value) -> AppResult<DateTime<Utc>> {
    let raw = text(key, value)?;
    DateTime::parse_from_rfc3339(raw.as_str())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| AppError::Internal(format!("history field '{key}' is not RFC 3339: {error}")))
}
