use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use obconsent_application::{
    AccountBinding, AmendConsentData, AuditRecordQuery, AuthorizationInput, Clock,
    ConsentSearchFilter, ConsentService, ConsentStore, CreateConsentInput, StoreError,
};
use obconsent_core::OrgId;
use obconsent_domain::{
    AuthorizationResource, AuthorizationType, ChangedDataType, ConsentHistoryEntry,
    ConsentMappingResource, ConsentResource, ConsentStatus, ConsentStatusAuditRecord, ConsentType,
    MappingStatus,
};
use serde_json::json;

use super::InMemoryConsentStore;
use crate::{SystemClock, UuidIdGenerator};

fn org() -> OrgId {
    OrgId::default()
}

fn at(minute: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0)
        .single()
        .unwrap_or_else(|| unreachable!())
}

fn consent(consent_id: &str, status: ConsentStatus, minute: u32) -> ConsentResource {
    ConsentResource {
        consent_id: consent_id.to_owned(),
        client_id: "client-1".to_owned(),
        consent_type: ConsentType::Payments,
        current_status: status,
        receipt: Some("{}".to_owned()),
        created_time: at(minute),
        updated_time: at(minute),
        validity_period: None,
        org_id: org(),
    }
}

fn authorization(authorization_id: &str, consent_id: &str, user_id: &str) -> AuthorizationResource {
    AuthorizationResource {
        authorization_id: authorization_id.to_owned(),
        consent_id: consent_id.to_owned(),
        user_id: Some(user_id.to_owned()),
        authorization_type: AuthorizationType::Authorization,
        authorization_status: "Authorised".to_owned(),
        updated_time: at(0),
    }
}

fn audit(status_audit_id: &str, consent_id: &str, minute: u32) -> ConsentStatusAuditRecord {
    ConsentStatusAuditRecord {
        status_audit_id: status_audit_id.to_owned(),
        consent_id: consent_id.to_owned(),
        current_status: ConsentStatus::Authorised,
        previous_status: Some(ConsentStatus::AwaitingAuthorisation),
        action_by: Some("psu-1".to_owned()),
        reason: Some("approved".to_owned()),
        action_time: at(minute),
    }
}

async fn seed(store: &InMemoryConsentStore) {
    let mut transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
    for (consent_id, status, minute) in [
        ("consent-1", ConsentStatus::Authorised, 1),
        ("consent-2", ConsentStatus::AwaitingAuthorisation, 2),
    ] {
        let inserted = transaction
            .insert_consent(&org(), &consent(consent_id, status, minute))
            .await;
        assert!(inserted.is_ok());
    }
    let inserted = transaction
        .insert_authorization(&org(), &authorization("auth-1", "consent-1", "psu-1"))
        .await;
    assert!(inserted.is_ok());
    let inserted = transaction
        .insert_mapping(
            &org(),
            "consent-1",
            &ConsentMappingResource {
                mapping_id: "mapping-1".to_owned(),
                authorization_id: "auth-1".to_owned(),
                account_id: "acc-1".to_owned(),
                permission: "ReadAccountsBasic".to_owned(),
                mapping_status: MappingStatus::Active,
            },
        )
        .await;
    assert!(inserted.is_ok());
    let inserted = transaction
        .upsert_attributes(
            &org(),
            "consent-1",
            &BTreeMap::from([("channel".to_owned(), "mobile".to_owned())]),
        )
        .await;
    assert!(inserted.is_ok());
    assert!(transaction.commit().await.is_ok());
}

#[tokio::test]
async fn committed_writes_are_visible_to_later_transactions() {
    let store = InMemoryConsentStore::new();
    seed(&store).await;

    let mut transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
    let detailed = transaction
        .fetch_detailed_consent(&org(), "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());

    assert_eq!(detailed.authorization_resources.len(), 1);
    assert_eq!(detailed.mapping_resources.len(), 1);
    assert_eq!(
        detailed.attributes.get("channel").map(String::as_str),
        Some("mobile")
    );
}

#[tokio::test]
async fn rollback_and_drop_discard_writes() {
    let store = InMemoryConsentStore::new();

    let mut rolled_back = store.begin().await.unwrap_or_else(|_| unreachable!());
    let inserted = rolled_back
        .insert_consent(&org(), &consent("consent-1", ConsentStatus::Authorised, 1))
        .await;
    assert!(inserted.is_ok());
    assert!(rolled_back.rollback().await.is_ok());
    drop(rolled_back);

    let mut abandoned = store.begin().await.unwrap_or_else(|_| unreachable!());
    let inserted = abandoned
        .insert_consent(&org(), &consent("consent-2", ConsentStatus::Authorised, 1))
        .await;
    assert!(inserted.is_ok());
    drop(abandoned);

    let mut transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
    let found = transaction
        .search_detailed_consents(&org(), &ConsentSearchFilter::default())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(found.is_empty());
}

#[tokio::test]
async fn finished_transaction_rejects_further_use() {
    let store = InMemoryConsentStore::new();
    let mut transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
    assert!(transaction.commit().await.is_ok());

    let result = transaction.fetch_consent(&org(), "consent-1").await;

    assert!(matches!(result, Err(StoreError::Transaction(_))));
    assert!(matches!(
        transaction.commit().await,
        Err(StoreError::Transaction(_))
    ));
}

#[tokio::test]
async fn open_transaction_blocks_the_next_one() {
    let store = InMemoryConsentStore::new();
    let mut first = store.begin().await.unwrap_or_else(|_| unreachable!());

    let blocked = tokio::time::timeout(Duration::from_millis(50), store.begin()).await;
    assert!(blocked.is_err());

    assert!(first.commit().await.is_ok());
    let next = tokio::time::timeout(Duration::from_millis(50), store.begin()).await;
    assert!(next.is_ok());
}

#[tokio::test]
async fn organizations_are_partitioned() {
    let store = InMemoryConsentStore::new();
    seed(&store).await;
    let other = OrgId::new("other-org").unwrap_or_else(|_| unreachable!());

    let mut transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
    let found = transaction
        .fetch_consent(&other, "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(found.is_none());
}

#[tokio::test]
async fn search_orders_newest_update_first_and_filters() {
    let store = InMemoryConsentStore::new();
    seed(&store).await;

    let mut transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
    let all = transaction
        .search_detailed_consents(&org(), &ConsentSearchFilter::default())
        .await
        .unwrap_or_else(|_| unreachable!());
    let by_user = transaction
        .search_detailed_consents(
            &org(),
            &ConsentSearchFilter {
                user_ids: vec!["psu-1".to_owned()],
                ..ConsentSearchFilter::default()
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    let ids: Vec<&str> = all.iter().map(|detailed| detailed.consent_id()).collect();
    assert_eq!(ids, vec!["consent-2", "consent-1"]);
    assert_eq!(by_user.len(), 1);
    assert_eq!(by_user[0].consent_id(), "consent-1");
}

#[tokio::test]
async fn commit_only_replaces_touched_organizations() {
    let store = InMemoryConsentStore::new();
    seed(&store).await;
    let other = OrgId::new("other-org").unwrap_or_else(|_| unreachable!());

    let mut writer = store.begin().await.unwrap_or_else(|_| unreachable!());
    assert!(
        writer
            .insert_consent(&other, &consent("consent-9", ConsentStatus::Authorised, 9))
            .await
            .is_ok()
    );
    assert!(writer.commit().await.is_ok());

    let mut discarded = store.begin().await.unwrap_or_else(|_| unreachable!());
    assert!(
        discarded
            .update_consent_status(&org(), "consent-1", &ConsentStatus::Revoked, at(10))
            .await
            .is_ok()
    );
    assert!(discarded.rollback().await.is_ok());

    let mut reader = store.begin().await.unwrap_or_else(|_| unreachable!());
    let seeded = reader
        .fetch_consent(&org(), "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());
    let added = reader
        .fetch_consent(&other, "consent-9")
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(seeded.current_status, ConsentStatus::Authorised);
    assert!(added.is_some());
}

#[tokio::test]
async fn children_require_an_existing_consent() {
    let store = InMemoryConsentStore::new();
    let mut transaction = store.begin().await.unwrap_or_else(|_| unreachable!());

    let result = transaction
        .insert_authorization(&org(), &authorization("auth-1", "missing", "psu-1"))
        .await;

    assert!(matches!(result, Err(StoreError::Insertion(_))));
}

#[tokio::test]
async fn delete_consent_cascades_but_keeps_audit_and_history() {
    let store = InMemoryConsentStore::new();
    seed(&store).await;

    let mut transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
    assert!(
        transaction
            .insert_status_audit_record(&org(), &audit("audit-1", "consent-1", 3))
            .await
            .is_ok()
    );
    assert!(
        transaction
            .insert_history_entry(
                &org(),
                &ConsentHistoryEntry {
                    history_id: "history-1".to_owned(),
                    consent_id: "consent-1".to_owned(),
                    record_id: "consent-1".to_owned(),
                    status_audit_id: "audit-1".to_owned(),
                    timestamp: at(3).timestamp(),
                    reason: "approved".to_owned(),
                    data_type: ChangedDataType::BasicConsentData,
                    changed_data: json!({ "current_status": "AwaitingAuthorisation" }),
                },
            )
            .await
            .is_ok()
    );
    assert!(transaction.delete_consent(&org(), "consent-1").await.is_ok());

    assert!(
        transaction
            .fetch_authorization(&org(), "auth-1")
            .await
            .unwrap_or_else(|_| unreachable!())
            .is_none()
    );
    assert!(
        transaction
            .fetch_attributes(&org(), "consent-1", None)
            .await
            .unwrap_or_else(|_| unreachable!())
            .is_empty()
    );
    assert!(
        transaction
            .fetch_status_audit_record(&org(), "audit-1")
            .await
            .is_ok()
    );
    assert_eq!(
        transaction
            .fetch_history_entries(&org(), "consent-1")
            .await
            .unwrap_or_else(|_| unreachable!())
            .len(),
        1
    );
}

#[tokio::test]
async fn audit_records_are_searched_newest_first() {
    let store = InMemoryConsentStore::new();
    let mut transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
    for (status_audit_id, minute) in [("audit-1", 1), ("audit-2", 5), ("audit-3", 3)] {
        assert!(
            transaction
                .insert_status_audit_record(&org(), &audit(status_audit_id, "consent-1", minute))
                .await
                .is_ok()
        );
    }

    let records = transaction
        .search_status_audit_records(
            &org(),
            &AuditRecordQuery {
                consent_ids: vec!["consent-1".to_owned()],
                limit: Some(2),
                ..AuditRecordQuery::default()
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    let missing = transaction
        .fetch_status_audit_record(&org(), "audit-9")
        .await;

    let ids: Vec<&str> = records
        .iter()
        .map(|record| record.status_audit_id.as_str())
        .collect();
    assert_eq!(ids, vec!["audit-2", "audit-3"]);
    assert!(matches!(missing, Err(StoreError::NoRecordsFound(_))));
}

#[tokio::test]
async fn attribute_lookups_span_consents() {
    let store = InMemoryConsentStore::new();
    seed(&store).await;

    let mut transaction = store.begin().await.unwrap_or_else(|_| unreachable!());
    assert!(
        transaction
            .upsert_attributes(
                &org(),
                "consent-2",
                &BTreeMap::from([("channel".to_owned(), "web".to_owned())]),
            )
            .await
            .is_ok()
    );

    let by_name = transaction
        .fetch_attributes_by_name(&org(), "channel")
        .await
        .unwrap_or_else(|_| unreachable!());
    let ids = transaction
        .fetch_consent_ids_by_attribute(&org(), "channel", "web")
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(by_name.len(), 2);
    assert_eq!(ids, vec!["consent-2".to_owned()]);
}

#[tokio::test]
async fn consent_service_runs_a_full_lifecycle_over_the_store() {
    let store = InMemoryConsentStore::new();
    let service = ConsentService::new(
        Arc::new(store.clone()),
        Arc::new(SystemClock),
        Arc::new(UuidIdGenerator),
    );

    let created = service
        .create_consent(
            &org(),
            CreateConsentInput {
                consent_id: None,
                client_id: "client-1".to_owned(),
                consent_type: ConsentType::Accounts,
                current_status: ConsentStatus::AwaitingAuthorisation,
                receipt: Some("{}".to_owned()),
                validity_period: None,
                attributes: BTreeMap::new(),
            },
            vec![AuthorizationInput {
                authorization_id: None,
                user_id: None,
                authorization_type: AuthorizationType::Authorization,
                authorization_status: "Created".to_owned(),
            }],
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    let consent_id = created.consent_id().to_owned();
    let authorization_id = created.authorization_resources[0].authorization_id.clone();

    let bound = service
        .bind_accounts_to_consent(
            &org(),
            AccountBinding {
                consent_id: consent_id.clone(),
                authorization_id,
                user_id: "psu-1".to_owned(),
                authorization_status: "Authorised".to_owned(),
                new_consent_status: ConsentStatus::Authorised,
                accounts: BTreeMap::from([(
                    "acc-1".to_owned(),
                    vec!["ReadAccountsBasic".to_owned()],
                )]),
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(bound.consent.current_status, ConsentStatus::Authorised);

    let revoked = service
        .revoke_consent(&org(), consent_id.as_str(), None, "revoked by customer")
        .await
        .unwrap_or_else(|_| unreachable!());
    let detailed = service
        .get_detailed_consent(&org(), consent_id.as_str())
        .await
        .unwrap_or_else(|_| unreachable!());
    let records = service
        .get_consent_status_audit_records(&org(), &[consent_id.clone()], None, None)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(revoked.current_status, ConsentStatus::Revoked);
    assert!(
        detailed
            .mapping_resources
            .iter()
            .all(|mapping| mapping.mapping_status == MappingStatus::Inactive)
    );
    assert!(records.iter().any(|record| {
        record.current_status == ConsentStatus::Revoked
            && record.action_by.as_deref() == Some("psu-1")
    }));
}

struct FrozenClock(chrono::DateTime<Utc>);

impl Clock for FrozenClock {
    fn now(&self) -> chrono::DateTime<Utc> {
        self.0
    }
}

#[tokio::test]
async fn history_of_amendments_within_one_second_replays_in_order() {
    let store = InMemoryConsentStore::new();
    let service = ConsentService::new(
        Arc::new(store),
        Arc::new(FrozenClock(at(5))),
        Arc::new(UuidIdGenerator),
    );
    let created = service
        .create_consent(
            &org(),
            CreateConsentInput {
                consent_id: Some("consent-1".to_owned()),
                client_id: "client-1".to_owned(),
                consent_type: ConsentType::Accounts,
                current_status: ConsentStatus::AwaitingAuthorisation,
                receipt: Some(r#"{"v":1}"#.to_owned()),
                validity_period: None,
                attributes: BTreeMap::new(),
            },
            vec![AuthorizationInput {
                authorization_id: None,
                user_id: Some("psu-1".to_owned()),
                authorization_type: AuthorizationType::Authorization,
                authorization_status: "Created".to_owned(),
            }],
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(
        service
            .update_consent_status(
                &org(),
                created.consent_id(),
                ConsentStatus::Authorised,
                "approved",
                None,
            )
            .await
            .is_ok()
    );
    assert!(
        service
            .amend_consent_data(
                &org(),
                AmendConsentData {
                    consent_id: "consent-1".to_owned(),
                    receipt: Some(r#"{"v":2}"#.to_owned()),
                    validity_period: None,
                    reason: "amended".to_owned(),
                    action_by: None,
                },
            )
            .await
            .is_ok()
    );

    let history = service
        .get_consent_amendment_history_data(&org(), &[], "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!());
    let before = |reason: &str| {
        history
            .values()
            .find(|amendment| amendment.reason == reason)
            .and_then(|amendment| amendment.detailed_consent.clone())
            .unwrap_or_else(|| unreachable!())
    };

    let before_amendment = before("amended");
    let before_approval = before("approved");
    assert_eq!(
        before_amendment.consent.current_status,
        ConsentStatus::Authorised
    );
    assert_eq!(before_amendment.consent.receipt.as_deref(), Some(r#"{"v":1}"#));
    assert_eq!(
        before_approval.consent.current_status,
        ConsentStatus::AwaitingAuthorisation
    );
    assert_eq!(before_approval.consent.receipt.as_deref(), Some(r#"{"v":1}"#));
}
