use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};

use obconsent_core::{AppError, ConflictKind, OrgId, PersistenceFailure};
use obconsent_domain::{
    AuthorizationType, ChangedDataType, ConsentHistoryResource, ConsentStatus, ConsentType,
    DetailedConsentResource, MappingStatus,
};

use crate::consent_ports::{
    AccountBinding, AmendConsentData, ApplicableRevocation, AuditRecordQuery, AuthorizationInput,
    AuthorizationUpdate, BulkStatusUpdate, Clock, ConsentSearchFilter, CreateConsentInput,
    DetailedAmendment, ExclusiveConsent, ExpirySweep, IdGenerator, Reauthorization,
    ReauthorizationTarget,
};

use super::ConsentService;


use fake_store::FakeConsentStore;

/// Advances one second per reading so successive writes are ordered.
struct TickingClock {
    start: DateTime<Utc>,
    ticks: AtomicI64,
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        self.start + Duration::seconds(self.ticks.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Default)]
struct SequentialIds(AtomicUsize);

impl IdGenerator for SequentialIds {
    fn generate(&self) -> String {
        format!("id-{:04}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(|| unreachable!())
}

fn org() -> OrgId {
    OrgId::default()
}

fn harness() -> (ConsentService, FakeConsentStore) {
    let store = FakeConsentStore::default();
    let clock = TickingClock {
        start: start(),
        ticks: AtomicI64::new(0),
    };
    let service = ConsentService::new(
        Arc::new(store.clone()),
        Arc::new(clock),
        Arc::new(SequentialIds::default()),
    );
    (service, store)
}

fn consent_input(consent_id: &str, status: ConsentStatus) -> CreateConsentInput {
    CreateConsentInput {
        consent_id: Some(consent_id.to_owned()),
        client_id: "client-1".to_owned(),
        consent_type: ConsentType::Accounts,
        current_status: status,
        receipt: Some(r#"{"Data":{"Permissions":["ReadAccountsBasic"]}}"#.to_owned()),
        validity_period: None,
        attributes: BTreeMap::new(),
    }
}

fn authorization(user_id: Option<&str>) -> AuthorizationInput {
    AuthorizationInput {
        authorization_id: None,
        user_id: user_id.map(str::to_owned),
        authorization_type: AuthorizationType::Authorization,
        authorization_status: "Created".to_owned(),
    }
}

async fn seed(
    service: &ConsentService,
    consent_id: &str,
    status: ConsentStatus,
    users: &[Option<&str>],
) -> DetailedConsentResource {
    service
        .create_consent(
            &org(),
            consent_input(consent_id, status),
            users.iter().map(|user_id| authorization(*user_id)).collect(),
        )
        .await
        .unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn create_consent_persists_aggregate_and_creation_audit() {
    let (service, store) = harness();

    let created = seed(
        &service,
        "consent-1",
        ConsentStatus::AwaitingAuthorisation,
        &[Some("psu-1"), None],
    )
    .await;

    let loaded = service
        .get_detailed_consent(&org(), "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(loaded.authorization_resources.len(), 2);
    assert_eq!(loaded.consent, created.consent);

    let records = store.org(&org()).await.audit_records;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| record.previous_status.is_none()));
    assert!(
        records
            .iter()
            .any(|record| record.action_by.as_deref() == Some("psu-1"))
    );
}

#[tokio::test]
async fn create_consent_generates_missing_identifiers() {
    let (service, _) = harness();
    let mut input = consent_input("ignored", ConsentStatus::AwaitingAuthorisation);
    input.consent_id = Some("   ".to_owned());

    let created = service
        .create_consent(&org(), input, vec![authorization(None)])
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(created.consent_id().starts_with("id-"));
    assert!(
        created.authorization_resources[0]
            .authorization_id
            .starts_with("id-")
    );
}

#[tokio::test]
async fn create_consent_rejects_blank_client() {
    let (service, store) = harness();
    let mut input = consent_input("consent-1", ConsentStatus::AwaitingAuthorisation);
    input.client_id = " ".to_owned();

    let result = service.create_consent(&org(), input, Vec::new()).await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
    assert!(store.org(&org()).await.consents.is_empty());
}

#[tokio::test]
async fn get_consent_with_blank_id_is_a_missing_argument() {
    let (service, _) = harness();

    let result = service.get_consent(&org(), "", true).await;

    assert!(matches!(result, Err(AppError::MissingArgument(_))));
}

#[tokio::test]
async fn get_consent_returns_attributes_only_when_requested() {
    let (service, _) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;
    service
        .store_consent_attributes(
            &org(),
            "consent-1",
            BTreeMap::from([("channel".to_owned(), "mobile".to_owned())]),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    let bare = service
        .get_consent(&org(), "consent-1", false)
        .await
        .unwrap_or_else(|_| unreachable!());
    let with_attributes = service
        .get_consent(&org(), "consent-1", true)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(bare.attributes.is_none());
    assert_eq!(
        with_attributes
            .attributes
            .and_then(|attributes| attributes.get("channel").cloned()),
        Some("mobile".to_owned())
    );
}

#[tokio::test]
async fn update_status_audits_every_authorization() {
    let (service, store) = harness();
    seed(
        &service,
        "consent-1",
        ConsentStatus::AwaitingAuthorisation,
        &[Some("psu-1"), Some("psu-2")],
    )
    .await;

    let updated = service
        .update_consent_status(
            &org(),
            "consent-1",
            ConsentStatus::Authorised,
            "customer approved",
            None,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(updated.current_status, ConsentStatus::Authorised);
    let state = store.org(&org()).await;
    let transitions: Vec<_> = state
        .audit_records
        .iter()
        .filter(|record| record.previous_status.is_some())
        .collect();
    assert_eq!(transitions.len(), 2);
    assert!(transitions.iter().all(|record| {
        record.previous_status == Some(ConsentStatus::AwaitingAuthorisation)
            && record.current_status == ConsentStatus::Authorised
            && record.reason.as_deref() == Some("customer approved")
    }));
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].data_type, ChangedDataType::BasicConsentData);
    assert_eq!(
        state.history[0].status_audit_id,
        transitions[0].status_audit_id
    );
}

#[tokio::test]
async fn update_status_without_authorizations_writes_one_row() {
    let (service, store) = harness();
    seed(&service, "consent-1", ConsentStatus::AwaitingAuthorisation, &[]).await;

    service
        .update_consent_status(
            &org(),
            "consent-1",
            ConsentStatus::Rejected,
            "customer declined",
            Some("bank-agent"),
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    let state = store.org(&org()).await;
    let transitions: Vec<_> = state
        .audit_records
        .iter()
        .filter(|record| record.previous_status.is_some())
        .collect();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].action_by.as_deref(), Some("bank-agent"));
}

#[tokio::test]
async fn update_status_of_unknown_consent_is_not_found() {
    let (service, _) = harness();

    let result = service
        .update_consent_status(&org(), "missing", ConsentStatus::Authorised, "reason", None)
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn failed_history_write_rolls_back_the_status_change() {
    let (service, store) = harness();
    seed(
        &service,
        "consent-1",
        ConsentStatus::AwaitingAuthorisation,
        &[Some("psu-1")],
    )
    .await;
    let audit_rows_before = store.org(&org()).await.audit_records.len();
    store.fail_history_inserts().await;

    let result = service
        .update_consent_status(
            &org(),
            "consent-1",
            ConsentStatus::Authorised,
            "customer approved",
            None,
        )
        .await;

    assert!(matches!(
        result,
        Err(AppError::Persistence {
            kind: PersistenceFailure::Insertion,
            ..
        })
    ));
    let state = store.org(&org()).await;
    assert_eq!(
        state.consents["consent-1"].current_status,
        ConsentStatus::AwaitingAuthorisation
    );
    assert_eq!(state.audit_records.len(), audit_rows_before);
    assert_eq!(store.shared.lock().await.rollbacks, 1);
}

#[tokio::test]
async fn revoke_twice_conflicts_without_new_audit_rows() {
    let (service, store) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;

    let revoked = service
        .revoke_consent(&org(), "consent-1", None, "customer revoked")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(revoked.current_status, ConsentStatus::Revoked);
    let audit_rows = store.org(&org()).await.audit_records.len();

    let second = service
        .revoke_consent(&org(), "consent-1", Some("psu-1"), "again")
        .await;

    assert!(matches!(
        second,
        Err(AppError::Conflict(ConflictKind::AlreadyRevoked { ref consent_id })) if consent_id == "consent-1"
    ));
    assert_eq!(store.org(&org()).await.audit_records.len(), audit_rows);
}

#[tokio::test]
async fn revoke_is_attributed_to_the_first_authorized_user() {
    let (service, store) = harness();
    seed(
        &service,
        "consent-1",
        ConsentStatus::Authorised,
        &[None, Some("psu-2")],
    )
    .await;

    service
        .revoke_consent(&org(), "consent-1", None, "customer revoked")
        .await
        .unwrap_or_else(|_| unreachable!());

    let records = store
        .org(&org())
        .await
        .audit_records
        .into_iter()
        .filter(|record| record.current_status == ConsentStatus::Revoked)
        .collect::<Vec<_>>();
    assert_eq!(records.len(), 2);
    assert!(
        records
            .iter()
            .all(|record| record.action_by.as_deref() == Some("psu-2"))
    );
}

#[tokio::test]
async fn revoke_without_any_actor_is_rejected() {
    let (service, _) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[None]).await;

    let result = service
        .revoke_consent(&org(), "consent-1", None, "customer revoked")
        .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn bind_accounts_then_revoke_deactivates_mappings() {
    let (service, store) = harness();
    let created = seed(
        &service,
        "consent-1",
        ConsentStatus::AwaitingAuthorisation,
        &[None],
    )
    .await;
    let authorization_id = created.authorization_resources[0].authorization_id.clone();

    let bound = service
        .bind_accounts_to_consent(
            &org(),
            AccountBinding {
                consent_id: "consent-1".to_owned(),
                authorization_id,
                user_id: "psu-1".to_owned(),
                authorization_status: "Authorised".to_owned(),
                new_consent_status: ConsentStatus::Authorised,
                accounts: BTreeMap::from([
                    (
                        "acc-1".to_owned(),
                        vec!["ReadAccountsBasic".to_owned(), "ReadBalances".to_owned()],
                    ),
                    ("acc-2".to_owned(), vec!["ReadAccountsBasic".to_owned()]),
                ]),
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(bound.consent.current_status, ConsentStatus::Authorised);
    assert_eq!(bound.mapping_resources.len(), 3);
    assert_eq!(bound.first_authorized_user(), Some("psu-1"));

    service
        .revoke_consent(&org(), "consent-1", None, "customer revoked")
        .await
        .unwrap_or_else(|_| unreachable!());

    let state = store.org(&org()).await;
    assert!(
        state
            .mappings
            .values()
            .all(|(_, mapping)| mapping.mapping_status == MappingStatus::Inactive)
    );
}

#[tokio::test]
async fn bind_accounts_under_foreign_authorization_is_rejected() {
    let (service, store) = harness();
    seed(
        &service,
        "consent-1",
        ConsentStatus::AwaitingAuthorisation,
        &[None],
    )
    .await;

    let result = service
        .bind_accounts_to_consent(
            &org(),
            AccountBinding {
                consent_id: "consent-1".to_owned(),
                authorization_id: "unknown".to_owned(),
                user_id: "psu-1".to_owned(),
                authorization_status: "Authorised".to_owned(),
                new_consent_status: ConsentStatus::Authorised,
                accounts: BTreeMap::from([(
                    "acc-1".to_owned(),
                    vec!["ReadAccountsBasic".to_owned()],
                )]),
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
    assert!(store.org(&org()).await.mappings.is_empty());
}

#[tokio::test]
async fn mapping_status_can_be_toggled() {
    let (service, store) = harness();
    let created = seed(
        &service,
        "consent-1",
        ConsentStatus::AwaitingAuthorisation,
        &[None],
    )
    .await;
    let bound = service
        .bind_accounts_to_consent(
            &org(),
            AccountBinding {
                consent_id: "consent-1".to_owned(),
                authorization_id: created.authorization_resources[0].authorization_id.clone(),
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
    let mapping_ids = vec![bound.mapping_resources[0].mapping_id.clone()];

    service
        .deactivate_account_mappings(&org(), &mapping_ids)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(
        store.org(&org()).await.mappings[&mapping_ids[0]].1.mapping_status,
        MappingStatus::Inactive
    );

    service
        .update_account_mapping_status(&org(), &mapping_ids, MappingStatus::Active)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(
        store.org(&org()).await.mappings[&mapping_ids[0]].1.mapping_status,
        MappingStatus::Active
    );

    let empty = service
        .update_account_mapping_status(&org(), &[], MappingStatus::Active)
        .await;
    assert!(matches!(empty, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn bulk_update_without_matches_is_not_found() {
    let (service, _) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;

    let result = service
        .bulk_update_consent_status(
            &org(),
            BulkStatusUpdate {
                client_id: Some("client-9".to_owned()),
                new_status: ConsentStatus::Revoked,
                reason: "client offboarded".to_owned(),
                user_id: None,
                consent_type: None,
                from_statuses: vec![ConsentStatus::Authorised],
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn bulk_update_moves_every_matching_consent() {
    let (service, store) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;
    seed(&service, "consent-2", ConsentStatus::Authorised, &[Some("psu-1")]).await;
    seed(&service, "consent-3", ConsentStatus::Rejected, &[Some("psu-1")]).await;

    let mut updated = service
        .bulk_update_consent_status(
            &org(),
            BulkStatusUpdate {
                client_id: Some("client-1".to_owned()),
                new_status: ConsentStatus::Revoked,
                reason: "client offboarded".to_owned(),
                user_id: Some("psu-1".to_owned()),
                consent_type: Some(ConsentType::Accounts),
                from_statuses: vec![ConsentStatus::Authorised],
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    updated.sort();

    assert_eq!(updated, vec!["consent-1".to_owned(), "consent-2".to_owned()]);
    let state = store.org(&org()).await;
    assert_eq!(
        state.consents["consent-3"].current_status,
        ConsentStatus::Rejected
    );
    assert_eq!(
        state.consents["consent-1"].current_status,
        ConsentStatus::Revoked
    );
}

#[tokio::test]
async fn bulk_update_without_source_statuses_is_rejected() {
    let (service, store) = harness();
    seed(&service, "consent-1", ConsentStatus::Revoked, &[Some("psu-1")]).await;
    seed(&service, "consent-2", ConsentStatus::Authorised, &[Some("psu-1")]).await;

    let result = service
        .bulk_update_consent_status(
            &org(),
            BulkStatusUpdate {
                client_id: Some("client-1".to_owned()),
                new_status: ConsentStatus::Expired,
                reason: "client offboarded".to_owned(),
                user_id: None,
                consent_type: None,
                from_statuses: Vec::new(),
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
    let state = store.org(&org()).await;
    assert_eq!(
        state.consents["consent-2"].current_status,
        ConsentStatus::Authorised
    );
}

#[tokio::test]
async fn writes_lock_the_consent_before_reading_it() {
    let (service, store) = harness();
    seed(&service, "consent-1", ConsentStatus::AwaitingAuthorisation, &[Some("psu-1")]).await;

    service
        .update_consent_status(&org(), "consent-1", ConsentStatus::Authorised, "approved", None)
        .await
        .unwrap_or_else(|_| unreachable!());
    service
        .amend_consent_data(
            &org(),
            AmendConsentData {
                consent_id: "consent-1".to_owned(),
                receipt: Some("{}".to_owned()),
                validity_period: None,
                reason: "receipt corrected".to_owned(),
                action_by: None,
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    service
        .revoke_consent(&org(), "consent-1", None, "customer revoked")
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(store.shared.lock().await.locked, vec!["consent-1"; 3]);
}

#[tokio::test]
async fn search_filters_by_user_and_status() {
    let (service, _) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;
    seed(&service, "consent-2", ConsentStatus::Authorised, &[Some("psu-2")]).await;
    seed(&service, "consent-3", ConsentStatus::Rejected, &[Some("psu-1")]).await;

    let found = service
        .search_detailed_consents(
            &org(),
            &ConsentSearchFilter {
                user_ids: vec!["psu-1".to_owned()],
                statuses: vec![ConsentStatus::Authorised],
                ..ConsentSearchFilter::default()
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].consent_id(), "consent-1");
}

#[tokio::test]
async fn delete_consent_keeps_audit_trail() {
    let (service, store) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;

    service
        .delete_consent(&org(), "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!());

    let state = store.org(&org()).await;
    assert!(state.consents.is_empty());
    assert!(state.authorizations.is_empty());
    assert_eq!(state.audit_records.len(), 1);
    assert!(matches!(
        service.delete_consent(&org(), "consent-1").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn authorization_resources_follow_consent_state() {
    let (service, _) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;

    let created = service
        .create_consent_authorization(&org(), "consent-1", authorization(None))
        .await
        .unwrap_or_else(|_| unreachable!());
    let updated = service
        .update_authorization_resource(
            &org(),
            created.authorization_id.as_str(),
            AuthorizationUpdate {
                authorization_status: Some("Authorised".to_owned()),
                user_id: Some("psu-2".to_owned()),
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(updated.user_id.as_deref(), Some("psu-2"));
    assert_eq!(updated.authorization_status, "Authorised");

    let by_user = service
        .search_authorizations(&org(), Some("consent-1"), Some("psu-2"))
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(by_user, vec![updated.clone()]);

    service
        .delete_authorization_resource(&org(), created.authorization_id.as_str())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(matches!(
        service
            .get_authorization_resource(&org(), created.authorization_id.as_str())
            .await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn authorization_cannot_be_added_to_revoked_consent() {
    let (service, _) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;
    service
        .revoke_consent(&org(), "consent-1", None, "customer revoked")
        .await
        .unwrap_or_else(|_| unreachable!());

    let result = service
        .create_consent_authorization(&org(), "consent-1", authorization(Some("psu-1")))
        .await;

    assert!(matches!(
        result,
        Err(AppError::Conflict(ConflictKind::AlreadyRevoked { .. }))
    ));
}

#[tokio::test]
async fn empty_authorization_update_is_rejected() {
    let (service, _) = harness();

    let result = service
        .update_authorization_resource(&org(), "auth-1", AuthorizationUpdate::default())
        .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn attributes_are_stored_queried_and_deleted() {
    let (service, _) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;
    seed(&service, "consent-2", ConsentStatus::Authorised, &[Some("psu-1")]).await;
    for (consent_id, channel) in [("consent-1", "mobile"), ("consent-2", "web")] {
        service
            .store_consent_attributes(
                &org(),
                consent_id,
                BTreeMap::from([
                    ("channel".to_owned(), channel.to_owned()),
                    ("limit".to_owned(), "100".to_owned()),
                ]),
            )
            .await
            .unwrap_or_else(|_| unreachable!());
    }

    let by_name = service
        .get_consent_attributes_by_name(&org(), "channel")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(by_name.get("consent-2").map(String::as_str), Some("web"));

    let ids = service
        .get_consent_ids_by_attribute(&org(), "channel", "mobile")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(ids, vec!["consent-1".to_owned()]);

    service
        .update_consent_attributes(
            &org(),
            "consent-1",
            BTreeMap::from([("limit".to_owned(), "250".to_owned())]),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    service
        .delete_consent_attributes(&org(), "consent-1", &["channel".to_owned()])
        .await
        .unwrap_or_else(|_| unreachable!());

    let remaining = service
        .get_consent_attributes(&org(), "consent-1", None)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(
        remaining,
        BTreeMap::from([("limit".to_owned(), "250".to_owned())])
    );
}

#[tokio::test]
async fn attribute_validation_rejects_bad_input() {
    let (service, _) = harness();

    let empty = service
        .store_consent_attributes(&org(), "consent-1", BTreeMap::new())
        .await;
    let blank_key = service
        .store_consent_attributes(
            &org(),
            "consent-1",
            BTreeMap::from([(" ".to_owned(), "value".to_owned())]),
        )
        .await;
    let unknown_consent = service
        .get_consent_attributes(&org(), "missing", None)
        .await;

    assert!(matches!(empty, Err(AppError::BadRequest(_))));
    assert!(matches!(blank_key, Err(AppError::BadRequest(_))));
    assert!(matches!(unknown_consent, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn audit_records_are_searchable_and_fetchable() {
    let (service, _) = harness();
    seed(
        &service,
        "consent-1",
        ConsentStatus::AwaitingAuthorisation,
        &[Some("psu-1")],
    )
    .await;
    service
        .update_consent_status(
            &org(),
            "consent-1",
            ConsentStatus::Authorised,
            "customer approved",
            None,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    let all = service
        .get_consent_status_audit_records(&org(), &["consent-1".to_owned()], None, None)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].current_status, ConsentStatus::Authorised);

    let authorised = service
        .search_consent_status_audit_records(
            &org(),
            &AuditRecordQuery {
                status: Some(ConsentStatus::Authorised),
                action_by: Some("psu-1".to_owned()),
                ..AuditRecordQuery::default()
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(authorised.len(), 1);

    let fetched = service
        .get_consent_status_audit_record(&org(), authorised[0].status_audit_id.as_str())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(fetched, authorised[0]);

    let paged = service
        .get_consent_status_audit_records(&org(), &["consent-1".to_owned()], Some(1), Some(1))
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(paged.len(), 1);
    assert!(paged[0].previous_status.is_none());
}

#[tokio::test]
async fn unknown_audit_record_is_a_bad_request() {
    let (service, _) = harness();

    let result = service
        .get_consent_status_audit_record(&org(), "missing")
        .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn amendment_history_replays_prior_states() {
    let (service, store) = harness();
    seed(
        &service,
        "consent-1",
        ConsentStatus::AwaitingAuthorisation,
        &[Some("psu-1")],
    )
    .await;
    service
        .update_consent_status(
            &org(),
            "consent-1",
            ConsentStatus::Authorised,
            "customer approved",
            None,
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    service
        .amend_consent_data(
            &org(),
            AmendConsentData {
                consent_id: "consent-1".to_owned(),
                receipt: Some(r#"{"Data":{"Permissions":["ReadBalances"]}}"#.to_owned()),
                validity_period: None,
                reason: "receipt corrected".to_owned(),
                action_by: Some("bank-agent".to_owned()),
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    let audit_id_for = |reason: &str, records: &[obconsent_domain::ConsentStatusAuditRecord]| {
        records
            .iter()
            .find(|record| record.reason.as_deref() == Some(reason))
            .map(|record| record.status_audit_id.clone())
            .unwrap_or_else(|| unreachable!())
    };
    let records = store.org(&org()).await.audit_records;
    let approved_id = audit_id_for("customer approved", &records);
    let amended_id = audit_id_for("receipt corrected", &records);

    let history = service
        .get_consent_amendment_history_data(&org(), &[], "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(history.len(), 2);

    let before_amendment = history[&amended_id]
        .detailed_consent
        .as_ref()
        .unwrap_or_else(|| unreachable!());
    assert_eq!(
        before_amendment.consent.receipt.as_deref(),
        Some(r#"{"Data":{"Permissions":["ReadAccountsBasic"]}}"#)
    );
    assert_eq!(
        before_amendment.consent.current_status,
        ConsentStatus::Authorised
    );

    let before_approval = history[&approved_id]
        .detailed_consent
        .as_ref()
        .unwrap_or_else(|| unreachable!());
    assert_eq!(
        before_approval.consent.current_status,
        ConsentStatus::AwaitingAuthorisation
    );

    let only_amendment = service
        .get_consent_amendment_history_data(&org(), std::slice::from_ref(&amended_id), "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(only_amendment.keys().collect::<Vec<_>>(), vec![&amended_id]);
}

#[tokio::test]
async fn amendment_without_changes_is_rejected() {
    let (service, _) = harness();

    let result = service
        .amend_consent_data(
            &org(),
            AmendConsentData {
                consent_id: "consent-1".to_owned(),
                receipt: None,
                validity_period: None,
                reason: "nothing".to_owned(),
                action_by: None,
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn explicit_amendment_history_is_validated_and_stored() {
    let (service, store) = harness();
    let created = seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;
    let mut previous = created.clone();
    previous
        .attributes
        .insert("limit".to_owned(), "100".to_owned());
    let history = ConsentHistoryResource {
        history_id: Some("history-1".to_owned()),
        consent_id: "consent-1".to_owned(),
        status_audit_id: "audit-1".to_owned(),
        timestamp: start().timestamp(),
        reason: "limit removed".to_owned(),
        detailed_consent: Some(previous),
        entries: Vec::new(),
    };

    let zero_timestamp = service
        .store_consent_amendment_history(
            &org(),
            "audit-1",
            ConsentHistoryResource {
                timestamp: 0,
                ..history.clone()
            },
            None,
        )
        .await;
    assert!(matches!(zero_timestamp, Err(AppError::BadRequest(_))));

    let stored = service
        .store_consent_amendment_history(&org(), "audit-1", history, None)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(stored);
    let entries = store.org(&org()).await.history;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data_type, ChangedDataType::ConsentAttributes);
    assert_eq!(entries[0].history_id, "history-1");
}

#[tokio::test]
async fn expiry_sweep_expires_only_lapsed_consents() {
    let (service, _) = harness();
    for (consent_id, validity_period) in [
        ("lapsed", start() - Duration::days(1)),
        ("current", start() + Duration::days(1)),
    ] {
        let mut input = consent_input(consent_id, ConsentStatus::Authorised);
        input.validity_period = Some(validity_period);
        service
            .create_consent(&org(), input, vec![authorization(Some("psu-1"))])
            .await
            .unwrap_or_else(|_| unreachable!());
    }

    let expired = service
        .expire_lapsed_consents(&org(), &ExpirySweep::default())
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(expired, vec!["lapsed".to_owned()]);
    let lapsed = service
        .get_consent(&org(), "lapsed", false)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(lapsed.consent.current_status, ConsentStatus::Expired);
    let current = service
        .get_consent(&org(), "current", false)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(current.consent.current_status, ConsentStatus::Authorised);
}

#[tokio::test]
async fn organizations_are_isolated() {
    let (service, _) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;
    let other = OrgId::new("other-org").unwrap_or_else(|_| unreachable!());

    let result = service.get_detailed_consent(&other, "consent-1").await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

fn accounts(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(account_id, permissions)| {
            (
                (*account_id).to_owned(),
                permissions.iter().map(|permission| (*permission).to_owned()).collect(),
            )
        })
        .collect()
}

fn active_accounts(detailed: &DetailedConsentResource) -> Vec<(String, String)> {
    let mut active: Vec<(String, String)> = detailed
        .mapping_resources
        .iter()
        .filter(|mapping| mapping.mapping_status == MappingStatus::Active)
        .map(|mapping| (mapping.account_id.clone(), mapping.authorization_id.clone()))
        .collect();
    active.sort();
    active.dedup();
    active
}

/// Seeds an authorised consent with `acc-1` and `acc-2` bound for `psu-1`.
async fn seed_bound(service: &ConsentService, consent_id: &str) -> DetailedConsentResource {
    let created = seed(
        service,
        consent_id,
        ConsentStatus::AwaitingAuthorisation,
        &[Some("psu-1")],
    )
    .await;
    service
        .bind_accounts_to_consent(
            &org(),
            AccountBinding {
                consent_id: consent_id.to_owned(),
                authorization_id: created.authorization_resources[0].authorization_id.clone(),
                user_id: "psu-1".to_owned(),
                authorization_status: "Authorised".to_owned(),
                new_consent_status: ConsentStatus::Authorised,
                accounts: accounts(&[
                    ("acc-1", &["ReadAccountsBasic"]),
                    ("acc-2", &["ReadAccountsBasic", "ReadBalances"]),
                ]),
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn create_consent_stores_initial_attributes() {
    let (service, store) = harness();
    let mut input = consent_input("consent-1", ConsentStatus::AwaitingAuthorisation);
    input.attributes = BTreeMap::from([("channel".to_owned(), "mobile".to_owned())]);

    let created = service
        .create_consent(&org(), input, vec![authorization(Some("psu-1"))])
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(created.attributes["channel"], "mobile");
    assert_eq!(
        store.org(&org()).await.attributes["consent-1"]["channel"],
        "mobile"
    );

    let mut blank_key = consent_input("consent-2", ConsentStatus::AwaitingAuthorisation);
    blank_key.attributes = BTreeMap::from([(" ".to_owned(), "x".to_owned())]);
    let rejected = service.create_consent(&org(), blank_key, Vec::new()).await;
    assert!(matches!(rejected, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn reauthorizing_under_an_existing_authorization_diffs_accounts() {
    let (service, store) = harness();
    let bound = seed_bound(&service, "consent-1").await;
    let authorization_id = bound.authorization_resources[0].authorization_id.clone();
    let mappings_before = bound.mapping_resources.len();

    let after = service
        .reauthorize_consent(
            &org(),
            Reauthorization {
                consent_id: "consent-1".to_owned(),
                user_id: "psu-1".to_owned(),
                accounts: accounts(&[("acc-2", &["ReadAccountsBasic"]), ("acc-3", &["ReadBalances"])]),
                new_consent_status: ConsentStatus::Authorised,
                target: ReauthorizationTarget::Existing {
                    authorization_id: authorization_id.clone(),
                },
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(
        active_accounts(&after),
        vec![
            ("acc-2".to_owned(), authorization_id.clone()),
            ("acc-3".to_owned(), authorization_id.clone()),
        ]
    );
    assert_eq!(after.mapping_resources.len(), mappings_before + 1);

    let stored = service
        .get_detailed_consent(&org(), "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(active_accounts(&stored), active_accounts(&after));

    let records = store.org(&org()).await.audit_records;
    let reauthorized: Vec<_> = records
        .iter()
        .filter(|record| record.reason.as_deref() == Some("Consent re-authorized"))
        .collect();
    assert_eq!(reauthorized.len(), 1);
    assert_eq!(reauthorized[0].action_by.as_deref(), Some("psu-1"));
}

#[tokio::test]
async fn reauthorizing_with_a_new_authorization_retires_the_old_one() {
    let (service, _) = harness();
    let bound = seed_bound(&service, "consent-1").await;
    let old_authorization_id = bound.authorization_resources[0].authorization_id.clone();

    let after = service
        .reauthorize_consent(
            &org(),
            Reauthorization {
                consent_id: "consent-1".to_owned(),
                user_id: "psu-1".to_owned(),
                accounts: accounts(&[("acc-1", &["ReadAccountsBasic"])]),
                new_consent_status: ConsentStatus::Authorised,
                target: ReauthorizationTarget::NewResource {
                    existing_authorization_status: "Revoked".to_owned(),
                    authorization_status: "Authorised".to_owned(),
                    authorization_type: AuthorizationType::Authorization,
                },
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(after.authorization_resources.len(), 2);
    let old = after
        .authorization_resources
        .iter()
        .find(|authorization| authorization.authorization_id == old_authorization_id)
        .unwrap_or_else(|| unreachable!());
    assert_eq!(old.authorization_status, "Revoked");
    let new_authorization_id = after
        .authorization_resources
        .iter()
        .find(|authorization| authorization.authorization_id != old_authorization_id)
        .map(|authorization| authorization.authorization_id.clone())
        .unwrap_or_else(|| unreachable!());
    assert_eq!(
        active_accounts(&after),
        vec![("acc-1".to_owned(), new_authorization_id)]
    );

    let stored = service
        .get_detailed_consent(&org(), "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(stored.authorization_resources.len(), 2);
    assert_eq!(active_accounts(&stored), active_accounts(&after));
}

#[tokio::test]
async fn reauthorization_validates_input_and_ownership() {
    let (service, store) = harness();
    seed_bound(&service, "consent-1").await;
    let request = |granted, authorization_id: &str| Reauthorization {
        consent_id: "consent-1".to_owned(),
        user_id: "psu-1".to_owned(),
        accounts: granted,
        new_consent_status: ConsentStatus::Authorised,
        target: ReauthorizationTarget::Existing {
            authorization_id: authorization_id.to_owned(),
        },
    };

    let empty_permissions = service
        .reauthorize_consent(&org(), request(accounts(&[("acc-1", &[])]), "id-0001"))
        .await;
    assert!(matches!(empty_permissions, Err(AppError::BadRequest(_))));

    let foreign = service
        .reauthorize_consent(
            &org(),
            request(accounts(&[("acc-1", &["ReadAccountsBasic"])]), "unknown"),
        )
        .await;
    assert!(matches!(foreign, Err(AppError::BadRequest(_))));
    assert!(store.shared.lock().await.rollbacks >= 1);
}

#[tokio::test]
async fn detailed_amendment_updates_everything_under_one_history_record() {
    let (service, store) = harness();
    let bound = seed_bound(&service, "consent-1").await;
    let authorization_id = bound.authorization_resources[0].authorization_id.clone();
    let history_before = store.org(&org()).await.history.len();

    let after = service
        .amend_detailed_consent(
            &org(),
            DetailedAmendment {
                consent_id: "consent-1".to_owned(),
                receipt: Some(r#"{"Data":{"Permissions":["ReadBalances"]}}"#.to_owned()),
                validity_period: None,
                authorization_id: authorization_id.clone(),
                accounts: accounts(&[("acc-1", &["ReadAccountsBasic"]), ("acc-9", &["ReadBalances"])]),
                new_consent_status: ConsentStatus::Authorised,
                attributes: BTreeMap::from([("limit".to_owned(), "500".to_owned())]),
                action_by: "psu-1".to_owned(),
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(
        after.consent.receipt.as_deref(),
        Some(r#"{"Data":{"Permissions":["ReadBalances"]}}"#)
    );
    assert_eq!(after.attributes["limit"], "500");
    assert_eq!(
        active_accounts(&after),
        vec![
            ("acc-1".to_owned(), authorization_id.clone()),
            ("acc-9".to_owned(), authorization_id.clone()),
        ]
    );

    let state = store.org(&org()).await;
    let amended: Vec<_> = state
        .audit_records
        .iter()
        .filter(|record| record.reason.as_deref() == Some("Consent amended"))
        .collect();
    assert_eq!(amended.len(), 1);
    let new_rows = &state.history[history_before..];
    assert!(!new_rows.is_empty());
    assert!(
        new_rows
            .iter()
            .all(|entry| entry.status_audit_id == amended[0].status_audit_id)
    );
    let history_ids: std::collections::BTreeSet<_> =
        new_rows.iter().map(|entry| entry.history_id.as_str()).collect();
    assert_eq!(history_ids.len(), 1);

    let snapshots = service
        .get_consent_amendment_history_data(&org(), &[], "consent-1")
        .await
        .unwrap_or_else(|_| unreachable!());
    let previous = snapshots[&amended[0].status_audit_id]
        .detailed_consent
        .as_ref()
        .unwrap_or_else(|| unreachable!());
    assert!(previous.attributes.is_empty());
    assert_eq!(
        active_accounts(previous),
        vec![
            ("acc-1".to_owned(), authorization_id.clone()),
            ("acc-2".to_owned(), authorization_id),
        ]
    );
}

#[tokio::test]
async fn detailed_amendment_needs_receipt_or_validity_period() {
    let (service, _) = harness();
    seed_bound(&service, "consent-1").await;

    let result = service
        .amend_detailed_consent(
            &org(),
            DetailedAmendment {
                consent_id: "consent-1".to_owned(),
                receipt: None,
                validity_period: None,
                authorization_id: "id-0001".to_owned(),
                accounts: accounts(&[("acc-1", &["ReadAccountsBasic"])]),
                new_consent_status: ConsentStatus::Authorised,
                attributes: BTreeMap::new(),
                action_by: "psu-1".to_owned(),
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn exclusive_consent_supersedes_the_customers_authorised_consents() {
    let (service, store) = harness();
    seed_bound(&service, "consent-1").await;
    seed(&service, "other-user", ConsentStatus::Authorised, &[Some("psu-2")]).await;
    seed(&service, "awaiting", ConsentStatus::AwaitingAuthorisation, &[Some("psu-1")]).await;

    let created = service
        .create_exclusive_consent(
            &org(),
            consent_input("consent-new", ConsentStatus::AwaitingAuthorisation),
            vec![authorization(Some("psu-1"))],
            ExclusiveConsent {
                user_id: "psu-1".to_owned(),
                applicable_status: ConsentStatus::Authorised,
                superseded_status: ConsentStatus::Revoked,
            },
        )
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(created.consent_id(), "consent-new");
    let state = store.org(&org()).await;
    assert_eq!(
        state.consents["consent-1"].current_status,
        ConsentStatus::Revoked
    );
    assert_eq!(
        state.consents["other-user"].current_status,
        ConsentStatus::Authorised
    );
    assert_eq!(
        state.consents["awaiting"].current_status,
        ConsentStatus::AwaitingAuthorisation
    );
    assert!(
        state
            .mappings
            .values()
            .filter(|(owner, _)| owner == "consent-1")
            .all(|(_, mapping)| mapping.mapping_status == MappingStatus::Inactive)
    );
    assert!(state.consents.contains_key("consent-new"));
}

#[tokio::test]
async fn failed_exclusive_creation_keeps_existing_consents() {
    let (service, store) = harness();
    seed(&service, "consent-1", ConsentStatus::Authorised, &[Some("psu-1")]).await;

    let duplicate = service
        .create_exclusive_consent(
            &org(),
            consent_input("consent-1", ConsentStatus::AwaitingAuthorisation),
            vec![authorization(Some("psu-1"))],
            ExclusiveConsent {
                user_id: "psu-1".to_owned(),
                applicable_status: ConsentStatus::Authorised,
                superseded_status: ConsentStatus::Revoked,
            },
        )
        .await;

    assert!(duplicate.is_err());
    assert_eq!(
        store.org(&org()).await.consents["consent-1"].current_status,
        ConsentStatus::Authorised
    );
}

#[tokio::test]
async fn applicable_consents_of_a_customer_are_revoked_together() {
    let (service, store) = harness();
    seed_bound(&service, "consent-1").await;
    seed(&service, "consent-2", ConsentStatus::Authorised, &[Some("psu-1")]).await;
    seed(&service, "consent-3", ConsentStatus::Authorised, &[Some("psu-2")]).await;

    let request = ApplicableRevocation {
        client_id: "client-1".to_owned(),
        user_id: "psu-1".to_owned(),
        consent_type: ConsentType::Accounts,
        applicable_status: ConsentStatus::Authorised,
        revoked_status: ConsentStatus::Revoked,
    };
    let mut revoked = service
        .revoke_existing_applicable_consents(&org(), request.clone())
        .await
        .unwrap_or_else(|_| unreachable!());
    revoked.sort();

    assert_eq!(revoked, vec!["consent-1".to_owned(), "consent-2".to_owned()]);
    let state = store.org(&org()).await;
    assert_eq!(
        state.consents["consent-3"].current_status,
        ConsentStatus::Authorised
    );
    assert!(
        state
            .audit_records
            .iter()
            .filter(|record| record.current_status == ConsentStatus::Revoked)
            .all(|record| record.action_by.as_deref() == Some("psu-1"))
    );

    let again = service
        .revoke_existing_applicable_consents(&org(), request)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(again.is_empty());
}
