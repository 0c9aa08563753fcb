//! Consent expiry worker runtime.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use obconsent_application::{ConsentService, ExpirySweep};
use obconsent_core::{AppError, AppResult, DEFAULT_ORG, OrgId};
use obconsent_domain::ConsentStatus;
use obconsent_infrastructure::{
    PostgresConsentStore, SystemClock, UuidIdGenerator, run_migrations,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
struct WorkerConfig {
    database_url: String,
    orgs: Vec<OrgId>,
    sweep: ExpirySweep,
    interval_seconds: u64,
    max_connections: u32,
    run_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str(), config.max_connections).await?;
    if config.run_migrations {
        run_migrations(&pool).await?;
    }
    let consent_service = build_consent_service(pool);

    info!(
        orgs = config.orgs.len(),
        expired_status = %config.sweep.expired_status,
        interval_seconds = config.interval_seconds,
        "obconsent-worker started"
    );

    loop {
        for org in &config.orgs {
            match consent_service
                .expire_lapsed_consents(org, &config.sweep)
                .await
            {
                Ok(expired) if expired.is_empty() => {
                    debug!(org_id = %org, "no lapsed consents to expire");
                }
                Ok(expired) => {
                    info!(
                        org_id = %org,
                        expired_count = expired.len(),
                        "expired lapsed consents"
                    );
                }
                Err(error) => {
                    warn!(
                        org_id = %org,
                        error = %error.log_safe_message(),
                        "consent expiry sweep failed"
                    );
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(config.interval_seconds)).await;
    }
}

async fn connect_pool(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_consent_service(pool: PgPool) -> ConsentService {
    ConsentService::new(
        Arc::new(PostgresConsentStore::new(pool)),
        Arc::new(SystemClock),
        Arc::new(UuidIdGenerator),
    )
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| AppError::BadRequest("DATABASE_URL is required".to_owned()))?;
        let orgs = split_list(lookup("CONSENT_EXPIRY_ORGS"), DEFAULT_ORG)
            .into_iter()
            .map(OrgId::new)
            .collect::<AppResult<Vec<_>>>()?;
        let eligible_statuses = split_list(lookup("CONSENT_EXPIRY_ELIGIBLE_STATUSES"), "Authorised")
            .iter()
            .map(|value| ConsentStatus::parse(value))
            .collect();
        let expired_status = lookup("CONSENT_EXPIRED_STATUS")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map_or(ConsentStatus::Expired, |value| {
                ConsentStatus::parse(value.as_str())
            });
        let interval_seconds = parse_value(
            "CONSENT_EXPIRY_INTERVAL_SECONDS",
            lookup("CONSENT_EXPIRY_INTERVAL_SECONDS"),
            300_u64,
        )?;
        let max_connections = parse_value(
            "DATABASE_MAX_CONNECTIONS",
            lookup("DATABASE_MAX_CONNECTIONS"),
            5_u32,
        )?;
        let run_migrations = parse_value("RUN_MIGRATIONS", lookup("RUN_MIGRATIONS"), false)?;

        if interval_seconds == 0 {
            return Err(AppError::BadRequest(
                "CONSENT_EXPIRY_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if max_connections == 0 {
            return Err(AppError::BadRequest(
                "DATABASE_MAX_CONNECTIONS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            orgs,
            sweep: ExpirySweep {
                eligible_statuses,
                expired_status,
            },
            interval_seconds,
            max_connections,
            run_migrations,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn split_list(value: Option<String>, default: &str) -> Vec<String> {
    let items: Vec<String> = value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect();

    if items.is_empty() {
        vec![default.to_owned()]
    } else {
        items
    }
}

fn parse_value<T>(name: &str, value: Option<String>, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => value.trim().parse::<T>().map_err(|error| {
            AppError::BadRequest(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}
