//! Test helper module for billing-ledger integration tests.
//!
//! `TestApp` wraps a `LedgerService` over the in-memory store with one
//! onboarded firm. `PgTestApp` does the same against PostgreSQL in a
//! throwaway schema and is only available when `TEST_DATABASE_URL` is set.

#![allow(dead_code)]

use billing_ledger::models::{
    ClientType, CreateBillingRate, CreateClient, CreateInvoice, CreateLawFirm, CreateTimeEntry,
    EntryType, InvoiceType, LawFirm,
};
use billing_ledger::services::{init_metrics, Database, LedgerService, LedgerStore, MemoryStore};
use billing_ledger::tenancy::TenantContext;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use service_core::retry::RetryConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Once;
use uuid::Uuid;

pub const TEST_FIRM_CNPJ: &str = "11.222.333/0001-81";
pub const OTHER_FIRM_CNPJ: &str = "11.444.777/0001-61";

static TRACING: Once = Once::new();

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Install a test subscriber once per binary. Output is captured by the
/// test harness unless `--nocapture` is passed.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// UTC instant on 2024-03-04 (a Monday).
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    on(4, hour, minute)
}

/// UTC instant on the given day of March 2024.
pub fn on(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
}

pub fn test_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

pub fn firm_input(cnpj: &str) -> CreateLawFirm {
    CreateLawFirm {
        legal_name: "Silva & Souza Advogados".to_string(),
        cnpj: cnpj.to_string(),
        default_hourly_rate: None,
    }
}

pub fn company_client() -> CreateClient {
    CreateClient {
        name: "Construtora Horizonte Ltda".to_string(),
        client_type: ClientType::Company,
        cpf: None,
        cnpj: Some("45997418000153".to_string()),
        email: Some("financeiro@horizonte.com.br".to_string()),
    }
}

pub fn tenant_rate(hourly_rate: Decimal) -> CreateBillingRate {
    CreateBillingRate {
        user_id: None,
        service_type: None,
        hourly_rate,
        effective_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        effective_until: None,
    }
}

pub fn case_work(user_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> CreateTimeEntry {
    CreateTimeEntry::new(user_id, EntryType::CaseWork, start, end)
}

/// Ledger plus one onboarded firm, its context and one client.
pub struct TestApp<S: LedgerStore> {
    pub ledger: LedgerService<S>,
    pub firm: LawFirm,
    pub ctx: TenantContext,
    pub client_id: Uuid,
}

impl TestApp<MemoryStore> {
    /// Spawn a ledger over a fresh in-memory store.
    pub async fn spawn() -> Self {
        init_test_tracing();
        init_metrics();
        Self::onboard(LedgerService::with_retry(
            MemoryStore::new(),
            RetryConfig::no_retry(),
        ))
        .await
    }
}

impl<S: LedgerStore> TestApp<S> {
    async fn onboard(ledger: LedgerService<S>) -> Self {
        let firm = ledger
            .create_law_firm(&firm_input(TEST_FIRM_CNPJ))
            .await
            .expect("Failed to create law firm");
        let ctx = TenantContext::new(firm.tenant_id, Uuid::new_v4());
        let client = ledger
            .create_client(&ctx, &company_client())
            .await
            .expect("Failed to create client");

        Self {
            ledger,
            firm,
            ctx,
            client_id: client.client_id,
        }
    }

    /// Onboard a second, unrelated firm on the same store.
    pub async fn other_tenant(&self) -> TenantContext {
        let firm = self
            .ledger
            .create_law_firm(&firm_input(OTHER_FIRM_CNPJ))
            .await
            .expect("Failed to create second law firm");
        TenantContext::new(firm.tenant_id, Uuid::new_v4())
    }

    /// Another user of the same firm.
    pub fn colleague(&self) -> TenantContext {
        TenantContext::new(self.ctx.tenant_id, Uuid::new_v4())
    }

    pub async fn draft_invoice(&self) -> billing_ledger::models::Invoice {
        self.ledger
            .create_invoice(
                &self.ctx,
                &CreateInvoice::new(self.client_id, InvoiceType::TimeBased),
            )
            .await
            .expect("Failed to create invoice")
    }
}

/// Get the database URL for PostgreSQL tests, if configured.
pub fn get_test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// Generate a unique schema name for test isolation.
fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_ledger_{}_{}", std::process::id(), counter)
}

pub struct PgTestApp {
    pub app: TestApp<Database>,
    base_url: String,
    schema_name: String,
}

impl PgTestApp {
    /// Spawn a ledger over PostgreSQL in its own schema. Returns `None`
    /// when no test database is configured.
    pub async fn spawn() -> Option<Self> {
        let base_url = get_test_database_url()?;
        init_test_tracing();
        init_metrics();

        let schema_name = unique_schema_name();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");
        pool.close().await;

        // Use ? or & depending on whether URL already has query parameters
        let separator = if base_url.contains('?') { "&" } else { "?" };
        let db_url_with_schema = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );

        let db = Database::new(&db_url_with_schema, 8, 1)
            .await
            .expect("Failed to connect to test schema");
        db.run_migrations()
            .await
            .expect("Failed to run migrations");

        let app = TestApp::onboard(LedgerService::new(db)).await;
        Some(Self {
            app,
            base_url,
            schema_name,
        })
    }

    /// Drop the test schema.
    pub async fn cleanup(self) {
        self.app.ledger.store().pool().close().await;

        if let Ok(pool) = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
        {
            sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema_name))
                .execute(&pool)
                .await
                .ok();
            pool.close().await;
        }
    }
}
