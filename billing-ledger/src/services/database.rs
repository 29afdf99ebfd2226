//! PostgreSQL ledger store.
//!
//! Every mutation runs in one transaction that first sets `app.tenant_id`
//! and `app.user_id` for row-level security. Serialization points:
//! `SELECT ... FOR UPDATE` on the invoice row, a transaction-scoped advisory
//! lock per `(tenant, user)` for time entries, and an upserted counter row
//! per `(tenant, prefix)` for invoice numbers.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::engine::numbering::{claimed_sequence, format_invoice_number, prefix_for};
use crate::engine::rates::windows_overlap;
use crate::engine::summary::{affected_dates, summarize};
use crate::engine::time_entry::{
    apply_update, check_overlap, check_transition, choose_rate, ensure_deletable, new_entry, price,
};
use crate::engine::totals;
use crate::models::{
    BillingRate, Client, CreateBillingRate, CreateClient, CreateInvoice, CreateLawFirm,
    CreateTimeEntry, CreateVendor, DailyTimeSummary, EntryStatus, Invoice, InvoiceType, LawFirm,
    LineItem, Payment, RecordPayment, TimeEntry, UpdateTimeEntry, UpsertLineItem, Vendor,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::LedgerStore;
use crate::tenancy::{ensure_active, scoped, TenantContext};

macro_rules! law_firm_columns {
    () => {
        "tenant_id, legal_name, cnpj, default_hourly_rate, is_active, created_utc"
    };
}

macro_rules! client_columns {
    () => {
        "client_id, tenant_id, name, client_type, cpf, cnpj, email, created_utc"
    };
}

macro_rules! vendor_columns {
    () => {
        "vendor_id, tenant_id, name, cnpj, created_utc"
    };
}

macro_rules! billing_rate_columns {
    () => {
        "billing_rate_id, tenant_id, user_id, service_type, hourly_rate, effective_from, \
         effective_until, is_active, created_utc"
    };
}

macro_rules! time_entry_columns {
    () => {
        "time_entry_id, tenant_id, user_id, matter_id, subscription_id, entry_type, service_type, \
         description, entry_date, start_time, end_time, duration_minutes, break_minutes, \
         effective_minutes, is_billable, billable_rate, applied_rate, billable_amount, \
         entry_status, created_utc, updated_utc"
    };
}

macro_rules! summary_columns {
    () => {
        "tenant_id, user_id, summary_date, total_minutes, billable_minutes, non_billable_minutes, \
         case_work_minutes, subscription_work_minutes, administrative_minutes, other_minutes, \
         total_billable_amount, total_entries, updated_utc"
    };
}

macro_rules! invoice_columns {
    () => {
        "invoice_id, tenant_id, client_id, invoice_number, invoice_type, invoice_status, currency, \
         issue_date, due_date, subtotal, tax_amount, discount_amount, total_amount, amount_paid, \
         notes, created_utc, updated_utc, sent_utc, cancelled_utc"
    };
}

macro_rules! line_item_columns {
    () => {
        "line_item_id, invoice_id, tenant_id, description, quantity, unit_price, line_total, \
         tax_amount, time_entry_id, sort_order, created_utc, updated_utc"
    };
}

macro_rules! payment_columns {
    () => {
        "payment_id, invoice_id, tenant_id, amount, method, reference, paid_on, created_utc"
    };
}

/// Map a driver error. Serialization failures and deadlocks become
/// retryable conflicts.
fn db_error(operation: &str, e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db_err) = e {
        if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
            return AppError::Conflict(anyhow::anyhow!("{} lost a write race: {}", operation, e));
        }
    }
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", operation, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-ledger"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Open a transaction carrying the caller's tenant and user.
    async fn begin(&self, ctx: &TenantContext) -> Result<Transaction<'static, Postgres>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        sqlx::query("SELECT set_config('app.tenant_id', $1, true), set_config('app.user_id', $2, true)")
            .bind(ctx.tenant_id.to_string())
            .bind(ctx.user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("set tenant context", e))?;

        Ok(tx)
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), AppError> {
    tx.commit()
        .await
        .map_err(|e| db_error("commit transaction", e))
}

// -----------------------------------------------------------------------------
// Row helpers. All take an open connection so they compose inside one
// transaction.
// -----------------------------------------------------------------------------

async fn fetch_law_firm(
    conn: &mut PgConnection,
    tenant_id: Uuid,
) -> Result<Option<LawFirm>, AppError> {
    sqlx::query_as::<_, LawFirm>(concat!(
        "SELECT ",
        law_firm_columns!(),
        " FROM law_firms WHERE tenant_id = $1"
    ))
    .bind(tenant_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| db_error("get law firm", e))
}

async fn active_firm(conn: &mut PgConnection, ctx: &TenantContext) -> Result<LawFirm, AppError> {
    let firm = scoped(ctx, fetch_law_firm(conn, ctx.tenant_id).await?, "Law firm")?;
    ensure_active(&firm)?;
    Ok(firm)
}

async fn fetch_client(
    conn: &mut PgConnection,
    client_id: Uuid,
) -> Result<Option<Client>, AppError> {
    sqlx::query_as::<_, Client>(concat!(
        "SELECT ",
        client_columns!(),
        " FROM clients WHERE client_id = $1"
    ))
    .bind(client_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| db_error("get client", e))
}

async fn rates_covering(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<BillingRate>, AppError> {
    sqlx::query_as::<_, BillingRate>(concat!(
        "SELECT ",
        billing_rate_columns!(),
        " FROM billing_rates
          WHERE tenant_id = $1
            AND is_active = TRUE
            AND effective_from <= $2
            AND (effective_until IS NULL OR effective_until > $2)"
    ))
    .bind(tenant_id)
    .bind(date)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| db_error("load billing rates", e))
}

async fn lock_user(conn: &mut PgConnection, tenant_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("time_entries:{}:{}", tenant_id, user_id))
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("lock user time entries", e))?;
    Ok(())
}

async fn fetch_time_entry(
    conn: &mut PgConnection,
    time_entry_id: Uuid,
) -> Result<Option<TimeEntry>, AppError> {
    sqlx::query_as::<_, TimeEntry>(concat!(
        "SELECT ",
        time_entry_columns!(),
        " FROM time_entries WHERE time_entry_id = $1"
    ))
    .bind(time_entry_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| db_error("get time entry", e))
}

/// Load an entry, take its user lock, then load it again under the lock.
async fn locked_time_entry(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    time_entry_id: Uuid,
) -> Result<TimeEntry, AppError> {
    let entry = scoped(ctx, fetch_time_entry(conn, time_entry_id).await?, "Time entry")?;
    lock_user(conn, ctx.tenant_id, entry.user_id).await?;
    scoped(ctx, fetch_time_entry(conn, time_entry_id).await?, "Time entry")
}

/// Counted entries of the candidate's user whose range touches it.
async fn overlap_candidates(
    conn: &mut PgConnection,
    candidate: &TimeEntry,
) -> Result<Vec<TimeEntry>, AppError> {
    sqlx::query_as::<_, TimeEntry>(concat!(
        "SELECT ",
        time_entry_columns!(),
        " FROM time_entries
          WHERE tenant_id = $1
            AND user_id = $2
            AND entry_status <> 'rejected'
            AND time_entry_id <> $3
            AND start_time < $4
            AND end_time > $5"
    ))
    .bind(candidate.tenant_id)
    .bind(candidate.user_id)
    .bind(candidate.time_entry_id)
    .bind(candidate.end_time)
    .bind(candidate.start_time)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| db_error("check time entry overlap", e))
}

async fn save_time_entry(conn: &mut PgConnection, entry: &TimeEntry) -> Result<(), AppError> {
    sqlx::query(concat!(
        "INSERT INTO time_entries (",
        time_entry_columns!(),
        ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
        ON CONFLICT (time_entry_id) DO UPDATE SET
            matter_id = EXCLUDED.matter_id,
            subscription_id = EXCLUDED.subscription_id,
            entry_type = EXCLUDED.entry_type,
            service_type = EXCLUDED.service_type,
            description = EXCLUDED.description,
            entry_date = EXCLUDED.entry_date,
            start_time = EXCLUDED.start_time,
            end_time = EXCLUDED.end_time,
            duration_minutes = EXCLUDED.duration_minutes,
            break_minutes = EXCLUDED.break_minutes,
            effective_minutes = EXCLUDED.effective_minutes,
            is_billable = EXCLUDED.is_billable,
            billable_rate = EXCLUDED.billable_rate,
            applied_rate = EXCLUDED.applied_rate,
            billable_amount = EXCLUDED.billable_amount,
            entry_status = EXCLUDED.entry_status,
            updated_utc = EXCLUDED.updated_utc"
    ))
    .bind(entry.time_entry_id)
    .bind(entry.tenant_id)
    .bind(entry.user_id)
    .bind(entry.matter_id)
    .bind(entry.subscription_id)
    .bind(entry.entry_type.as_str())
    .bind(entry.service_type.as_deref())
    .bind(&entry.description)
    .bind(entry.entry_date)
    .bind(entry.start_time)
    .bind(entry.end_time)
    .bind(entry.duration_minutes)
    .bind(entry.break_minutes)
    .bind(entry.effective_minutes)
    .bind(entry.is_billable)
    .bind(entry.billable_rate)
    .bind(entry.applied_rate)
    .bind(entry.billable_amount)
    .bind(entry.entry_status.as_str())
    .bind(entry.created_utc)
    .bind(entry.updated_utc)
    .execute(&mut *conn)
    .await
    .map_err(|e| db_error("save time entry", e))?;
    Ok(())
}

/// Recompute each date's rollup from the stored entries. Caller holds the
/// user lock.
async fn refresh_summaries(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
    dates: &[NaiveDate],
) -> Result<(), AppError> {
    let now = Utc::now();
    for date in dates {
        let entries = sqlx::query_as::<_, TimeEntry>(concat!(
            "SELECT ",
            time_entry_columns!(),
            " FROM time_entries WHERE tenant_id = $1 AND user_id = $2 AND entry_date = $3"
        ))
        .bind(tenant_id)
        .bind(user_id)
        .bind(*date)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error("load day entries", e))?;

        match summarize(tenant_id, user_id, *date, &entries, now) {
            Some(summary) => {
                sqlx::query(concat!(
                    "INSERT INTO daily_time_summaries (",
                    summary_columns!(),
                    ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    ON CONFLICT (tenant_id, user_id, summary_date) DO UPDATE SET
                        total_minutes = EXCLUDED.total_minutes,
                        billable_minutes = EXCLUDED.billable_minutes,
                        non_billable_minutes = EXCLUDED.non_billable_minutes,
                        case_work_minutes = EXCLUDED.case_work_minutes,
                        subscription_work_minutes = EXCLUDED.subscription_work_minutes,
                        administrative_minutes = EXCLUDED.administrative_minutes,
                        other_minutes = EXCLUDED.other_minutes,
                        total_billable_amount = EXCLUDED.total_billable_amount,
                        total_entries = EXCLUDED.total_entries,
                        updated_utc = EXCLUDED.updated_utc"
                ))
                .bind(summary.tenant_id)
                .bind(summary.user_id)
                .bind(summary.summary_date)
                .bind(summary.total_minutes)
                .bind(summary.billable_minutes)
                .bind(summary.non_billable_minutes)
                .bind(summary.case_work_minutes)
                .bind(summary.subscription_work_minutes)
                .bind(summary.administrative_minutes)
                .bind(summary.other_minutes)
                .bind(summary.total_billable_amount)
                .bind(summary.total_entries)
                .bind(summary.updated_utc)
                .execute(&mut *conn)
                .await
                .map_err(|e| db_error("save daily summary", e))?;
            }
            None => {
                sqlx::query(
                    "DELETE FROM daily_time_summaries
                     WHERE tenant_id = $1 AND user_id = $2 AND summary_date = $3",
                )
                .bind(tenant_id)
                .bind(user_id)
                .bind(*date)
                .execute(&mut *conn)
                .await
                .map_err(|e| db_error("delete daily summary", e))?;
            }
        }
    }
    Ok(())
}

async fn allocate_invoice_number(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    invoice_type: InvoiceType,
    year: i32,
) -> Result<String, AppError> {
    let prefix = prefix_for(invoice_type);
    let sequence = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO invoice_number_counters (tenant_id, prefix, last_value)
        VALUES ($1, $2, 1)
        ON CONFLICT (tenant_id, prefix)
        DO UPDATE SET last_value = invoice_number_counters.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(prefix)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("allocate invoice number", e))?;

    Ok(format_invoice_number(prefix, year, sequence))
}

/// Raise the `(tenant, prefix)` counter to at least `sequence`. The row lock
/// taken by the upsert is held until the transaction ends.
async fn claim_invoice_number(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    prefix: &str,
    sequence: i64,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO invoice_number_counters (tenant_id, prefix, last_value)
        VALUES ($1, $2, $3)
        ON CONFLICT (tenant_id, prefix)
        DO UPDATE SET last_value = GREATEST(invoice_number_counters.last_value, EXCLUDED.last_value)
        "#,
    )
    .bind(ctx.tenant_id)
    .bind(prefix)
    .bind(sequence)
    .execute(&mut *conn)
    .await
    .map_err(|e| db_error("claim invoice number", e))?;

    Ok(())
}

async fn fetch_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    for_update: bool,
) -> Result<Option<Invoice>, AppError> {
    let sql = if for_update {
        concat!("SELECT ", invoice_columns!(), " FROM invoices WHERE invoice_id = $1 FOR UPDATE")
    } else {
        concat!("SELECT ", invoice_columns!(), " FROM invoices WHERE invoice_id = $1")
    };
    sqlx::query_as::<_, Invoice>(sql)
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| db_error("get invoice", e))
}

async fn locked_invoice(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    invoice_id: Uuid,
) -> Result<Invoice, AppError> {
    scoped(ctx, fetch_invoice(conn, invoice_id, true).await?, "Invoice")
}

async fn save_invoice(conn: &mut PgConnection, invoice: &Invoice) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE invoices
        SET invoice_status = $2,
            issue_date = $3,
            subtotal = $4,
            tax_amount = $5,
            discount_amount = $6,
            total_amount = $7,
            amount_paid = $8,
            updated_utc = $9,
            sent_utc = $10,
            cancelled_utc = $11
        WHERE invoice_id = $1
        "#,
    )
    .bind(invoice.invoice_id)
    .bind(invoice.invoice_status.as_str())
    .bind(invoice.issue_date)
    .bind(invoice.subtotal)
    .bind(invoice.tax_amount)
    .bind(invoice.discount_amount)
    .bind(invoice.total_amount)
    .bind(invoice.amount_paid)
    .bind(invoice.updated_utc)
    .bind(invoice.sent_utc)
    .bind(invoice.cancelled_utc)
    .execute(&mut *conn)
    .await
    .map_err(|e| db_error("save invoice", e))?;
    Ok(())
}

async fn fetch_line_items(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<Vec<LineItem>, AppError> {
    sqlx::query_as::<_, LineItem>(concat!(
        "SELECT ",
        line_item_columns!(),
        " FROM invoice_line_items WHERE invoice_id = $1 ORDER BY sort_order, created_utc"
    ))
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| db_error("list line items", e))
}

async fn fetch_line_item(
    conn: &mut PgConnection,
    line_item_id: Uuid,
) -> Result<Option<LineItem>, AppError> {
    sqlx::query_as::<_, LineItem>(concat!(
        "SELECT ",
        line_item_columns!(),
        " FROM invoice_line_items WHERE line_item_id = $1"
    ))
    .bind(line_item_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| db_error("get line item", e))
}

/// Recompute and persist the invoice's derived totals from its stored items.
async fn refresh_totals(conn: &mut PgConnection, invoice: &mut Invoice) -> Result<(), AppError> {
    let items = fetch_line_items(conn, invoice.invoice_id).await?;
    totals::apply_totals(invoice, &items, Utc::now());
    save_invoice(conn, invoice).await
}

#[async_trait]
impl LedgerStore for Database {
    // -------------------------------------------------------------------------
    // Party Operations
    // -------------------------------------------------------------------------

    /// Onboard a law firm.
    #[instrument(skip(self, input))]
    async fn create_law_firm(&self, input: &CreateLawFirm) -> Result<LawFirm, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_law_firm"])
            .start_timer();

        let tenant_id = Uuid::new_v4();
        let firm = sqlx::query_as::<_, LawFirm>(concat!(
            "INSERT INTO law_firms (tenant_id, legal_name, cnpj, default_hourly_rate, is_active)
             VALUES ($1, $2, $3, $4, TRUE)
             RETURNING ",
            law_firm_columns!()
        ))
        .bind(tenant_id)
        .bind(&input.legal_name)
        .bind(&input.cnpj)
        .bind(input.default_hourly_rate)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("create law firm", e))?;

        timer.observe_duration();

        info!(tenant_id = %firm.tenant_id, "Law firm created");

        Ok(firm)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn get_law_firm(&self, ctx: &TenantContext) -> Result<LawFirm, AppError> {
        let mut tx = self.begin(ctx).await?;
        let firm = fetch_law_firm(&mut tx, ctx.tenant_id).await?;
        scoped(ctx, firm, "Law firm")
    }

    /// Soft-disable a law firm.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn disable_law_firm(&self, ctx: &TenantContext) -> Result<LawFirm, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["disable_law_firm"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        let firm = sqlx::query_as::<_, LawFirm>(concat!(
            "UPDATE law_firms SET is_active = FALSE WHERE tenant_id = $1 RETURNING ",
            law_firm_columns!()
        ))
        .bind(ctx.tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("disable law firm", e))?;
        let firm = scoped(ctx, firm, "Law firm")?;
        commit(tx).await?;

        timer.observe_duration();

        info!("Law firm disabled");

        Ok(firm)
    }

    /// Create a client.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    async fn create_client(
        &self,
        ctx: &TenantContext,
        input: &CreateClient,
    ) -> Result<Client, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_client"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;

        let client = sqlx::query_as::<_, Client>(concat!(
            "INSERT INTO clients (client_id, tenant_id, name, client_type, cpf, cnpj, email)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING ",
            client_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(ctx.tenant_id)
        .bind(&input.name)
        .bind(input.client_type.as_str())
        .bind(input.cpf.as_deref())
        .bind(input.cnpj.as_deref())
        .bind(input.email.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("create client", e))?;
        commit(tx).await?;

        timer.observe_duration();

        info!(client_id = %client.client_id, "Client created");

        Ok(client)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn get_client(&self, ctx: &TenantContext, client_id: Uuid) -> Result<Client, AppError> {
        let mut tx = self.begin(ctx).await?;
        let client = fetch_client(&mut tx, client_id).await?;
        scoped(ctx, client, "Client")
    }

    /// Create a vendor. CNPJ is unique per tenant.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    async fn create_vendor(
        &self,
        ctx: &TenantContext,
        input: &CreateVendor,
    ) -> Result<Vendor, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_vendor"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;

        let vendor = sqlx::query_as::<_, Vendor>(concat!(
            "INSERT INTO vendors (vendor_id, tenant_id, name, cnpj)
             VALUES ($1, $2, $3, $4)
             RETURNING ",
            vendor_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(ctx.tenant_id)
        .bind(&input.name)
        .bind(&input.cnpj)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::validation(format!("A vendor with CNPJ {} already exists", input.cnpj))
            }
            _ => db_error("create vendor", e),
        })?;
        commit(tx).await?;

        timer.observe_duration();

        info!(vendor_id = %vendor.vendor_id, "Vendor created");

        Ok(vendor)
    }

    // -------------------------------------------------------------------------
    // Billing Rate Operations
    // -------------------------------------------------------------------------

    /// Create a billing rate.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    async fn create_billing_rate(
        &self,
        ctx: &TenantContext,
        input: &CreateBillingRate,
    ) -> Result<BillingRate, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_billing_rate"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("billing_rates:{}", ctx.tenant_id))
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("lock billing rates", e))?;

        let same_scope = sqlx::query_as::<_, BillingRate>(concat!(
            "SELECT ",
            billing_rate_columns!(),
            " FROM billing_rates
              WHERE tenant_id = $1
                AND is_active = TRUE
                AND user_id IS NOT DISTINCT FROM $2
                AND service_type IS NOT DISTINCT FROM $3"
        ))
        .bind(ctx.tenant_id)
        .bind(input.user_id)
        .bind(input.service_type.as_deref())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_error("load billing rates", e))?;

        if let Some(existing) = same_scope.iter().find(|r| {
            windows_overlap(
                r.effective_from,
                r.effective_until,
                input.effective_from,
                input.effective_until,
            )
        }) {
            return Err(AppError::validation(format!(
                "Rate window overlaps billing rate {} effective from {}",
                existing.billing_rate_id, existing.effective_from
            )));
        }

        let rate = sqlx::query_as::<_, BillingRate>(concat!(
            "INSERT INTO billing_rates
                (billing_rate_id, tenant_id, user_id, service_type, hourly_rate, effective_from, effective_until, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
             RETURNING ",
            billing_rate_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(ctx.tenant_id)
        .bind(input.user_id)
        .bind(input.service_type.as_deref())
        .bind(input.hourly_rate)
        .bind(input.effective_from)
        .bind(input.effective_until)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("create billing rate", e))?;
        commit(tx).await?;

        timer.observe_duration();

        info!(billing_rate_id = %rate.billing_rate_id, "Billing rate created");

        Ok(rate)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn list_billing_rates(&self, ctx: &TenantContext) -> Result<Vec<BillingRate>, AppError> {
        let mut tx = self.begin(ctx).await?;
        sqlx::query_as::<_, BillingRate>(concat!(
            "SELECT ",
            billing_rate_columns!(),
            " FROM billing_rates WHERE tenant_id = $1 ORDER BY effective_from, created_utc"
        ))
        .bind(ctx.tenant_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_error("list billing rates", e))
    }

    // -------------------------------------------------------------------------
    // Time Entry Operations
    // -------------------------------------------------------------------------

    /// Record a time entry and refresh its day's rollup.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id, user_id = %input.user_id))]
    async fn record_time_entry(
        &self,
        ctx: &TenantContext,
        input: &CreateTimeEntry,
    ) -> Result<TimeEntry, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_time_entry"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        let firm = active_firm(&mut tx, ctx).await?;
        lock_user(&mut tx, ctx.tenant_id, input.user_id).await?;

        let mut entry = new_entry(ctx, input, Utc::now())?;
        let rates = rates_covering(&mut tx, ctx.tenant_id, entry.entry_date).await?;
        let rate = choose_rate(&entry, &rates, firm.default_hourly_rate);
        price(&mut entry, rate);
        check_overlap(&overlap_candidates(&mut tx, &entry).await?, &entry)?;

        save_time_entry(&mut tx, &entry).await?;
        refresh_summaries(
            &mut tx,
            ctx.tenant_id,
            entry.user_id,
            &affected_dates(None, Some(&entry)),
        )
        .await?;
        commit(tx).await?;

        timer.observe_duration();

        info!(
            time_entry_id = %entry.time_entry_id,
            effective_minutes = entry.effective_minutes,
            billable_amount = %entry.billable_amount,
            rate_source = ?rate.source,
            "Time entry recorded"
        );

        Ok(entry)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn get_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
    ) -> Result<TimeEntry, AppError> {
        let mut tx = self.begin(ctx).await?;
        let entry = fetch_time_entry(&mut tx, time_entry_id).await?;
        scoped(ctx, entry, "Time entry")
    }

    /// Update an editable time entry, re-pricing it and refreshing the
    /// rollup of both its old and new dates.
    #[instrument(skip(self, ctx, patch), fields(tenant_id = %ctx.tenant_id))]
    async fn update_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
        patch: &UpdateTimeEntry,
    ) -> Result<TimeEntry, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_time_entry"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        let firm = active_firm(&mut tx, ctx).await?;
        let current = locked_time_entry(&mut tx, ctx, time_entry_id).await?;

        let mut next = apply_update(&current, patch, Utc::now())?;
        let rates = rates_covering(&mut tx, ctx.tenant_id, next.entry_date).await?;
        let rate = choose_rate(&next, &rates, firm.default_hourly_rate);
        price(&mut next, rate);
        check_overlap(&overlap_candidates(&mut tx, &next).await?, &next)?;

        save_time_entry(&mut tx, &next).await?;
        refresh_summaries(
            &mut tx,
            ctx.tenant_id,
            next.user_id,
            &affected_dates(Some(&current), Some(&next)),
        )
        .await?;
        commit(tx).await?;

        timer.observe_duration();

        info!(
            effective_minutes = next.effective_minutes,
            billable_amount = %next.billable_amount,
            "Time entry updated"
        );

        Ok(next)
    }

    /// Move a time entry through the approval workflow.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn set_time_entry_status(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
        status: EntryStatus,
    ) -> Result<TimeEntry, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_time_entry_status"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let current = locked_time_entry(&mut tx, ctx, time_entry_id).await?;
        check_transition(current.entry_status, status)?;

        let mut next = current.clone();
        next.entry_status = status;
        next.updated_utc = Utc::now();
        check_overlap(&overlap_candidates(&mut tx, &next).await?, &next)?;

        save_time_entry(&mut tx, &next).await?;
        refresh_summaries(
            &mut tx,
            ctx.tenant_id,
            next.user_id,
            &affected_dates(Some(&current), Some(&next)),
        )
        .await?;
        commit(tx).await?;

        timer.observe_duration();

        info!(
            from = current.entry_status.as_str(),
            to = status.as_str(),
            "Time entry status changed"
        );

        Ok(next)
    }

    /// Delete a time entry that is not approved or billed.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn delete_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_time_entry"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let current = locked_time_entry(&mut tx, ctx, time_entry_id).await?;
        ensure_deletable(&current)?;

        sqlx::query("DELETE FROM time_entries WHERE time_entry_id = $1")
            .bind(time_entry_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete time entry", e))?;
        refresh_summaries(
            &mut tx,
            ctx.tenant_id,
            current.user_id,
            &affected_dates(Some(&current), None),
        )
        .await?;
        commit(tx).await?;

        timer.observe_duration();

        info!("Time entry deleted");

        Ok(())
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn get_daily_summary(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyTimeSummary>, AppError> {
        let mut tx = self.begin(ctx).await?;
        sqlx::query_as::<_, DailyTimeSummary>(concat!(
            "SELECT ",
            summary_columns!(),
            " FROM daily_time_summaries
              WHERE tenant_id = $1 AND user_id = $2 AND summary_date = $3"
        ))
        .bind(ctx.tenant_id)
        .bind(user_id)
        .bind(date)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("get daily summary", e))
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Allocate the next invoice number on its own transaction.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn next_invoice_number(
        &self,
        ctx: &TenantContext,
        invoice_type: InvoiceType,
        year: i32,
    ) -> Result<String, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["next_invoice_number"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let number = allocate_invoice_number(&mut tx, ctx, invoice_type, year).await?;
        commit(tx).await?;

        timer.observe_duration();

        Ok(number)
    }

    /// Create a draft invoice with zero totals.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    async fn create_invoice(
        &self,
        ctx: &TenantContext,
        input: &CreateInvoice,
        year: i32,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        scoped(ctx, fetch_client(&mut tx, input.client_id).await?, "Client")?;

        let invoice_number = match &input.invoice_number {
            Some(number) => {
                if let Some((prefix, sequence)) = claimed_sequence(number) {
                    claim_invoice_number(&mut tx, ctx, prefix, sequence).await?;
                }
                number.clone()
            }
            None => allocate_invoice_number(&mut tx, ctx, input.invoice_type, year).await?,
        };

        let totals = totals::compute_totals(std::iter::empty::<&LineItem>(), input.discount_amount);
        let invoice = sqlx::query_as::<_, Invoice>(concat!(
            "INSERT INTO invoices (
                invoice_id, tenant_id, client_id, invoice_number, invoice_type, invoice_status,
                currency, due_date, subtotal, tax_amount, discount_amount, total_amount, notes
             )
             VALUES ($1, $2, $3, $4, $5, 'draft', $6, $7, $8, $9, $10, $11, $12)
             RETURNING ",
            invoice_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(ctx.tenant_id)
        .bind(input.client_id)
        .bind(&invoice_number)
        .bind(input.invoice_type.as_str())
        .bind(&input.currency)
        .bind(input.due_date)
        .bind(totals.subtotal)
        .bind(totals.tax_amount)
        .bind(input.discount_amount)
        .bind(totals.total_amount)
        .bind(input.notes.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::validation(format!("Invoice number {} is already in use", invoice_number))
            }
            _ => db_error("create invoice", e),
        })?;
        commit(tx).await?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            "Draft invoice created"
        );

        Ok(invoice)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    async fn get_invoice(&self, ctx: &TenantContext, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        let invoice = fetch_invoice(&mut tx, invoice_id, false).await?;

        timer.observe_duration();

        scoped(ctx, invoice, "Invoice")
    }

    /// Set the discount of a draft invoice and recompute its total.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    async fn set_invoice_discount(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        discount_amount: Decimal,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_invoice_discount"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let mut invoice = locked_invoice(&mut tx, ctx, invoice_id).await?;
        totals::ensure_draft(&invoice)?;
        totals::validate_discount(discount_amount)?;

        invoice.discount_amount = discount_amount;
        refresh_totals(&mut tx, &mut invoice).await?;
        commit(tx).await?;

        timer.observe_duration();

        info!(discount_amount = %discount_amount, total_amount = %invoice.total_amount, "Discount set");

        Ok(invoice)
    }

    /// Send a draft invoice.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    async fn send_invoice(&self, ctx: &TenantContext, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["send_invoice"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let mut invoice = locked_invoice(&mut tx, ctx, invoice_id).await?;
        let items = fetch_line_items(&mut tx, invoice_id).await?;
        totals::send(&mut invoice, items.len(), Utc::now())?;
        save_invoice(&mut tx, &invoice).await?;
        commit(tx).await?;

        timer.observe_duration();

        info!(invoice_number = %invoice.invoice_number, "Invoice sent");

        Ok(invoice)
    }

    /// Cancel a draft or sent invoice.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    async fn cancel_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_invoice"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let mut invoice = locked_invoice(&mut tx, ctx, invoice_id).await?;
        totals::cancel(&mut invoice, Utc::now())?;
        save_invoice(&mut tx, &invoice).await?;
        commit(tx).await?;

        timer.observe_duration();

        info!(invoice_number = %invoice.invoice_number, "Invoice cancelled");

        Ok(invoice)
    }

    /// Delete a draft or cancelled invoice. Line items and payments cascade.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    async fn delete_invoice(&self, ctx: &TenantContext, invoice_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let invoice = locked_invoice(&mut tx, ctx, invoice_id).await?;
        totals::ensure_deletable(&invoice)?;

        sqlx::query("DELETE FROM invoices WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete invoice", e))?;
        commit(tx).await?;

        timer.observe_duration();

        info!(invoice_number = %invoice.invoice_number, "Invoice deleted");

        Ok(())
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    async fn recompute_invoice_totals(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["recompute_invoice_totals"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let mut invoice = locked_invoice(&mut tx, ctx, invoice_id).await?;
        refresh_totals(&mut tx, &mut invoice).await?;
        commit(tx).await?;

        timer.observe_duration();

        Ok(invoice)
    }

    // -------------------------------------------------------------------------
    // Line Item Operations
    // -------------------------------------------------------------------------

    /// Insert or replace a line item and recompute the invoice totals.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    async fn upsert_line_item(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: &UpsertLineItem,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_line_item"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let mut invoice = locked_invoice(&mut tx, ctx, invoice_id).await?;
        totals::ensure_draft(&invoice)?;

        let existing = match input.line_item_id {
            Some(id) => {
                let item = scoped(ctx, fetch_line_item(&mut tx, id).await?, "Line item")?;
                if item.invoice_id != invoice_id {
                    return Err(AppError::validation(format!(
                        "Line item {} belongs to another invoice",
                        id
                    )));
                }
                Some(item)
            }
            None => None,
        };
        if let Some(time_entry_id) = input.time_entry_id {
            scoped(ctx, fetch_time_entry(&mut tx, time_entry_id).await?, "Time entry")?;
        }

        let item = totals::build_line_item(&invoice, input, existing.as_ref(), Utc::now())?;
        sqlx::query(concat!(
            "INSERT INTO invoice_line_items (",
            line_item_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (line_item_id) DO UPDATE SET
                description = EXCLUDED.description,
                quantity = EXCLUDED.quantity,
                unit_price = EXCLUDED.unit_price,
                line_total = EXCLUDED.line_total,
                tax_amount = EXCLUDED.tax_amount,
                time_entry_id = EXCLUDED.time_entry_id,
                sort_order = EXCLUDED.sort_order,
                updated_utc = EXCLUDED.updated_utc"
        ))
        .bind(item.line_item_id)
        .bind(item.invoice_id)
        .bind(item.tenant_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.line_total)
        .bind(item.tax_amount)
        .bind(item.time_entry_id)
        .bind(item.sort_order)
        .bind(item.created_utc)
        .bind(item.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("save line item", e))?;

        refresh_totals(&mut tx, &mut invoice).await?;
        commit(tx).await?;

        timer.observe_duration();

        info!(
            line_item_id = %item.line_item_id,
            subtotal = %invoice.subtotal,
            tax_amount = %invoice.tax_amount,
            total_amount = %invoice.total_amount,
            "Line item saved"
        );

        Ok(invoice)
    }

    /// Remove a line item and recompute the invoice totals.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, line_item_id = %line_item_id))]
    async fn delete_line_item(
        &self,
        ctx: &TenantContext,
        line_item_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_line_item"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let item = scoped(ctx, fetch_line_item(&mut tx, line_item_id).await?, "Line item")?;
        let mut invoice = locked_invoice(&mut tx, ctx, item.invoice_id).await?;
        totals::ensure_draft(&invoice)?;

        let deleted = sqlx::query("DELETE FROM invoice_line_items WHERE line_item_id = $1")
            .bind(line_item_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete line item", e))?;
        if deleted.rows_affected() == 0 {
            return Err(AppError::not_found("Line item not found"));
        }

        refresh_totals(&mut tx, &mut invoice).await?;
        commit(tx).await?;

        timer.observe_duration();

        info!(total_amount = %invoice.total_amount, "Line item deleted");

        Ok(invoice)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    async fn list_line_items(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Vec<LineItem>, AppError> {
        let mut tx = self.begin(ctx).await?;
        scoped(ctx, fetch_invoice(&mut tx, invoice_id, false).await?, "Invoice")?;
        fetch_line_items(&mut tx, invoice_id).await
    }

    // -------------------------------------------------------------------------
    // Payment Operations
    // -------------------------------------------------------------------------

    /// Record a payment and move the invoice to partial_paid or paid.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    async fn record_payment(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: &RecordPayment,
    ) -> Result<(Invoice, Payment), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self.begin(ctx).await?;
        active_firm(&mut tx, ctx).await?;
        let mut invoice = locked_invoice(&mut tx, ctx, invoice_id).await?;
        totals::apply_payment(&mut invoice, input.amount, Utc::now())?;

        let payment = sqlx::query_as::<_, Payment>(concat!(
            "INSERT INTO invoice_payments (payment_id, invoice_id, tenant_id, amount, method, reference, paid_on)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING ",
            payment_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(ctx.tenant_id)
        .bind(input.amount)
        .bind(input.method.as_str())
        .bind(input.reference.as_deref())
        .bind(input.paid_on)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("record payment", e))?;
        save_invoice(&mut tx, &invoice).await?;
        commit(tx).await?;

        timer.observe_duration();

        info!(
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            status = invoice.invoice_status.as_str(),
            "Payment recorded"
        );

        Ok((invoice, payment))
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    async fn list_payments(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        let mut tx = self.begin(ctx).await?;
        scoped(ctx, fetch_invoice(&mut tx, invoice_id, false).await?, "Invoice")?;
        sqlx::query_as::<_, Payment>(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM invoice_payments WHERE invoice_id = $1 ORDER BY paid_on, created_utc"
        ))
        .bind(invoice_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_error("list payments", e))
    }
}

