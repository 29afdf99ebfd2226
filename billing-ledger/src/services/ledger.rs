//! Public entry point of the ledger.
//!
//! `LedgerService` admits input (field rules, CPF/CNPJ canonicalization,
//! sign checks), then runs the store call under the conflict-retry policy
//! and records metrics. All invariants that depend on stored rows are
//! enforced by the store inside its unit of work.

use std::future::Future;

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::error::{AppError, ErrorKind};
use service_core::retry::{retry_on_conflict, RetryConfig};
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::engine::totals::validate_discount;
use crate::models::{
    BillingRate, Client, ClientType, CreateBillingRate, CreateClient, CreateInvoice,
    CreateLawFirm, CreateTimeEntry, CreateVendor, DailyTimeSummary, EntryStatus, Invoice,
    InvoiceType, LawFirm, LineItem, Payment, RecordPayment, TimeEntry, UpdateTimeEntry,
    UpsertLineItem, Vendor,
};
use crate::services::metrics::{
    BILLABLE_MINUTES_TOTAL, ERRORS_TOTAL, INVOICE_TRANSITIONS_TOTAL, LEDGER_OPERATIONS_TOTAL,
    LEDGER_OPERATION_DURATION, PAYMENTS_RECEIVED_TOTAL,
};
use crate::services::store::LedgerStore;
use crate::tenancy::TenantContext;
use crate::validators::{require_valid, validate_cnpj, validate_cpf, ValidationResult};

fn error_label(err: &AppError) -> &'static str {
    match err.kind() {
        ErrorKind::Validation => "validation",
        ErrorKind::ImmutableState => "immutable_state",
        ErrorKind::Overlap => "overlap",
        ErrorKind::CrossTenantAccess => "cross_tenant_access",
        ErrorKind::Conflict => "conflict",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Internal => "internal",
    }
}

fn ensure_non_negative(field: &str, value: Option<Decimal>) -> Result<(), AppError> {
    match value {
        Some(v) if v < Decimal::ZERO => Err(AppError::validation(format!(
            "{} must not be negative, got {}",
            field, v
        ))),
        _ => Ok(()),
    }
}

pub struct LedgerService<S: LedgerStore> {
    store: S,
    retry: RetryConfig,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryConfig::default())
    }

    pub fn with_retry(store: S, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one store call with retry on conflict, timing and outcome metrics.
    async fn run<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&[operation])
            .start_timer();
        let result = retry_on_conflict(&self.retry, operation, f).await;
        timer.observe_duration();

        match &result {
            Ok(_) => LEDGER_OPERATIONS_TOTAL
                .with_label_values(&[operation, "ok"])
                .inc(),
            Err(err) => {
                LEDGER_OPERATIONS_TOTAL
                    .with_label_values(&[operation, "error"])
                    .inc();
                ERRORS_TOTAL.with_label_values(&[error_label(err)]).inc();
                if err.kind() == ErrorKind::Internal {
                    warn!(operation, error = %err, "Ledger operation failed");
                }
            }
        }
        result
    }

    // -------------------------------------------------------------------------
    // Identifier validation
    // -------------------------------------------------------------------------

    pub fn validate_cpf(&self, raw: &str) -> ValidationResult {
        validate_cpf(raw)
    }

    pub fn validate_cnpj(&self, raw: &str) -> ValidationResult {
        validate_cnpj(raw)
    }

    // -------------------------------------------------------------------------
    // Parties
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(legal_name = %input.legal_name))]
    pub async fn create_law_firm(&self, input: &CreateLawFirm) -> Result<LawFirm, AppError> {
        input.validate()?;
        ensure_non_negative("default_hourly_rate", input.default_hourly_rate)?;
        let input = CreateLawFirm {
            cnpj: require_valid("CNPJ", validate_cnpj(&input.cnpj))?,
            ..input.clone()
        };

        self.run("create_law_firm", || self.store.create_law_firm(&input))
            .await
    }

    pub async fn get_law_firm(&self, ctx: &TenantContext) -> Result<LawFirm, AppError> {
        self.run("get_law_firm", || self.store.get_law_firm(ctx))
            .await
    }

    pub async fn disable_law_firm(&self, ctx: &TenantContext) -> Result<LawFirm, AppError> {
        self.run("disable_law_firm", || self.store.disable_law_firm(ctx))
            .await
    }

    /// Individuals may carry only a CPF and companies only a CNPJ. Supplied
    /// identifiers are stored in formatted form.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    pub async fn create_client(
        &self,
        ctx: &TenantContext,
        input: &CreateClient,
    ) -> Result<Client, AppError> {
        input.validate()?;
        match input.client_type {
            ClientType::Individual if input.cnpj.is_some() => {
                return Err(AppError::validation("An individual client cannot have a CNPJ"));
            }
            ClientType::Company if input.cpf.is_some() => {
                return Err(AppError::validation("A company client cannot have a CPF"));
            }
            _ => {}
        }

        let input = CreateClient {
            cpf: input
                .cpf
                .as_deref()
                .map(|raw| require_valid("CPF", validate_cpf(raw)))
                .transpose()?,
            cnpj: input
                .cnpj
                .as_deref()
                .map(|raw| require_valid("CNPJ", validate_cnpj(raw)))
                .transpose()?,
            ..input.clone()
        };

        self.run("create_client", || self.store.create_client(ctx, &input))
            .await
    }

    pub async fn get_client(&self, ctx: &TenantContext, client_id: Uuid) -> Result<Client, AppError> {
        self.run("get_client", || self.store.get_client(ctx, client_id))
            .await
    }

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    pub async fn create_vendor(
        &self,
        ctx: &TenantContext,
        input: &CreateVendor,
    ) -> Result<Vendor, AppError> {
        input.validate()?;
        let input = CreateVendor {
            cnpj: require_valid("CNPJ", validate_cnpj(&input.cnpj))?,
            ..input.clone()
        };

        self.run("create_vendor", || self.store.create_vendor(ctx, &input))
            .await
    }

    // -------------------------------------------------------------------------
    // Billing rates
    // -------------------------------------------------------------------------

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    pub async fn create_billing_rate(
        &self,
        ctx: &TenantContext,
        input: &CreateBillingRate,
    ) -> Result<BillingRate, AppError> {
        input.validate()?;
        ensure_non_negative("hourly_rate", Some(input.hourly_rate))?;
        if let Some(until) = input.effective_until {
            if until <= input.effective_from {
                return Err(AppError::validation(format!(
                    "effective_until {} must be after effective_from {}",
                    until, input.effective_from
                )));
            }
        }

        self.run("create_billing_rate", || {
            self.store.create_billing_rate(ctx, input)
        })
        .await
    }

    pub async fn list_billing_rates(
        &self,
        ctx: &TenantContext,
    ) -> Result<Vec<BillingRate>, AppError> {
        self.run("list_billing_rates", || self.store.list_billing_rates(ctx))
            .await
    }

    // -------------------------------------------------------------------------
    // Time entries
    // -------------------------------------------------------------------------

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id, user_id = %input.user_id))]
    pub async fn record_time_entry(
        &self,
        ctx: &TenantContext,
        input: &CreateTimeEntry,
    ) -> Result<TimeEntry, AppError> {
        input.validate()?;
        ensure_non_negative("billable_rate", input.billable_rate)?;
        if !matches!(input.entry_status, EntryStatus::Draft | EntryStatus::Pending) {
            return Err(AppError::validation(format!(
                "A new time entry must be draft or pending, not {}",
                input.entry_status.as_str()
            )));
        }

        let entry = self
            .run("record_time_entry", || self.store.record_time_entry(ctx, input))
            .await?;

        if entry.is_billable {
            BILLABLE_MINUTES_TOTAL
                .with_label_values(&[entry.entry_type.as_str()])
                .inc_by(entry.effective_minutes as f64);
        }
        Ok(entry)
    }

    pub async fn get_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
    ) -> Result<TimeEntry, AppError> {
        self.run("get_time_entry", || self.store.get_time_entry(ctx, time_entry_id))
            .await
    }

    #[instrument(skip(self, ctx, patch), fields(tenant_id = %ctx.tenant_id))]
    pub async fn update_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
        patch: &UpdateTimeEntry,
    ) -> Result<TimeEntry, AppError> {
        patch.validate()?;
        ensure_non_negative("billable_rate", patch.billable_rate.flatten())?;

        self.run("update_time_entry", || {
            self.store.update_time_entry(ctx, time_entry_id, patch)
        })
        .await
    }

    pub async fn set_time_entry_status(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
        status: EntryStatus,
    ) -> Result<TimeEntry, AppError> {
        self.run("set_time_entry_status", || {
            self.store.set_time_entry_status(ctx, time_entry_id, status)
        })
        .await
    }

    pub async fn delete_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
    ) -> Result<(), AppError> {
        self.run("delete_time_entry", || {
            self.store.delete_time_entry(ctx, time_entry_id)
        })
        .await
    }

    pub async fn get_daily_summary(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyTimeSummary>, AppError> {
        self.run("get_daily_summary", || {
            self.store.get_daily_summary(ctx, user_id, date)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    /// Allocate a number for the current calendar year.
    pub async fn next_invoice_number(
        &self,
        ctx: &TenantContext,
        invoice_type: InvoiceType,
    ) -> Result<String, AppError> {
        let year = Utc::now().year();
        self.run("next_invoice_number", || {
            self.store.next_invoice_number(ctx, invoice_type, year)
        })
        .await
    }

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id, client_id = %input.client_id))]
    pub async fn create_invoice(
        &self,
        ctx: &TenantContext,
        input: &CreateInvoice,
    ) -> Result<Invoice, AppError> {
        input.validate()?;
        validate_discount(input.discount_amount)?;
        let year = Utc::now().year();

        let invoice = self
            .run("create_invoice", || self.store.create_invoice(ctx, input, year))
            .await?;

        INVOICE_TRANSITIONS_TOTAL
            .with_label_values(&[invoice.invoice_status.as_str()])
            .inc();
        Ok(invoice)
    }

    pub async fn get_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        self.run("get_invoice", || self.store.get_invoice(ctx, invoice_id))
            .await
    }

    pub async fn set_invoice_discount(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        discount_amount: Decimal,
    ) -> Result<Invoice, AppError> {
        validate_discount(discount_amount)?;
        self.run("set_invoice_discount", || {
            self.store.set_invoice_discount(ctx, invoice_id, discount_amount)
        })
        .await
    }

    pub async fn send_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let invoice = self
            .run("send_invoice", || self.store.send_invoice(ctx, invoice_id))
            .await?;
        INVOICE_TRANSITIONS_TOTAL
            .with_label_values(&[invoice.invoice_status.as_str()])
            .inc();
        Ok(invoice)
    }

    pub async fn cancel_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let invoice = self
            .run("cancel_invoice", || self.store.cancel_invoice(ctx, invoice_id))
            .await?;
        INVOICE_TRANSITIONS_TOTAL
            .with_label_values(&[invoice.invoice_status.as_str()])
            .inc();
        Ok(invoice)
    }

    pub async fn delete_invoice(&self, ctx: &TenantContext, invoice_id: Uuid) -> Result<(), AppError> {
        self.run("delete_invoice", || self.store.delete_invoice(ctx, invoice_id))
            .await
    }

    pub async fn recompute_invoice_totals(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        self.run("recompute_invoice_totals", || {
            self.store.recompute_invoice_totals(ctx, invoice_id)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Line items
    // -------------------------------------------------------------------------

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    pub async fn upsert_line_item(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: &UpsertLineItem,
    ) -> Result<Invoice, AppError> {
        input.validate()?;
        if input.quantity <= Decimal::ZERO {
            return Err(AppError::validation(format!(
                "quantity must be positive, got {}",
                input.quantity
            )));
        }
        ensure_non_negative("tax_rate", input.tax_rate)?;

        self.run("upsert_line_item", || {
            self.store.upsert_line_item(ctx, invoice_id, input)
        })
        .await
    }

    pub async fn delete_line_item(
        &self,
        ctx: &TenantContext,
        line_item_id: Uuid,
    ) -> Result<Invoice, AppError> {
        self.run("delete_line_item", || {
            self.store.delete_line_item(ctx, line_item_id)
        })
        .await
    }

    pub async fn list_line_items(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Vec<LineItem>, AppError> {
        self.run("list_line_items", || self.store.list_line_items(ctx, invoice_id))
            .await
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id, invoice_id = %invoice_id))]
    pub async fn record_payment(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: &RecordPayment,
    ) -> Result<(Invoice, Payment), AppError> {
        input.validate()?;

        let (invoice, payment) = self
            .run("record_payment", || {
                self.store.record_payment(ctx, invoice_id, input)
            })
            .await?;

        PAYMENTS_RECEIVED_TOTAL
            .with_label_values(&[invoice.currency.as_str()])
            .inc_by(payment.amount.to_f64().unwrap_or_default());
        INVOICE_TRANSITIONS_TOTAL
            .with_label_values(&[invoice.invoice_status.as_str()])
            .inc();
        Ok((invoice, payment))
    }

    pub async fn list_payments(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        self.run("list_payments", || self.store.list_payments(ctx, invoice_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryType;
    use crate::services::memory::MemoryStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    async fn service_with_firm() -> (LedgerService<MemoryStore>, TenantContext) {
        let service = LedgerService::new(MemoryStore::new());
        let firm = service
            .create_law_firm(&CreateLawFirm {
                legal_name: "Silva & Souza Advogados".to_string(),
                cnpj: "11222333000181".to_string(),
                default_hourly_rate: None,
            })
            .await
            .unwrap();
        (service, TenantContext::new(firm.tenant_id, Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_firm_cnpj_is_canonicalized() {
        let (service, ctx) = service_with_firm().await;
        let firm = service.get_law_firm(&ctx).await.unwrap();
        assert_eq!(firm.cnpj, "11.222.333/0001-81");
    }

    #[tokio::test]
    async fn test_firm_with_invalid_cnpj_is_rejected() {
        let service = LedgerService::new(MemoryStore::new());
        let err = service
            .create_law_firm(&CreateLawFirm {
                legal_name: "Firm".to_string(),
                cnpj: "11222333000182".to_string(),
                default_hourly_rate: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_client_identifier_must_match_type() {
        let (service, ctx) = service_with_firm().await;

        let err = service
            .create_client(
                &ctx,
                &CreateClient {
                    name: "Maria".to_string(),
                    client_type: ClientType::Individual,
                    cpf: None,
                    cnpj: Some("11222333000181".to_string()),
                    email: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let client = service
            .create_client(
                &ctx,
                &CreateClient {
                    name: "Maria".to_string(),
                    client_type: ClientType::Individual,
                    cpf: Some("529.982.247-25".to_string()),
                    cnpj: None,
                    email: Some("maria@example.com".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(client.cpf.as_deref(), Some("529.982.247-25"));
    }

    #[tokio::test]
    async fn test_new_entry_cannot_start_approved() {
        let (service, ctx) = service_with_firm().await;
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let mut input = CreateTimeEntry::new(
            ctx.user_id,
            EntryType::CaseWork,
            start,
            start + chrono::Duration::hours(1),
        );
        input.entry_status = EntryStatus::Approved;

        let err = service.record_time_entry(&ctx, &input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_rate_window_must_be_forward() {
        let (service, ctx) = service_with_firm().await;
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = service
            .create_billing_rate(
                &ctx,
                &CreateBillingRate {
                    user_id: None,
                    service_type: None,
                    hourly_rate: dec!(200),
                    effective_from: day,
                    effective_until: Some(day),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_labels_are_distinct() {
        let labels = [
            error_label(&AppError::validation("x")),
            error_label(&AppError::immutable("x")),
            error_label(&AppError::not_found("x")),
            error_label(&AppError::Conflict(anyhow::anyhow!("x"))),
        ];
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
