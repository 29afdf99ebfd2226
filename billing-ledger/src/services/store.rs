//! Storage seam for the ledger.
//!
//! Each method is one unit of work: it either commits every row it touches
//! or leaves the store unchanged. Implementations apply the same invariant
//! functions from [`crate::engine`] and the same tenant guard from
//! [`crate::tenancy`]; they differ only in how rows are kept and locked.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    BillingRate, Client, CreateBillingRate, CreateClient, CreateInvoice, CreateLawFirm,
    CreateTimeEntry, CreateVendor, DailyTimeSummary, EntryStatus, Invoice, InvoiceType, LawFirm,
    LineItem, Payment, RecordPayment, TimeEntry, UpdateTimeEntry, UpsertLineItem, Vendor,
};
use crate::tenancy::TenantContext;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // Parties

    /// Onboard a firm. The new firm's id is the tenant id for every later
    /// call.
    async fn create_law_firm(&self, input: &CreateLawFirm) -> Result<LawFirm, AppError>;

    async fn get_law_firm(&self, ctx: &TenantContext) -> Result<LawFirm, AppError>;

    /// Soft-disable the caller's firm. Disabled firms keep their data but
    /// reject further writes.
    async fn disable_law_firm(&self, ctx: &TenantContext) -> Result<LawFirm, AppError>;

    async fn create_client(
        &self,
        ctx: &TenantContext,
        input: &CreateClient,
    ) -> Result<Client, AppError>;

    async fn get_client(&self, ctx: &TenantContext, client_id: Uuid) -> Result<Client, AppError>;

    /// Vendor CNPJs are unique within a tenant.
    async fn create_vendor(
        &self,
        ctx: &TenantContext,
        input: &CreateVendor,
    ) -> Result<Vendor, AppError>;

    // Rates

    /// Rejects a rate whose window overlaps an active rate of the same
    /// `(user_id, service_type)` scope.
    async fn create_billing_rate(
        &self,
        ctx: &TenantContext,
        input: &CreateBillingRate,
    ) -> Result<BillingRate, AppError>;

    async fn list_billing_rates(&self, ctx: &TenantContext) -> Result<Vec<BillingRate>, AppError>;

    // Time entries

    async fn record_time_entry(
        &self,
        ctx: &TenantContext,
        input: &CreateTimeEntry,
    ) -> Result<TimeEntry, AppError>;

    async fn get_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
    ) -> Result<TimeEntry, AppError>;

    async fn update_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
        patch: &UpdateTimeEntry,
    ) -> Result<TimeEntry, AppError>;

    async fn set_time_entry_status(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
        status: EntryStatus,
    ) -> Result<TimeEntry, AppError>;

    async fn delete_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
    ) -> Result<(), AppError>;

    async fn get_daily_summary(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyTimeSummary>, AppError>;

    // Invoices

    /// Allocate the next number for `(tenant, prefix)`. The allocation
    /// commits on its own; a caller that never uses the number leaves a gap.
    async fn next_invoice_number(
        &self,
        ctx: &TenantContext,
        invoice_type: InvoiceType,
        year: i32,
    ) -> Result<String, AppError>;

    async fn create_invoice(
        &self,
        ctx: &TenantContext,
        input: &CreateInvoice,
        year: i32,
    ) -> Result<Invoice, AppError>;

    async fn get_invoice(&self, ctx: &TenantContext, invoice_id: Uuid)
        -> Result<Invoice, AppError>;

    async fn set_invoice_discount(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        discount_amount: Decimal,
    ) -> Result<Invoice, AppError>;

    async fn send_invoice(&self, ctx: &TenantContext, invoice_id: Uuid)
        -> Result<Invoice, AppError>;

    async fn cancel_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError>;

    /// Removes the invoice with its line items and payments.
    async fn delete_invoice(&self, ctx: &TenantContext, invoice_id: Uuid) -> Result<(), AppError>;

    async fn recompute_invoice_totals(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError>;

    // Line items

    async fn upsert_line_item(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: &UpsertLineItem,
    ) -> Result<Invoice, AppError>;

    async fn delete_line_item(
        &self,
        ctx: &TenantContext,
        line_item_id: Uuid,
    ) -> Result<Invoice, AppError>;

    async fn list_line_items(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Vec<LineItem>, AppError>;

    // Payments

    async fn record_payment(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: &RecordPayment,
    ) -> Result<(Invoice, Payment), AppError>;

    async fn list_payments(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError>;
}
