//! In-memory ledger store.
//!
//! Rows live in `DashMap` tables. Units of work are serialized by keyed
//! `tokio::sync::Mutex` locks (per invoice, per tenant user, per tenant
//! table) and every check runs before the first write, so a failed call
//! leaves the tables untouched. Readers take the same keyed lock as
//! writers and never observe a half-applied change.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use service_core::error::AppError;
use tokio::sync::{Mutex, OwnedMutexGuard};
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
    CreateTimeEntry, CreateVendor, DailyTimeSummary, EntryStatus, Invoice, InvoiceStatus,
    InvoiceType, LawFirm, LineItem, Payment, RecordPayment, TimeEntry, UpdateTimeEntry,
    UpsertLineItem, Vendor,
};
use crate::services::store::LedgerStore;
use crate::tenancy::{ensure_active, scoped, TenantContext};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Firm(Uuid),
    Vendors(Uuid),
    Rates(Uuid),
    InvoiceNumbers(Uuid),
    User(Uuid, Uuid),
    Invoice(Uuid),
}

type SummaryKey = (Uuid, Uuid, NaiveDate);

#[derive(Default)]
pub struct MemoryStore {
    firms: DashMap<Uuid, LawFirm>,
    clients: DashMap<Uuid, Client>,
    vendors: DashMap<Uuid, Vendor>,
    rates: DashMap<Uuid, BillingRate>,
    entries: DashMap<Uuid, TimeEntry>,
    summaries: DashMap<SummaryKey, DailyTimeSummary>,
    invoices: DashMap<Uuid, Invoice>,
    line_items: DashMap<Uuid, LineItem>,
    payments: DashMap<Uuid, Payment>,
    counters: DashMap<(Uuid, &'static str), i64>,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

fn get<T: Clone>(table: &DashMap<Uuid, T>, id: Uuid) -> Option<T> {
    table.get(&id).map(|row| row.value().clone())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock(&self, key: LockKey) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    fn active_firm(&self, ctx: &TenantContext) -> Result<LawFirm, AppError> {
        let firm = scoped(ctx, get(&self.firms, ctx.tenant_id), "Law firm")?;
        ensure_active(&firm)?;
        Ok(firm)
    }

    fn tenant_rates(&self, tenant_id: Uuid) -> Vec<BillingRate> {
        self.rates
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone())
            .collect()
    }

    fn user_entries(&self, tenant_id: Uuid, user_id: Uuid) -> Vec<TimeEntry> {
        self.entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.user_id == user_id)
            .map(|e| e.value().clone())
            .collect()
    }

    fn invoice_items(&self, invoice_id: Uuid) -> Vec<LineItem> {
        let mut items: Vec<LineItem> = self
            .line_items
            .iter()
            .filter(|i| i.invoice_id == invoice_id)
            .map(|i| i.value().clone())
            .collect();
        items.sort_by_key(|i| (i.sort_order, i.created_utc));
        items
    }

    fn allocate_number(&self, tenant_id: Uuid, invoice_type: InvoiceType, year: i32) -> String {
        let prefix = prefix_for(invoice_type);
        // The entry guard holds the shard lock for this key until dropped.
        let sequence = {
            let mut counter = self.counters.entry((tenant_id, prefix)).or_insert(0);
            *counter += 1;
            *counter
        };
        format_invoice_number(prefix, year, sequence)
    }

    /// Raise the counter so the sequencer never hands out a number a caller
    /// already chose.
    fn claim_number(&self, tenant_id: Uuid, prefix: &'static str, sequence: i64) {
        let mut counter = self.counters.entry((tenant_id, prefix)).or_insert(0);
        *counter = (*counter).max(sequence);
    }

    fn ensure_number_free(&self, tenant_id: Uuid, invoice_number: &str) -> Result<(), AppError> {
        let taken = self
            .invoices
            .iter()
            .any(|i| i.tenant_id == tenant_id && i.invoice_number == invoice_number);
        if taken {
            return Err(AppError::validation(format!(
                "Invoice number {} is already in use",
                invoice_number
            )));
        }
        Ok(())
    }

    /// Caller holds the user lock.
    fn refresh_summaries(&self, tenant_id: Uuid, user_id: Uuid, dates: &[NaiveDate]) {
        let entries = self.user_entries(tenant_id, user_id);
        let now = Utc::now();
        for date in dates {
            let key = (tenant_id, user_id, *date);
            match summarize(tenant_id, user_id, *date, &entries, now) {
                Some(summary) => {
                    self.summaries.insert(key, summary);
                }
                None => {
                    self.summaries.remove(&key);
                }
            }
        }
    }

    fn store_entry(&self, before: Option<&TimeEntry>, after: &TimeEntry) {
        self.entries.insert(after.time_entry_id, after.clone());
        self.refresh_summaries(
            after.tenant_id,
            after.user_id,
            &affected_dates(before, Some(after)),
        );
    }

    /// Load a time entry, lock its user, and load it again under the lock.
    async fn locked_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
    ) -> Result<(OwnedMutexGuard<()>, TimeEntry), AppError> {
        let entry = scoped(ctx, get(&self.entries, time_entry_id), "Time entry")?;
        let guard = self.lock(LockKey::User(ctx.tenant_id, entry.user_id)).await;
        let entry = scoped(ctx, get(&self.entries, time_entry_id), "Time entry")?;
        Ok((guard, entry))
    }

    async fn locked_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<(OwnedMutexGuard<()>, Invoice), AppError> {
        scoped(ctx, get(&self.invoices, invoice_id), "Invoice")?;
        let guard = self.lock(LockKey::Invoice(invoice_id)).await;
        match get(&self.invoices, invoice_id) {
            Some(invoice) => Ok((guard, scoped(ctx, Some(invoice), "Invoice")?)),
            None => {
                // Deleted while we waited.
                self.locks.remove(&LockKey::Invoice(invoice_id));
                Err(AppError::not_found("Invoice not found"))
            }
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    #[instrument(skip(self, input))]
    async fn create_law_firm(&self, input: &CreateLawFirm) -> Result<LawFirm, AppError> {
        let firm = LawFirm {
            tenant_id: Uuid::new_v4(),
            legal_name: input.legal_name.clone(),
            cnpj: input.cnpj.clone(),
            default_hourly_rate: input.default_hourly_rate,
            is_active: true,
            created_utc: Utc::now(),
        };
        self.firms.insert(firm.tenant_id, firm.clone());

        info!(tenant_id = %firm.tenant_id, "Law firm created");
        Ok(firm)
    }

    async fn get_law_firm(&self, ctx: &TenantContext) -> Result<LawFirm, AppError> {
        scoped(ctx, get(&self.firms, ctx.tenant_id), "Law firm")
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn disable_law_firm(&self, ctx: &TenantContext) -> Result<LawFirm, AppError> {
        let _guard = self.lock(LockKey::Firm(ctx.tenant_id)).await;
        let mut firm = scoped(ctx, get(&self.firms, ctx.tenant_id), "Law firm")?;
        firm.is_active = false;
        self.firms.insert(firm.tenant_id, firm.clone());

        info!("Law firm disabled");
        Ok(firm)
    }

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    async fn create_client(
        &self,
        ctx: &TenantContext,
        input: &CreateClient,
    ) -> Result<Client, AppError> {
        self.active_firm(ctx)?;
        let client = Client {
            client_id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            name: input.name.clone(),
            client_type: input.client_type,
            cpf: input.cpf.clone(),
            cnpj: input.cnpj.clone(),
            email: input.email.clone(),
            created_utc: Utc::now(),
        };
        self.clients.insert(client.client_id, client.clone());

        info!(client_id = %client.client_id, "Client created");
        Ok(client)
    }

    async fn get_client(&self, ctx: &TenantContext, client_id: Uuid) -> Result<Client, AppError> {
        scoped(ctx, get(&self.clients, client_id), "Client")
    }

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    async fn create_vendor(
        &self,
        ctx: &TenantContext,
        input: &CreateVendor,
    ) -> Result<Vendor, AppError> {
        self.active_firm(ctx)?;
        let _guard = self.lock(LockKey::Vendors(ctx.tenant_id)).await;

        let duplicate = self
            .vendors
            .iter()
            .any(|v| v.tenant_id == ctx.tenant_id && v.cnpj == input.cnpj);
        if duplicate {
            return Err(AppError::validation(format!(
                "A vendor with CNPJ {} already exists",
                input.cnpj
            )));
        }

        let vendor = Vendor {
            vendor_id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            name: input.name.clone(),
            cnpj: input.cnpj.clone(),
            created_utc: Utc::now(),
        };
        self.vendors.insert(vendor.vendor_id, vendor.clone());

        info!(vendor_id = %vendor.vendor_id, "Vendor created");
        Ok(vendor)
    }

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    async fn create_billing_rate(
        &self,
        ctx: &TenantContext,
        input: &CreateBillingRate,
    ) -> Result<BillingRate, AppError> {
        self.active_firm(ctx)?;
        let _guard = self.lock(LockKey::Rates(ctx.tenant_id)).await;

        let clash = self.tenant_rates(ctx.tenant_id).into_iter().find(|r| {
            r.is_active
                && r.user_id == input.user_id
                && r.service_type == input.service_type
                && windows_overlap(
                    r.effective_from,
                    r.effective_until,
                    input.effective_from,
                    input.effective_until,
                )
        });
        if let Some(existing) = clash {
            return Err(AppError::validation(format!(
                "Rate window overlaps billing rate {} effective from {}",
                existing.billing_rate_id, existing.effective_from
            )));
        }

        let rate = BillingRate {
            billing_rate_id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            user_id: input.user_id,
            service_type: input.service_type.clone(),
            hourly_rate: input.hourly_rate,
            effective_from: input.effective_from,
            effective_until: input.effective_until,
            is_active: true,
            created_utc: Utc::now(),
        };
        self.rates.insert(rate.billing_rate_id, rate.clone());

        info!(billing_rate_id = %rate.billing_rate_id, "Billing rate created");
        Ok(rate)
    }

    async fn list_billing_rates(&self, ctx: &TenantContext) -> Result<Vec<BillingRate>, AppError> {
        let mut rates = self.tenant_rates(ctx.tenant_id);
        rates.sort_by_key(|r| (r.effective_from, r.created_utc));
        Ok(rates)
    }

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id, user_id = %input.user_id))]
    async fn record_time_entry(
        &self,
        ctx: &TenantContext,
        input: &CreateTimeEntry,
    ) -> Result<TimeEntry, AppError> {
        let firm = self.active_firm(ctx)?;
        let _guard = self.lock(LockKey::User(ctx.tenant_id, input.user_id)).await;

        let mut entry = new_entry(ctx, input, Utc::now())?;
        let rate = choose_rate(
            &entry,
            &self.tenant_rates(ctx.tenant_id),
            firm.default_hourly_rate,
        );
        price(&mut entry, rate);
        check_overlap(&self.user_entries(ctx.tenant_id, entry.user_id), &entry)?;

        self.store_entry(None, &entry);

        info!(
            time_entry_id = %entry.time_entry_id,
            effective_minutes = entry.effective_minutes,
            billable_amount = %entry.billable_amount,
            rate_source = ?rate.source,
            "Time entry recorded"
        );
        Ok(entry)
    }

    async fn get_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
    ) -> Result<TimeEntry, AppError> {
        let (_guard, entry) = self.locked_entry(ctx, time_entry_id).await?;
        Ok(entry)
    }

    #[instrument(skip(self, ctx, patch), fields(tenant_id = %ctx.tenant_id))]
    async fn update_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
        patch: &UpdateTimeEntry,
    ) -> Result<TimeEntry, AppError> {
        let firm = self.active_firm(ctx)?;
        let (_guard, current) = self.locked_entry(ctx, time_entry_id).await?;

        let mut next = apply_update(&current, patch, Utc::now())?;
        let rate = choose_rate(
            &next,
            &self.tenant_rates(ctx.tenant_id),
            firm.default_hourly_rate,
        );
        price(&mut next, rate);
        check_overlap(&self.user_entries(ctx.tenant_id, next.user_id), &next)?;

        self.store_entry(Some(&current), &next);

        info!(
            effective_minutes = next.effective_minutes,
            billable_amount = %next.billable_amount,
            "Time entry updated"
        );
        Ok(next)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn set_time_entry_status(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
        status: EntryStatus,
    ) -> Result<TimeEntry, AppError> {
        self.active_firm(ctx)?;
        let (_guard, current) = self.locked_entry(ctx, time_entry_id).await?;
        check_transition(current.entry_status, status)?;

        let mut next = current.clone();
        next.entry_status = status;
        next.updated_utc = Utc::now();
        check_overlap(&self.user_entries(ctx.tenant_id, next.user_id), &next)?;

        self.store_entry(Some(&current), &next);

        info!(
            from = current.entry_status.as_str(),
            to = status.as_str(),
            "Time entry status changed"
        );
        Ok(next)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn delete_time_entry(
        &self,
        ctx: &TenantContext,
        time_entry_id: Uuid,
    ) -> Result<(), AppError> {
        self.active_firm(ctx)?;
        let (_guard, current) = self.locked_entry(ctx, time_entry_id).await?;
        ensure_deletable(&current)?;

        self.entries.remove(&time_entry_id);
        self.refresh_summaries(
            current.tenant_id,
            current.user_id,
            &affected_dates(Some(&current), None),
        );

        info!("Time entry deleted");
        Ok(())
    }

    async fn get_daily_summary(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyTimeSummary>, AppError> {
        let _guard = self.lock(LockKey::User(ctx.tenant_id, user_id)).await;
        Ok(self
            .summaries
            .get(&(ctx.tenant_id, user_id, date))
            .map(|s| s.value().clone()))
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn next_invoice_number(
        &self,
        ctx: &TenantContext,
        invoice_type: InvoiceType,
        year: i32,
    ) -> Result<String, AppError> {
        self.active_firm(ctx)?;
        Ok(self.allocate_number(ctx.tenant_id, invoice_type, year))
    }

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    async fn create_invoice(
        &self,
        ctx: &TenantContext,
        input: &CreateInvoice,
        year: i32,
    ) -> Result<Invoice, AppError> {
        self.active_firm(ctx)?;
        scoped(ctx, get(&self.clients, input.client_id), "Client")?;

        let _guard = self.lock(LockKey::InvoiceNumbers(ctx.tenant_id)).await;
        let invoice_number = match &input.invoice_number {
            Some(number) => {
                self.ensure_number_free(ctx.tenant_id, number)?;
                if let Some((prefix, sequence)) = claimed_sequence(number) {
                    self.claim_number(ctx.tenant_id, prefix, sequence);
                }
                number.clone()
            }
            None => {
                let number = self.allocate_number(ctx.tenant_id, input.invoice_type, year);
                self.ensure_number_free(ctx.tenant_id, &number)?;
                number
            }
        };

        let now = Utc::now();
        let mut invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            client_id: input.client_id,
            invoice_number,
            invoice_type: input.invoice_type,
            invoice_status: InvoiceStatus::Draft,
            currency: input.currency.clone(),
            issue_date: None,
            due_date: input.due_date,
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            discount_amount: input.discount_amount,
            total_amount: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
            notes: input.notes.clone(),
            created_utc: now,
            updated_utc: now,
            sent_utc: None,
            cancelled_utc: None,
        };
        totals::apply_totals(&mut invoice, std::iter::empty(), now);
        self.invoices.insert(invoice.invoice_id, invoice.clone());

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            "Draft invoice created"
        );
        Ok(invoice)
    }

    async fn get_invoice(&self, ctx: &TenantContext, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let (_guard, invoice) = self.locked_invoice(ctx, invoice_id).await?;
        Ok(invoice)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn set_invoice_discount(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        discount_amount: Decimal,
    ) -> Result<Invoice, AppError> {
        self.active_firm(ctx)?;
        let (_guard, mut invoice) = self.locked_invoice(ctx, invoice_id).await?;
        totals::ensure_draft(&invoice)?;
        totals::validate_discount(discount_amount)?;

        invoice.discount_amount = discount_amount;
        totals::apply_totals(&mut invoice, &self.invoice_items(invoice_id), Utc::now());
        self.invoices.insert(invoice_id, invoice.clone());

        info!(discount_amount = %discount_amount, total_amount = %invoice.total_amount, "Discount set");
        Ok(invoice)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn send_invoice(&self, ctx: &TenantContext, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.active_firm(ctx)?;
        let (_guard, mut invoice) = self.locked_invoice(ctx, invoice_id).await?;
        let item_count = self.invoice_items(invoice_id).len();
        totals::send(&mut invoice, item_count, Utc::now())?;
        self.invoices.insert(invoice_id, invoice.clone());

        info!(invoice_number = %invoice.invoice_number, "Invoice sent");
        Ok(invoice)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn cancel_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        self.active_firm(ctx)?;
        let (_guard, mut invoice) = self.locked_invoice(ctx, invoice_id).await?;
        totals::cancel(&mut invoice, Utc::now())?;
        self.invoices.insert(invoice_id, invoice.clone());

        info!(invoice_number = %invoice.invoice_number, "Invoice cancelled");
        Ok(invoice)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn delete_invoice(&self, ctx: &TenantContext, invoice_id: Uuid) -> Result<(), AppError> {
        self.active_firm(ctx)?;
        let (_guard, invoice) = self.locked_invoice(ctx, invoice_id).await?;
        totals::ensure_deletable(&invoice)?;

        self.line_items.retain(|_, item| item.invoice_id != invoice_id);
        self.payments.retain(|_, payment| payment.invoice_id != invoice_id);
        self.invoices.remove(&invoice_id);
        // Callers queued on the old mutex find the invoice gone.
        self.locks.remove(&LockKey::Invoice(invoice_id));

        info!(invoice_number = %invoice.invoice_number, "Invoice deleted");
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn recompute_invoice_totals(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        self.active_firm(ctx)?;
        let (_guard, mut invoice) = self.locked_invoice(ctx, invoice_id).await?;
        totals::apply_totals(&mut invoice, &self.invoice_items(invoice_id), Utc::now());
        self.invoices.insert(invoice_id, invoice.clone());
        Ok(invoice)
    }

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    async fn upsert_line_item(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: &UpsertLineItem,
    ) -> Result<Invoice, AppError> {
        self.active_firm(ctx)?;
        let (_guard, mut invoice) = self.locked_invoice(ctx, invoice_id).await?;
        totals::ensure_draft(&invoice)?;

        let existing = match input.line_item_id {
            Some(id) => {
                let item = scoped(ctx, get(&self.line_items, id), "Line item")?;
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
            scoped(ctx, get(&self.entries, time_entry_id), "Time entry")?;
        }

        let now = Utc::now();
        let item = totals::build_line_item(&invoice, input, existing.as_ref(), now)?;

        let mut items: Vec<LineItem> = self
            .invoice_items(invoice_id)
            .into_iter()
            .filter(|i| i.line_item_id != item.line_item_id)
            .collect();
        items.push(item.clone());
        totals::apply_totals(&mut invoice, &items, now);

        self.line_items.insert(item.line_item_id, item);
        self.invoices.insert(invoice_id, invoice.clone());

        info!(
            subtotal = %invoice.subtotal,
            tax_amount = %invoice.tax_amount,
            total_amount = %invoice.total_amount,
            "Line item saved"
        );
        Ok(invoice)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn delete_line_item(
        &self,
        ctx: &TenantContext,
        line_item_id: Uuid,
    ) -> Result<Invoice, AppError> {
        self.active_firm(ctx)?;
        let item = scoped(ctx, get(&self.line_items, line_item_id), "Line item")?;
        let (_guard, mut invoice) = self.locked_invoice(ctx, item.invoice_id).await?;
        scoped(ctx, get(&self.line_items, line_item_id), "Line item")?;
        totals::ensure_draft(&invoice)?;

        let items: Vec<LineItem> = self
            .invoice_items(invoice.invoice_id)
            .into_iter()
            .filter(|i| i.line_item_id != line_item_id)
            .collect();
        totals::apply_totals(&mut invoice, &items, Utc::now());

        self.line_items.remove(&line_item_id);
        self.invoices.insert(invoice.invoice_id, invoice.clone());

        info!(total_amount = %invoice.total_amount, "Line item deleted");
        Ok(invoice)
    }

    async fn list_line_items(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Vec<LineItem>, AppError> {
        let (_guard, _invoice) = self.locked_invoice(ctx, invoice_id).await?;
        Ok(self.invoice_items(invoice_id))
    }

    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id))]
    async fn record_payment(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
        input: &RecordPayment,
    ) -> Result<(Invoice, Payment), AppError> {
        self.active_firm(ctx)?;
        let (_guard, mut invoice) = self.locked_invoice(ctx, invoice_id).await?;
        let now = Utc::now();
        totals::apply_payment(&mut invoice, input.amount, now)?;

        let payment = Payment {
            payment_id: Uuid::new_v4(),
            invoice_id,
            tenant_id: ctx.tenant_id,
            amount: input.amount,
            method: input.method,
            reference: input.reference.clone(),
            paid_on: input.paid_on,
            created_utc: now,
        };
        self.payments.insert(payment.payment_id, payment.clone());
        self.invoices.insert(invoice_id, invoice.clone());

        info!(
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            status = invoice.invoice_status.as_str(),
            "Payment recorded"
        );
        Ok((invoice, payment))
    }

    async fn list_payments(
        &self,
        ctx: &TenantContext,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        let (_guard, _invoice) = self.locked_invoice(ctx, invoice_id).await?;
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .map(|p| p.value().clone())
            .collect();
        payments.sort_by_key(|p| (p.paid_on, p.created_utc));
        Ok(payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientType;
    use crate::services::LedgerService;

    async fn invoice_on_fresh_store() -> (LedgerService<MemoryStore>, TenantContext, Uuid) {
        let service = LedgerService::new(MemoryStore::new());
        let firm = service
            .create_law_firm(&CreateLawFirm {
                legal_name: "Silva & Souza Advogados".to_string(),
                cnpj: "11222333000181".to_string(),
                default_hourly_rate: None,
            })
            .await
            .unwrap();
        let ctx = TenantContext::new(firm.tenant_id, Uuid::new_v4());
        let client = service
            .create_client(
                &ctx,
                &CreateClient {
                    name: "Construtora Horizonte Ltda".to_string(),
                    client_type: ClientType::Company,
                    cpf: None,
                    cnpj: Some("45997418000153".to_string()),
                    email: None,
                },
            )
            .await
            .unwrap();
        let invoice = service
            .create_invoice(&ctx, &CreateInvoice::new(client.client_id, InvoiceType::Standard))
            .await
            .unwrap();
        (service, ctx, invoice.invoice_id)
    }

    #[tokio::test]
    async fn test_deleting_an_invoice_drops_its_lock() {
        let (service, ctx, invoice_id) = invoice_on_fresh_store().await;
        service.get_invoice(&ctx, invoice_id).await.unwrap();
        assert!(service.store().locks.contains_key(&LockKey::Invoice(invoice_id)));

        service.delete_invoice(&ctx, invoice_id).await.unwrap();

        assert!(!service.store().locks.contains_key(&LockKey::Invoice(invoice_id)));
        let err = service.get_invoice(&ctx, invoice_id).await.unwrap_err();
        assert_eq!(err.kind(), service_core::error::ErrorKind::NotFound);
        assert!(!service.store().locks.contains_key(&LockKey::Invoice(invoice_id)));
    }
}
