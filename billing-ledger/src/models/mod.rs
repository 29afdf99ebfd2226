//! Domain models for billing-ledger.

mod billing_rate;
mod daily_summary;
mod invoice;
mod line_item;
mod party;
mod payment;
mod time_entry;

pub use billing_rate::{BillingRate, CreateBillingRate};
pub use daily_summary::DailyTimeSummary;
pub use invoice::{CreateInvoice, Invoice, InvoiceStatus, InvoiceType};
pub use line_item::{LineItem, UpsertLineItem};
pub use party::{
    Client, ClientType, CreateClient, CreateLawFirm, CreateVendor, LawFirm, Vendor,
};
pub use payment::{Payment, PaymentMethod, RecordPayment};
pub use time_entry::{CreateTimeEntry, EntryStatus, EntryType, TimeEntry, UpdateTimeEntry};
