//! Tenant isolation boundary.
//!
//! Every stateful call carries a [`TenantContext`]. Stores run each loaded
//! row through [`scoped`] before reading or mutating it, so a row owned by
//! another firm is never returned and never written.

use service_core::error::AppError;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    BillingRate, Client, DailyTimeSummary, Invoice, LawFirm, LineItem, Payment, TimeEntry, Vendor,
};

/// Caller identity for one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    /// Acting user, recorded for row-level security and audit.
    pub user_id: Uuid,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid, user_id: Uuid) -> Self {
        Self { tenant_id, user_id }
    }
}

/// A row owned by exactly one tenant.
pub trait TenantScoped {
    fn tenant_id(&self) -> Uuid;
}

macro_rules! tenant_scoped {
    ($($ty:ty),* $(,)?) => {
        $(impl TenantScoped for $ty {
            fn tenant_id(&self) -> Uuid {
                self.tenant_id
            }
        })*
    };
}

tenant_scoped!(
    LawFirm,
    Client,
    Vendor,
    BillingRate,
    TimeEntry,
    DailyTimeSummary,
    Invoice,
    LineItem,
    Payment,
);

pub fn ensure_tenant<T: TenantScoped>(
    ctx: &TenantContext,
    row: &T,
    what: &str,
) -> Result<(), AppError> {
    let owner = row.tenant_id();
    if owner == ctx.tenant_id {
        return Ok(());
    }
    warn!(
        caller_tenant = %ctx.tenant_id,
        user_id = %ctx.user_id,
        resource = what,
        "Cross-tenant access rejected"
    );
    Err(AppError::CrossTenantAccess(anyhow::anyhow!(
        "{} belongs to another tenant",
        what
    )))
}

/// Resolve a lookup by id: missing rows are `NotFound`, foreign rows are
/// `CrossTenantAccess`.
pub fn scoped<T: TenantScoped>(
    ctx: &TenantContext,
    row: Option<T>,
    what: &str,
) -> Result<T, AppError> {
    let row = row.ok_or_else(|| AppError::not_found(format!("{} not found", what)))?;
    ensure_tenant(ctx, &row, what)?;
    Ok(row)
}

/// Disabled firms keep read access but take no new writes.
pub fn ensure_active(firm: &LawFirm) -> Result<(), AppError> {
    if firm.is_active {
        return Ok(());
    }
    Err(AppError::immutable(format!(
        "Law firm {} is disabled",
        firm.tenant_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::totals::tests::draft_invoice;
    use service_core::error::ErrorKind;

    #[test]
    fn test_scoped() {
        let invoice = draft_invoice();
        let owner = TenantContext::new(invoice.tenant_id, Uuid::new_v4());
        let stranger = TenantContext::new(Uuid::new_v4(), Uuid::new_v4());

        assert!(scoped(&owner, Some(invoice.clone()), "Invoice").is_ok());
        assert_eq!(
            scoped(&stranger, Some(invoice), "Invoice").unwrap_err().kind(),
            ErrorKind::CrossTenantAccess
        );
        assert_eq!(
            scoped::<Invoice>(&owner, None, "Invoice").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
