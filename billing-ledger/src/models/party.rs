//! Law firm (tenant), client and vendor models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A tenant. Never deleted, only disabled.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LawFirm {
    pub tenant_id: Uuid,
    pub legal_name: String,
    pub cnpj: String,
    /// Applied when no billing rate matches a time entry.
    pub default_hourly_rate: Option<Decimal>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Validate)]
pub struct CreateLawFirm {
    #[validate(length(min = 1, max = 200))]
    pub legal_name: String,
    pub cnpj: String,
    pub default_hourly_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Individual,
    Company,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Individual => "individual",
            ClientType::Company => "company",
        }
    }
}

impl TryFrom<String> for ClientType {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "individual" => Ok(ClientType::Individual),
            "company" => Ok(ClientType::Company),
            other => Err(AppError::validation(format!(
                "Unknown client type '{}'",
                other
            ))),
        }
    }
}

/// Client of a firm. Individuals may hold a CPF, companies a CNPJ.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub client_type: ClientType,
    pub cpf: Option<String>,
    pub cnpj: Option<String>,
    pub email: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Validate)]
pub struct CreateClient {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub client_type: ClientType,
    pub cpf: Option<String>,
    pub cnpj: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

/// Supplier of a firm. CNPJ is unique per tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Vendor {
    pub vendor_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub cnpj: String,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Validate)]
pub struct CreateVendor {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub cnpj: String,
}
