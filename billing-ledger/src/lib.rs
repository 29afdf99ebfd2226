//! Billing Ledger - invoice totals, time-entry pricing and daily rollups for
//! multi-tenant law firms.

pub mod config;
pub mod engine;
pub mod models;
pub mod services;
pub mod tenancy;
pub mod validators;
