//! service-core: Shared infrastructure for the billing ledger workspace.
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;

pub use tracing;
pub use validator;
