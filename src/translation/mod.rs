//! Reference-data translation of domain values to CM codes.

pub mod cache;
pub mod table;

pub use cache::{TranslationCache, spawn_refresh_task};
pub use table::{CodeTranslationTable, ReferenceRow, TranslationMiss};

/// Group keys used when building CM requests.
pub mod groups {
    pub const ACCOUNT_CATEGORY: &str = "ACCOUNT_CATEGORY";
    pub const DIVISION: &str = "DIVISION";
    pub const SALES_ORG: &str = "SALES_ORG";
    pub const DISTRIBUTION_CHANNEL: &str = "DISTRIBUTION_CHANNEL";
}
