//! Provider usage accounting and reports.

pub mod report;
mod tracker;

pub use report::UsageStatus;
pub use tracker::{DailyUsage, LimitWarning, ProviderLimit, UsageTracker, limit_warnings};
