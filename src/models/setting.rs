//! Lending settings

use chrono::Duration;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{config::LendingConfig, error::AppResult, repository::SettingsProvider};

/// Maximum number of concurrently active loans per member
pub const MAX_ACTIVE_LOANS: &str = "max_active_loans";
/// Days between check-out and the expected return
pub const LOAN_DURATION_DAYS: &str = "loan_duration_days";

/// Current lending settings, resolved against configured defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LendingSettings {
    pub max_active_loans: i32,
    pub loan_duration_days: i32,
}

impl LendingSettings {
    /// Read the settings through the provider of an open transaction.
    pub async fn read<P>(provider: &mut P, defaults: &LendingConfig) -> AppResult<Self>
    where
        P: SettingsProvider + Send + ?Sized,
    {
        let max_active_loans = provider
            .setting(MAX_ACTIVE_LOANS)
            .await?
            .unwrap_or(defaults.default_max_active_loans);
        let loan_duration_days = provider
            .setting(LOAN_DURATION_DAYS)
            .await?
            .unwrap_or(defaults.default_loan_duration_days);

        Ok(Self {
            max_active_loans,
            loan_duration_days,
        })
    }

    pub fn loan_duration(&self) -> Duration {
        Duration::days(self.loan_duration_days as i64)
    }
}
