//! Settings service

use validator::Validate;

use crate::{
    api::settings::UpdateSettingsRequest,
    config::LendingConfig,
    error::AppResult,
    models::{
        setting::{LOAN_DURATION_DAYS, MAX_ACTIVE_LOANS},
        LendingSettings,
    },
    repository::{Repository, TxMode},
};

#[derive(Clone)]
pub struct SettingsService {
    repository: Repository,
    defaults: LendingConfig,
}

impl SettingsService {
    pub fn new(repository: Repository, defaults: LendingConfig) -> Self {
        Self { repository, defaults }
    }

    /// Get current lending settings
    pub async fn get_settings(&self) -> AppResult<LendingSettings> {
        let mut tx = self.repository.begin(TxMode::ReadOnly).await?;
        LendingSettings::read(tx.as_mut(), &self.defaults).await
    }

    /// Update lending settings.
    ///
    /// A new limit only applies to later borrow requests; existing loans are
    /// never invalidated by it.
    pub async fn update_settings(&self, request: UpdateSettingsRequest) -> AppResult<LendingSettings> {
        request.validate()?;

        let mut tx = self.repository.begin(TxMode::ReadWrite).await?;
        if let Some(max_active_loans) = request.max_active_loans {
            tx.put_setting(MAX_ACTIVE_LOANS, max_active_loans).await?;
        }
        if let Some(loan_duration_days) = request.loan_duration_days {
            tx.put_setting(LOAN_DURATION_DAYS, loan_duration_days).await?;
        }
        let settings = LendingSettings::read(tx.as_mut(), &self.defaults).await?;
        tx.commit().await?;

        tracing::info!(
            "Lending settings updated: max_active_loans={}, loan_duration_days={}",
            settings.max_active_loans,
            settings.loan_duration_days
        );
        Ok(settings)
    }
}
