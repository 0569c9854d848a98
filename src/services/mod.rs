//! Business logic services

pub mod lending;
pub mod settings;

use crate::{config::LendingConfig, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub lending: lending::LendingService,
    pub settings: settings::SettingsService,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(repository: Repository, lending_config: LendingConfig) -> Self {
        Self {
            lending: lending::LendingService::new(repository.clone(), lending_config.clone()),
            settings: settings::SettingsService::new(repository, lending_config),
        }
    }
}
