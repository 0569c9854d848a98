//! Circulation: library lending server
//!
//! A REST JSON API around a loan lifecycle and copy availability engine:
//! members request loans, staff check them out and receive them back, and
//! every decision is taken inside one record store transaction so that
//! concurrent requests never lend more copies than a book has.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod lending;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult, LendingError};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}

impl AppState {
    pub fn new(config: AppConfig, repository: repository::Repository) -> Self {
        let services = services::Services::new(repository, config.lending.clone());
        Self {
            config: Arc::new(config),
            services: Arc::new(services),
        }
    }
}
