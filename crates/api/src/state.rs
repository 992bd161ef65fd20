//! Shared application state for the Axum API server.

use std::sync::Arc;

use herald_common::config::AppConfig;
use herald_notifier::PushService;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub push: Arc<PushService>,
}

impl AppState {
    pub fn new(config: AppConfig, push: PushService) -> Self {
        Self {
            config,
            push: Arc::new(push),
        }
    }
}
