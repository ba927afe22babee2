pub mod actions;
pub mod config;
pub mod error;
pub mod gateway;

use std::sync::Arc;

use config::Config;
use gateway::{Hub, Router};

/// Shared application state handed to every connection task.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub router: Arc<Router>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(hub: Arc<Hub>, router: Router, config: Config) -> Self {
        Self {
            hub,
            router: Arc::new(router),
            config: Arc::new(config),
        }
    }
}
