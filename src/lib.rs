pub mod api;
pub mod config;
pub mod error;
pub mod invoker;
pub mod process;
pub mod status;

use std::sync::Arc;
use config::Config;
use invoker::ScrapeInvoker;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub invoker: ScrapeInvoker,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let invoker = ScrapeInvoker::new(&config);
        AppState {
            config: Arc::new(config),
            invoker,
        }
    }
}
