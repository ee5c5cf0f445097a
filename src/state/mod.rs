pub(crate) mod debounce;
pub(crate) mod note_sync;

use crate::api::{ApiClient, EnvConfig};
use crate::storage::clear_token_from_storage;
use leptos::prelude::*;
use note_sync::SyncConfig;

#[derive(Clone)]
pub(crate) struct AppState {
    pub api_client: RwSignal<ApiClient>,
    pub env: EnvConfig,

    /// Set when the backend rejected the stored credential.
    pub unauthorized: RwSignal<bool>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            api_client: RwSignal::new(ApiClient::load_from_storage()),
            env: EnvConfig::new(),
            unauthorized: RwSignal::new(false),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new(self.env.sync_strategy)
    }

    pub fn mark_unauthorized(&self) {
        clear_token_from_storage();
        self.api_client.update(|c| c.token = None);
        self.unauthorized.set(true);
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub(crate) struct AppContext(pub AppState);
