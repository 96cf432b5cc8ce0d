use std::sync::{Arc, OnceLock};

use teloxide::adaptors::Throttle;
use teloxide::Bot;

use crate::runtime::{RuntimeManager, Scheduler};
use crate::service::{Messenger, ServiceRegistry, TelegramMessenger};
use crate::storage::TursoClient;
use crate::{
    config::AppConfig,
    error::{BotError, BotResult},
};

#[derive(Clone)]
pub struct AppState {
    pub runtime: RuntimeManager,
    pub service_registry: ServiceRegistry,
}

static APP_STATE: OnceLock<AppState> = OnceLock::new();

impl AppState {
    pub async fn new(config: &AppConfig, bot: Throttle<Bot>) -> BotResult<Self> {
        TursoClient::init(&config.turso.url, &config.turso.token).await?;
        let storage = TursoClient::get()?.clone();

        let runtime = RuntimeManager::new(storage.connection(), &config.runtime);
        let scheduler: Arc<dyn Scheduler> = Arc::new(runtime.scheduler.clone());
        let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot));

        let service_registry = ServiceRegistry::new(config, storage.connection(), scheduler, messenger);

        runtime.start(service_registry.funnel.clone()).await?;

        Ok(Self {
            runtime,
            service_registry,
        })
    }

    pub fn set_global(state: AppState) -> BotResult<()> {
        APP_STATE
            .set(state)
            .map_err(|_| BotError::AppStateError("Failed to set global app state".into()))
    }

    pub fn get() -> BotResult<AppState> {
        APP_STATE
            .get()
            .cloned()
            .ok_or_else(|| BotError::AppStateError("App state not initialized".into()))
    }
}
