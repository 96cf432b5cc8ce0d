use axum::{routing::get, Router};
use bot::BotService;
use config::{build_config, AppConfig};
use std::sync::Arc;

extern crate pretty_env_logger;
#[macro_use]
extern crate log;
#[macro_use]
extern crate rust_i18n;

i18n!("locales", fallback = "uz");

mod bot;
mod command;
mod config;
mod error;
mod handler;
mod runtime;
mod service;
mod state;
mod storage;
mod utils;

#[cfg(test)]
mod tests;

#[shuttle_runtime::main]
async fn shuttle_main(
    #[shuttle_runtime::Secrets] secrets: shuttle_runtime::SecretStore,
) -> Result<BotService, shuttle_runtime::Error> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = pretty_env_logger::try_init_timed();

    info!("Starting bot...");

    let config = build_config(&secrets).map_err(error::BotError::from)?;
    AppConfig::set_global(config)?;

    info!("Initializing BotService...");
    let bot_service = BotService::new().await?;
    info!("Bot instance created");

    Ok(bot_service)
}

async fn health() -> &'static str {
    "Bot is running!"
}

#[shuttle_runtime::async_trait]
impl shuttle_runtime::Service for BotService {
    async fn bind(self, addr: std::net::SocketAddr) -> Result<(), shuttle_runtime::Error> {
        let shared_self = Arc::new(self);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| shuttle_runtime::Error::Custom(anyhow::anyhow!("Failed to bind {}: {}", addr, e)))?;
        let app = Router::new().route("/health", get(health));

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Health server stopped: {}", e);
            }
        });
        info!("Health endpoint listening on {}", addr);

        shared_self
            .start()
            .await
            .map_err(|e| shuttle_runtime::Error::Custom(anyhow::anyhow!("Bot stopped with error: {}", e)))?;

        Ok(())
    }
}
