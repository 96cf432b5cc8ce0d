use std::sync::Arc;

use teloxide::adaptors::throttle::Limits;
use teloxide::adaptors::Throttle;
use teloxide::prelude::*;
use teloxide::Bot;

use crate::config::AppConfig;
use crate::error::{BotResult, HandlerResult};
use crate::handler::get_handler;
use crate::service::FunnelService;
use crate::state::AppState;
use crate::utils::http;

pub struct BotService {
    pub bot: Throttle<Bot>,
}

impl BotService {
    pub async fn new() -> BotResult<Self> {
        let config = AppConfig::get()?;

        let client = http::create_telegram_client()?;
        let bot = Bot::with_client(config.telegram.0.clone(), client).throttle(Limits::default());

        info!("Initializing AppState...");
        let state = AppState::new(config, bot.clone()).await?;
        AppState::set_global(state)?;
        info!("AppState initialized");

        Ok(Self { bot })
    }

    pub async fn start(&self) -> HandlerResult<()> {
        info!("Testing connection to Telegram API...");
        match self.bot.get_me().await {
            Ok(me) => info!("Successfully connected to Telegram API as @{}", me.username()),
            Err(e) => {
                error!("Failed to connect to Telegram API: {:?}", e);
                return Err(anyhow::anyhow!("Failed to connect to Telegram API: {}", e).into());
            }
        }

        let bot = self.bot.clone();
        let state = AppState::get()?;
        let funnel: Arc<FunnelService> = state.service_registry.funnel.clone();

        crate::command::setup_user_commands(&bot).await?;

        Dispatcher::builder(bot, get_handler())
            .dependencies(dptree::deps![funnel])
            .error_handler(LoggingErrorHandler::with_custom_text(
                "An error has occurred in the dispatcher",
            ))
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Dispatcher stopped, shutting down workers");
        state.runtime.stop().await?;

        Ok(())
    }
}
