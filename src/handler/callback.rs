use std::{str::FromStr, sync::Arc};

use chrono::Utc;
use teloxide::{adaptors::Throttle, dispatching::UpdateHandler, prelude::*, types::CallbackQuery};

use crate::{
    error::HandlerResult,
    service::{funnel::FunnelService, lead::Language},
};

use super::{settle, LANGUAGE_CALLBACK_PREFIX};

async fn handle_callback(bot: Throttle<Bot>, funnel: Arc<FunnelService>, q: CallbackQuery) -> HandlerResult<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let telegram_id = q.from.id.0 as i64;

    match data.strip_prefix(LANGUAGE_CALLBACK_PREFIX).map(Language::from_str) {
        Some(Ok(language)) => settle(
            funnel
                .handle_language_selected(telegram_id, language, Utc::now())
                .await,
        ),
        Some(Err(e)) => {
            warn!("Bad language callback from {}: {}", telegram_id, e);
            Ok(())
        }
        None => {
            debug!("Unknown callback data from {}: {}", telegram_id, data);
            Ok(())
        }
    }
}

pub fn get_callback_handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    Update::filter_callback_query().endpoint(handle_callback)
}
