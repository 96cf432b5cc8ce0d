use std::sync::Arc;

use chrono::Utc;
use teloxide::dispatching::{HandlerExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;

use crate::command::Command;
use crate::error::HandlerResult;
use crate::service::{
    funnel::{FunnelService, StartOutcome},
    lead::LeadProfile,
};

use super::settle;

fn profile_from(msg: &Message) -> Option<LeadProfile> {
    let user = msg.from.as_ref()?;
    Some(LeadProfile {
        telegram_id: user.id.0 as i64,
        chat_id: msg.chat.id.0,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
        is_bot: user.is_bot,
    })
}

async fn handle_start(funnel: Arc<FunnelService>, msg: Message, payload: String) -> HandlerResult<()> {
    let Some(profile) = profile_from(&msg) else {
        warn!("Ignoring /start without a sender in chat {}", msg.chat.id);
        return Ok(());
    };
    let telegram_id = profile.telegram_id;

    let result = funnel.handle_start(profile, &payload, Utc::now()).await;
    if let Ok(outcome) = &result {
        match outcome {
            StartOutcome::Created(_) => debug!("Created lead {}", telegram_id),
            StartOutcome::Updated(_) => debug!("Refreshed lead {}", telegram_id),
            StartOutcome::Debounced => {}
        }
    }

    settle(result)
}

async fn handle_command(funnel: Arc<FunnelService>, msg: Message, cmd: Command) -> HandlerResult<()> {
    match cmd {
        Command::Start(payload) => handle_start(funnel, msg, payload).await?,
    }

    Ok(())
}

pub fn get_command_handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    Update::filter_message()
        .filter_command::<Command>()
        .endpoint(handle_command)
}
