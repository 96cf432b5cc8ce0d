use std::sync::Arc;

use chrono::Utc;
use teloxide::{
    dispatching::{UpdateFilterExt, UpdateHandler},
    dptree,
    types::{Message, Update},
};

use crate::{error::HandlerResult, service::funnel::FunnelService};

use super::settle;

async fn handle_contact(funnel: Arc<FunnelService>, msg: Message) -> HandlerResult<()> {
    let (Some(user), Some(contact)) = (msg.from.as_ref(), msg.contact()) else {
        return Ok(());
    };

    settle(
        funnel
            .handle_phone(user.id.0 as i64, &contact.phone_number, Utc::now())
            .await,
    )
}

async fn handle_text(funnel: Arc<FunnelService>, msg: Message) -> HandlerResult<()> {
    let (Some(user), Some(text)) = (msg.from.as_ref(), msg.text()) else {
        return Ok(());
    };

    settle(funnel.handle_text(user.id.0 as i64, text, Utc::now()).await)
}

pub fn get_message_handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    Update::filter_message()
        .branch(dptree::filter(|msg: Message| msg.contact().is_some()).endpoint(handle_contact))
        .branch(
            // commands other than /start never reach the funnel as answers
            dptree::filter(|msg: Message| msg.text().is_some_and(|text| !text.starts_with('/'))).endpoint(handle_text),
        )
}
