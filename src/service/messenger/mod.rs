mod texts;

use async_trait::async_trait;
use teloxide::{
    adaptors::Throttle,
    payloads::SendMessageSetters,
    prelude::Requester,
    types::{ChatId, KeyboardRemove, ReplyMarkup},
    Bot, RequestError,
};

use crate::{
    handler::{get_contact_keyboard, get_language_keyboard},
    service::lead::Language,
};

pub use texts::*;

/// What the user can tap in response to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affordance {
    None,
    LanguageChoice,
    ShareContact(Language),
    RemoveKeyboard,
}

#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("Telegram request failed: {0}")]
    Request(#[from] RequestError),
    #[error("Send failed: {0}")]
    Other(String),
}

/// Outbound transport. Every error is treated as transient by callers.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, chat_id: i64, text: String, affordance: Affordance) -> Result<(), MessengerError>;
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Throttle<Bot>,
}

impl TelegramMessenger {
    pub fn new(bot: Throttle<Bot>) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, chat_id: i64, text: String, affordance: Affordance) -> Result<(), MessengerError> {
        if text.trim().is_empty() {
            return Err(MessengerError::Other(format!("empty message for chat {}", chat_id)));
        }

        let markup: Option<ReplyMarkup> = match affordance {
            Affordance::None => None,
            Affordance::LanguageChoice => Some(get_language_keyboard().into()),
            Affordance::ShareContact(language) => Some(get_contact_keyboard(language).into()),
            Affordance::RemoveKeyboard => Some(KeyboardRemove::new().into()),
        };

        let request = self.bot.send_message(ChatId(chat_id), text);
        match markup {
            Some(markup) => request.reply_markup(markup).await?,
            None => request.await?,
        };

        Ok(())
    }
}
