mod callback;
mod command;
mod keyboard;
mod message;

use callback::get_callback_handler;
use command::get_command_handler;
use message::get_message_handler;
use teloxide::dispatching::UpdateHandler;

pub use keyboard::*;

use crate::{error::HandlerResult, service::ServiceError};

pub fn get_handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    teloxide::dptree::entry()
        .branch(get_command_handler())
        .branch(get_message_handler())
        .branch(get_callback_handler())
}

/// Updates from users without a lead record are logged and dropped.
fn settle<T>(result: Result<T, ServiceError>) -> HandlerResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(ServiceError::LeadNotFound(telegram_id)) => {
            warn!("Update from unknown lead {}, ignoring", telegram_id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
