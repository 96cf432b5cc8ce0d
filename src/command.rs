use teloxide::{
    adaptors::Throttle,
    macros::BotCommands,
    prelude::Requester,
    types::BotCommand,
    utils::command::ParseError,
    Bot,
};

use crate::error::HandlerResult;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    /// `/start [payload]`, the payload comes from a deep link and may be empty.
    #[command(parse_with = parse_payload)]
    Start(String),
}

fn parse_payload(input: String) -> Result<(String,), ParseError> {
    Ok((input.trim().to_string(),))
}

impl Command {
    pub fn user_commands() -> Vec<BotCommand> {
        vec![BotCommand::new("start", t!("commands.start", locale = "neutral"))]
    }
}

pub async fn setup_user_commands(bot: &Throttle<Bot>) -> HandlerResult<()> {
    bot.delete_my_commands().await?;
    bot.set_my_commands(Command::user_commands()).await?;
    Ok(())
}
