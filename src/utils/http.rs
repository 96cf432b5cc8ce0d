use reqwest::Client;
use std::time::Duration;

use crate::error::{BotError, BotResult};

pub const DEFAULT_USER_AGENT: &str = "LeadFunnelBot/1.0";

pub fn create_telegram_client() -> BotResult<Client> {
    let builder = Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(60))
        .tcp_keepalive(Duration::from_secs(30))
        .user_agent(DEFAULT_USER_AGENT);

    build_client(builder)
}

fn build_client(builder: reqwest::ClientBuilder) -> BotResult<Client> {
    builder
        .build()
        .map_err(|e| BotError::Other(anyhow::anyhow!("Failed to build HTTP client: {}", e)))
}
