//! Redis connection for the shared token and rate-limit store

use fred::clients::Client;
use fred::interfaces::*;
use fred::types::config::Config as RedisConfig;

/// Initialize Redis client and check it answers
pub async fn init_client(redis_url: &str) -> anyhow::Result<Client> {
    let config = RedisConfig::from_url(redis_url)?;
    let client = Client::new(config, None, None, None);
    client.init().await?;
    client.ping::<()>(None).await?;
    Ok(client)
}
