use redis::{aio::ConnectionManager, Client};

/// Соединение с Redis, которое само переподключается после обрыва.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: ConnectionManager,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(RedisClient { conn })
    }
}
