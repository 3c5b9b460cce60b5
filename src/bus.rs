//! The event bus: `alarm_events` and `email_requests` topics over Redis pub/sub.
//!
//! Publish goes through a small `deadpool-redis` connection pool (bounded,
//! shared across publishers). Subscriptions get their own dedicated
//! connection via `redis::Client::get_async_pubsub`, per the "one dedicated
//! connection per subscription" contract in the design notes. Delivery is
//! fire-and-forget: an offline subscriber simply misses the message, and a
//! message that fails to decode is logged and skipped rather than killing
//! the subscription.

use std::future::Future;
use std::time::Duration;

use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use futures::StreamExt;
use redis::AsyncCommands;
use redis::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::BusConfig;
use crate::error::BusError;

pub const ALARM_EVENTS_TOPIC: &str = "alarm_events";
pub const EMAIL_REQUESTS_TOPIC: &str = "email_requests";

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct EventBus {
    pool: Pool,
    client: Client,
}

impl EventBus {
    pub fn new(config: &BusConfig) -> Result<Self, BusError> {
        let pool_cfg = PoolConfig::from_url(&config.url);
        let pool = pool_cfg
            .builder()
            .map_err(|e| BusError::Connection(e.to_string()))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let client = Client::open(config.url.clone()).map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self { pool, client })
    }

    /// Serialize `message` as JSON and publish it to `topic`. "Acknowledged"
    /// here means the broker accepted the message, not that any subscriber
    /// received it.
    pub async fn publish<T: Serialize>(&self, topic: &str, message: &T) -> Result<(), BusError> {
        let payload = serde_json::to_string(message).map_err(|e| BusError::Publish {
            topic: topic.to_string(),
            source: e.to_string(),
        })?;
        let mut conn = self.pool.get().await.map_err(|e| BusError::Connection(e.to_string()))?;
        conn.publish::<_, _, i64>(topic, payload)
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                source: e.to_string(),
            })?;
        Ok(())
    }

    /// Subscribe to `topic` and invoke `handler` for each decoded message
    /// until `cancel` fires. Reconnects with a fixed backoff if the
    /// underlying connection drops, so one dropped subscription doesn't
    /// permanently starve a consumer task.
    pub async fn subscribe<T, F, Fut>(&self, topic: &str, cancel: CancellationToken, mut handler: F)
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        while !cancel.is_cancelled() {
            match self.subscribe_once(topic, &cancel, &mut handler).await {
                Ok(()) => return,
                Err(e) => {
                    error!(topic, error = %e, "subscription connection lost, reconnecting");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                    }
                }
            }
        }
    }

    async fn subscribe_once<T, F, Fut>(
        &self,
        topic: &str,
        cancel: &CancellationToken,
        handler: &mut F,
    ) -> Result<(), BusError>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = stream.next() => {
                    let Some(msg) = next else {
                        return Err(BusError::Connection(format!("subscription to '{topic}' ended")));
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(topic, error = %e, "failed to read message payload, skipping");
                            continue;
                        }
                    };
                    match serde_json::from_str::<T>(&payload) {
                        Ok(decoded) => handler(decoded).await,
                        Err(e) => {
                            warn!(topic, error = %e, "poison message could not be decoded, skipping");
                        }
                    }
                    debug!(topic, "message handled");
                }
            }
        }
    }
}
