use std::time::Duration;

use async_trait::async_trait;
use redis::aio::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue_store: {0}")]
    Store(#[from] redis::RedisError),
    #[error("queue_codec: {0}")]
    Codec(String),
}

/// List-backed queue store. Every pop removes its item atomically, so several
/// workers can share the same queues.
#[async_trait]
pub trait QueueStore: Send {
    /// Pops the oldest item of `queue`. Blocks until one is available or
    /// `timeout` elapses, in which case `None` is returned. A zero timeout
    /// blocks indefinitely.
    async fn dequeue(
        &mut self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, QueueError>;

    /// Pushes `item` to the tail of `queue`.
    async fn enqueue(&mut self, queue: &str, item: &[u8]) -> Result<(), QueueError>;
}

/// Redis/Valkey backed queue store.
pub struct RedisQueue {
    client: redis::Client,
    connection: Option<Connection>,
}

impl RedisQueue {
    pub fn new(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        Ok(RedisQueue {
            client,
            connection: None,
        })
    }

    /// Opens the connection eagerly so an unreachable store is noticed at startup.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let mut q = Self::new(url)?;
        q.connection().await?;
        Ok(q)
    }

    async fn connection(&mut self) -> Result<&mut Connection, QueueError> {
        let con = match self.connection.take() {
            Some(con) => con,
            None => {
                debug!("opening queue store connection");
                self.client.get_async_connection().await?
            }
        };
        Ok(self.connection.insert(con))
    }

    fn reset_on_error<T>(&mut self, res: Result<T, QueueError>) -> Result<T, QueueError> {
        if res.is_err() {
            // reconnect on the next call
            self.connection = None;
        }
        res
    }
}

#[async_trait]
impl QueueStore for RedisQueue {
    async fn dequeue(
        &mut self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, QueueError> {
        let res = async {
            let secs = if timeout.is_zero() {
                0
            } else {
                timeout.as_secs().max(1)
            };
            let con = self.connection().await?;
            // BLPOP replies with [key, value], or nil once the timeout expires
            let popped: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
                .arg(queue)
                .arg(secs as usize)
                .query_async(con)
                .await?;
            Ok::<_, QueueError>(popped.map(|(_, item)| item))
        }
        .await;
        self.reset_on_error(res)
    }

    async fn enqueue(&mut self, queue: &str, item: &[u8]) -> Result<(), QueueError> {
        let res = async {
            let con = self.connection().await?;
            let _len: i64 = redis::cmd("RPUSH")
                .arg(queue)
                .arg(item)
                .query_async(con)
                .await?;
            Ok::<_, QueueError>(())
        }
        .await;
        self.reset_on_error(res)
    }
}
