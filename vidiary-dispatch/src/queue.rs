use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{DispatchError, DispatchResult};

/// A received queue message awaiting delete-after-dispatch.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// Narrow queue seam: receive a batch, delete by receipt handle. Visibility
/// timeouts, redelivery, and dead-lettering belong to the queue service.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn receive(&self, max_messages: usize) -> DispatchResult<Vec<QueueMessage>>;

    async fn delete(&self, receipt_handle: &str) -> DispatchResult<()>;
}

/// SQS-backed queue with long polling.
#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    wait_time_seconds: i32,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            wait_time_seconds: 10,
        }
    }

    /// Override the long-poll wait.
    pub fn with_wait_time(mut self, seconds: i32) -> Self {
        self.wait_time_seconds = seconds;
        self
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn receive(&self, max_messages: usize) -> DispatchResult<Vec<QueueMessage>> {
        let out = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.min(10) as i32)
            .wait_time_seconds(self.wait_time_seconds)
            .send()
            .await
            .map_err(DispatchError::queue)?;

        let messages = out
            .messages()
            .iter()
            .filter_map(|m| {
                let body = m.body()?.to_string();
                let receipt_handle = m.receipt_handle()?.to_string();
                Some(QueueMessage {
                    body,
                    receipt_handle,
                })
            })
            .collect::<Vec<_>>();
        debug!(count = messages.len(), "received queue messages");
        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> DispatchResult<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(DispatchError::queue)?;
        Ok(())
    }
}

/// In-memory queue for tests. Messages stay visible until deleted, so a
/// second receive without a delete models redelivery after a visibility
/// timeout.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    messages: Arc<Mutex<VecDeque<(String, String)>>>,
    next_handle: Arc<Mutex<u64>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw message body.
    pub async fn push(&self, body: impl Into<String>) {
        let mut next = self.next_handle.lock().await;
        *next += 1;
        let handle = format!("rh-{}", *next);
        self.messages.lock().await.push_back((handle, body.into()));
    }

    /// Messages still on the queue.
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn receive(&self, max_messages: usize) -> DispatchResult<Vec<QueueMessage>> {
        let messages = self.messages.lock().await;
        Ok(messages
            .iter()
            .take(max_messages)
            .map(|(handle, body)| QueueMessage {
                body: body.clone(),
                receipt_handle: handle.clone(),
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> DispatchResult<()> {
        let mut messages = self.messages.lock().await;
        messages.retain(|(handle, _)| handle != receipt_handle);
        Ok(())
    }
}
