pub mod event;
pub mod submission;

use aws_sdk_sqs::{
    client::Client as SQSClient,
    error::DisplayErrorContext,
    types::{Message, MessageSystemAttributeName},
};
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::time;
use tokio::{task, time::sleep};
use uuid::Uuid;

use crate::{
    config::SubmissionWorkerConfig,
    modules::{
        error::{DecodeError, WorkerError},
        pipeline::{InvocationResult, Pipeline},
    },
};

// What happens to a queue message once its invocation has finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    // Done, or can never succeed
    Delete,
    // Make visible again after the retry delay so the queue redelivers it
    Release,
    // Failed on its last allowed delivery
    Exhausted,
}

/// Decide what to do with a message after its `receive_count`-th delivery.
pub fn disposition(
    result: &Result<InvocationResult, DecodeError>,
    receive_count: u32,
    max_receive_count: u32,
) -> Disposition {
    match result {
        Ok(result) if result.is_success() => Disposition::Delete,
        Ok(_) if receive_count >= max_receive_count => Disposition::Exhausted,
        Ok(_) => Disposition::Release,
        // Redelivering a malformed payload cannot help
        Err(_) => Disposition::Delete,
    }
}

// ApproximateReceiveCount is 1 on first delivery; a missing value counts as first
fn receive_count(message: &Message) -> u32 {
    message
        .attributes
        .as_ref()
        .and_then(|attributes| attributes.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1)
}

// Handles
// - Reading submission notifications from SQS
// - Running each one through the pipeline as one invocation
// - Deleting finished messages, or releasing failed ones for redelivery
#[derive(Clone)]
pub struct SubmissionWorker {
    sqs_client: SQSClient,
    pipeline: Pipeline,
    config: SubmissionWorkerConfig,
}

impl SubmissionWorker {
    pub fn new(sqs_client: SQSClient, pipeline: Pipeline, config: SubmissionWorkerConfig) -> Self {
        Self {
            sqs_client,
            pipeline,
            config,
        }
    }

    // Run the polling loops until the process is stopped
    pub async fn run(self) {
        let loops = self.config.concurrency.unwrap_or_else(num_cpus::get).max(1);
        info!("Starting {} polling loops on {}", loops, self.config.queue_url);

        let handles: Vec<_> = (0..loops)
            .map(|n| {
                let worker = self.clone();
                task::spawn(async move { worker.poll(n).await })
            })
            .collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Polling loop ended unexpectedly: {}", e);
            }
        }
    }

    async fn poll(&self, n: usize) {
        let interval = time::Duration::from_secs(self.config.polling_interval);
        loop {
            match self.receive().await {
                Ok(messages) if !messages.is_empty() => {
                    debug!("Loop {} received {} messages", n, messages.len());
                    // Invocations in a batch share nothing, run them side by side
                    let invocations = messages.into_iter().map(|message| self.process_message(message));
                    for result in join_all(invocations).await {
                        if let Err(e) = result {
                            error!("{}", e);
                        }
                    }
                }
                Ok(_) => sleep(interval).await,
                Err(e) => {
                    error!("{}", e);
                    sleep(interval).await;
                }
            }
        }
    }

    async fn receive(&self) -> Result<Vec<Message>, WorkerError> {
        let output = self
            .sqs_client
            .receive_message()
            .queue_url(&self.config.queue_url)
            .max_number_of_messages(self.config.max_number_of_messages)
            .wait_time_seconds(self.config.wait_time_seconds)
            .visibility_timeout(self.config.visibility_timeout)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| WorkerError::Receive(DisplayErrorContext(&e).to_string()))?;
        Ok(output.messages.unwrap_or_default())
    }

    /// Run one message through the pipeline as a single invocation.
    pub async fn process_message(&self, message: Message) -> Result<(), WorkerError> {
        let invocation_id = Uuid::new_v4();
        let receive_count = receive_count(&message);
        let receipt_handle = message
            .receipt_handle
            .ok_or(WorkerError::MissingField("receipt handle"))?;

        let Some(body) = message.body else {
            warn!("[{}] Message has no body, discarding", invocation_id);
            return self.delete(&receipt_handle).await;
        };

        info!("[{}] Invocation started, delivery {}", invocation_id, receive_count);
        let result = self.pipeline.handle(&body).await;

        match &result {
            Ok(outcome) => info!(
                "[{}] Invocation finished: {}",
                invocation_id,
                serde_json::to_string(outcome).unwrap_or_default()
            ),
            Err(e) => error!("[{}] Unhandled invocation failure: {}", invocation_id, e),
        }

        match disposition(&result, receive_count, self.config.max_receive_count) {
            Disposition::Delete => self.delete(&receipt_handle).await,
            Disposition::Release => self.release(&receipt_handle).await,
            Disposition::Exhausted => {
                warn!(
                    "[{}] Giving up after {} deliveries, discarding message",
                    invocation_id, receive_count
                );
                self.delete(&receipt_handle).await
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), WorkerError> {
        self.sqs_client
            .delete_message()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| WorkerError::Acknowledge(DisplayErrorContext(&e).to_string()))?;
        debug!("Message deleted from the queue");
        Ok(())
    }

    // Hide the message for the retry delay, after which the queue redelivers it
    async fn release(&self, receipt_handle: &str) -> Result<(), WorkerError> {
        self.sqs_client
            .change_message_visibility()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(self.config.retry_delay_secs)
            .send()
            .await
            .map_err(|e| WorkerError::Acknowledge(DisplayErrorContext(&e).to_string()))?;
        debug!("Message released back to the queue");
        Ok(())
    }
}
