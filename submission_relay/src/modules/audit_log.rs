use std::{fmt, sync::Arc};

use async_trait::async_trait;
use aws_sdk_dynamodb::{error::DisplayErrorContext, types::AttributeValue, Client as DynamoClient};
use chrono::{DateTime, Utc};
use log::{error, info};

use crate::modules::{error::AuditError, storage_key::Clock};

// Whether the notification the record describes went out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Sent,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Sent => "Sent",
            AuditStatus::Error => "Error",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// One notification attempt.
// Ids are "{status}-{epoch millis}", so two records of the same status in
// the same millisecond share an id and the later one wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub id: String,
    pub status: AuditStatus,
    pub body: String,
    pub receiver: String,
}

impl AuditRecord {
    pub fn new(status: AuditStatus, body: &str, receiver: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}-{}", status, at.timestamp_millis()),
            status,
            body: body.to_string(),
            receiver: receiver.to_string(),
        }
    }
}

// Durable key-value store for audit records; put is unconditional
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn put(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

#[derive(Clone)]
pub struct DynamoAuditStore {
    client: DynamoClient,
    table: String,
}

impl DynamoAuditStore {
    pub fn new(client: DynamoClient, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl AuditStore for DynamoAuditStore {
    async fn put(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.client
            .put_item()
            .table_name(&self.table)
            .item("EmailId", AttributeValue::S(record.id.clone()))
            .item("Status", AttributeValue::S(record.status.to_string()))
            .item("EmailBody", AttributeValue::S(record.body.clone()))
            .item("ReceiverEmail", AttributeValue::S(record.receiver.clone()))
            .send()
            .await
            .map_err(|e| AuditError {
                table: self.table.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}

/// Best-effort audit trail of notification attempts.
///
/// A failed put is logged and dropped. It never reaches the caller, since
/// audit completeness is not part of what the relay reports.
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn record(&self, status: AuditStatus, body: &str, receiver: &str) {
        let record = AuditRecord::new(status, body, receiver, self.clock.now());
        match self.store.put(&record).await {
            Ok(()) => info!("Audit record {} written", record.id),
            Err(e) => error!("Audit record {} lost: {}", record.id, e),
        }
    }
}
