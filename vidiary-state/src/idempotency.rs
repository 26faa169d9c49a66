use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{StateError, StateResult};

/// Claim lifecycle: `dispatched` at claim time, `processed` after the
/// executor finishes successfully. A claim that never reaches `processed`
/// marks a crashed run; operators replay by deleting the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Dispatched,
    Processed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::Processed => "processed",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "dispatched" => Some(Self::Dispatched),
            "processed" => Some(Self::Processed),
            _ => None,
        }
    }
}

/// One idempotency record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub object_key: String,
    pub object_version: String,
    pub status: ClaimStatus,
    pub result_key: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Stable key for a `(object_key, object_version)` tuple. Versions arrive
/// quoted from some stores; the key uses the bare form.
pub fn idempotency_key(object_key: &str, object_version: &str) -> String {
    format!("{}|{}", object_key, object_version.trim().trim_matches('"'))
}

/// Deduplicates processing across upload-event retries, queue redeliveries,
/// and duplicate uploads of identical content.
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Conditionally insert a claim. `true` means this caller owns the tuple;
    /// `false` means it was already claimed and must not be processed.
    async fn claim(&self, object_key: &str, object_version: &str) -> StateResult<bool>;

    /// Record successful completion. Unconditional upsert; called only after
    /// the executor finished.
    async fn mark_processed(
        &self,
        object_key: &str,
        object_version: &str,
        result_key: &str,
    ) -> StateResult<()>;

    /// Non-authoritative fast path used before claiming.
    async fn is_processed(&self, object_key: &str, object_version: &str) -> StateResult<bool>;
}

/// DynamoDB-backed idempotency guard.
#[derive(Clone)]
pub struct DynamoIdempotencyGuard {
    client: Client,
    table: String,
}

impl DynamoIdempotencyGuard {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// Construct a client from the ambient AWS environment.
    pub async fn from_env(region: &str, table: impl Into<String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config), table)
    }
}

#[async_trait]
impl IdempotencyGuard for DynamoIdempotencyGuard {
    async fn claim(&self, object_key: &str, object_version: &str) -> StateResult<bool> {
        let key = idempotency_key(object_key, object_version);
        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .item("idempotency_key", AttributeValue::S(key.clone()))
            .item("object_key", AttributeValue::S(object_key.to_string()))
            .item(
                "object_version",
                AttributeValue::S(object_version.trim().trim_matches('"').to_string()),
            )
            .item(
                "status",
                AttributeValue::S(ClaimStatus::Dispatched.as_str().to_string()),
            )
            .condition_expression("attribute_not_exists(idempotency_key)")
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(key, "claimed idempotency record");
                Ok(true)
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_conditional_check_failed_exception())
                    .unwrap_or(false)
                {
                    debug!(key, "idempotency record already claimed");
                    return Ok(false);
                }
                Err(StateError::backend(err))
            }
        }
    }

    async fn mark_processed(
        &self,
        object_key: &str,
        object_version: &str,
        result_key: &str,
    ) -> StateResult<()> {
        let key = idempotency_key(object_key, object_version);
        self.client
            .put_item()
            .table_name(&self.table)
            .item("idempotency_key", AttributeValue::S(key.clone()))
            .item("object_key", AttributeValue::S(object_key.to_string()))
            .item(
                "object_version",
                AttributeValue::S(object_version.trim().trim_matches('"').to_string()),
            )
            .item(
                "status",
                AttributeValue::S(ClaimStatus::Processed.as_str().to_string()),
            )
            .item("result_key", AttributeValue::S(result_key.to_string()))
            .item(
                "processed_at",
                AttributeValue::S(Utc::now().to_rfc3339()),
            )
            .send()
            .await
            .map_err(StateError::backend)?;
        info!(key, "marked idempotency record processed");
        Ok(())
    }

    async fn is_processed(&self, object_key: &str, object_version: &str) -> StateResult<bool> {
        let key = idempotency_key(object_key, object_version);
        let out = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("idempotency_key", AttributeValue::S(key))
            .send()
            .await
            .map_err(StateError::backend)?;

        Ok(out
            .item()
            .and_then(|item| item.get("status"))
            .and_then(|v| v.as_s().ok())
            .and_then(|s| ClaimStatus::parse(s))
            .map(|s| s == ClaimStatus::Processed)
            .unwrap_or(false))
    }
}
