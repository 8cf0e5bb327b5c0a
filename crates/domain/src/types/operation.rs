//! Pending mutations and the records the remote service commits for them

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::AMOUNT_FIELD;
use crate::impl_wire_name_conversions;

/// Mutation types the dashboard can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    VehicleTransaction,
    ScrapTransaction,
    Expense,
    Payment,
}

impl_wire_name_conversions!(OperationKind {
    VehicleTransaction => "vehicle-transaction",
    ScrapTransaction => "scrap-transaction",
    Expense => "expense",
    Payment => "payment",
});

impl OperationKind {
    pub const ALL: [Self; 4] =
        [Self::VehicleTransaction, Self::ScrapTransaction, Self::Expense, Self::Payment];
}

/// Locally assigned, strictly increasing operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl OperationId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated token the remote uses to apply a mutation at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    /// Fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for IdempotencyToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for IdempotencyToken {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutation about to be enqueued; the queue assigns its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
    pub kind: OperationKind,
    pub payload: Value,
    pub idempotency_token: IdempotencyToken,
    pub created_at: DateTime<Utc>,
}

impl NewOperation {
    /// New operation with a freshly generated idempotency token.
    pub fn new(kind: OperationKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            idempotency_token: IdempotencyToken::generate(),
            created_at: Utc::now(),
        }
    }

    pub fn with_token(mut self, token: impl Into<IdempotencyToken>) -> Self {
        self.idempotency_token = token.into();
        self
    }
}

/// Mutation waiting in the durable queue for remote acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub payload: Value,
    pub idempotency_token: IdempotencyToken,
    pub created_at: DateTime<Utc>,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Dead-lettered: the remote rejected it and it will not be retried.
    pub terminal: bool,
}

impl PendingOperation {
    pub fn from_new(id: OperationId, op: NewOperation) -> Self {
        Self {
            id,
            kind: op.kind,
            payload: op.payload,
            idempotency_token: op.idempotency_token,
            created_at: op.created_at,
            attempt_count: 0,
            last_error: None,
            terminal: false,
        }
    }

    /// Numeric `amount` field of the payload, if present.
    pub fn amount(&self) -> Option<f64> {
        amount_of(&self.payload)
    }
}

/// Canonical record returned by the remote commit API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedRecord {
    pub server_id: String,
    pub kind: OperationKind,
    pub payload: Value,
    pub idempotency_token: IdempotencyToken,
}

impl CommittedRecord {
    pub fn amount(&self) -> Option<f64> {
        amount_of(&self.payload)
    }
}

fn amount_of(payload: &Value) -> Option<f64> {
    payload.get(AMOUNT_FIELD).and_then(Value::as_f64)
}
