//! Durable delivery queue: record model, send path and worker pool
//!
//! Deliveries are at-least-once. Records carry the full serialized activity
//! and enough sender identity to re-sign on every attempt, so redelivery
//! survives application restarts.

pub(crate) mod request;
/// Worker pool, reaper and graceful shutdown
pub mod worker;

pub use self::worker::{DeliveryWorker, DeliveryWorkerHandle};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Lifecycle state of a delivery record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Waiting for its first attempt
    Pending,
    /// Leased by a worker
    Processing,
    /// Accepted by the remote inbox
    Delivered,
    /// A retryable attempt failed; waits for `next_attempt_at`
    Failed,
    /// Out of retries or permanently rejected. Terminal.
    Dead,
}

/// A single queued delivery of one activity to one inbox.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Queue-local id
    pub id: Uuid,
    /// Id of the activity being delivered
    pub activity_id: Url,
    /// The serialized activity, exactly as persisted
    #[serde(with = "serde_bytes")]
    pub activity: Bytes,
    /// Remote inbox being delivered to
    pub target_inbox: Url,
    /// Local username whose key signs the request
    pub sender_username: String,
    /// URI of the sending actor
    pub sender_actor: Url,
    /// Current state
    pub status: DeliveryStatus,
    /// Attempts made so far
    pub attempt_count: u32,
    /// Attempts after which the record dies
    pub max_retries: u32,
    /// When the record was enqueued
    pub created_at: DateTime<Utc>,
    /// Earliest time the next attempt may run
    pub next_attempt_at: DateTime<Utc>,
    /// When the last attempt started
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the record reached `Delivered` or `Dead`
    pub completed_at: Option<DateTime<Utc>>,
    /// Error of the last failed attempt
    pub last_error: Option<String>,
}

impl DeliveryRecord {
    /// Build a fresh pending record.
    pub fn new(
        activity_id: Url,
        activity: Bytes,
        target_inbox: Url,
        sender_username: String,
        sender_actor: Url,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> DeliveryRecord {
        DeliveryRecord {
            id: Uuid::new_v4(),
            activity_id,
            activity,
            target_inbox,
            sender_username,
            sender_actor,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_retries,
            created_at: now,
            next_attempt_at: now,
            last_attempt_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    /// Whether a worker may lease this record at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, DeliveryStatus::Pending | DeliveryStatus::Failed)
            && self.next_attempt_at <= now
    }

    /// Host of the target inbox, used for per-host fairness.
    pub fn target_host(&self) -> &str {
        self.target_inbox.host_str().unwrap_or_default()
    }
}

mod serde_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let vec = Vec::<u8>::deserialize(deserializer)?;
        Ok(Bytes::from(vec))
    }
}
