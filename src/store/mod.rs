//! Repository contracts consumed by the pipelines.
//!
//! The semantics here are part of the engine: `exists` is the deduplication
//! primitive, `lease_pending` must be atomic under concurrent workers, and the
//! derived queries subtract superseding `Undo`s. Backends only choose where
//! the bytes live.

/// In-memory backend, used in tests and as the standalone default
pub mod memory;

use crate::{
    delivery::DeliveryRecord,
    error::Error,
    model::{Actor, ApObject},
    protocol::activity::Activity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// A page of items together with the collection's total count.
pub type Paged<T> = (Vec<T>, u64);

/// Persistence of actors and their follow relationships.
#[async_trait]
pub trait ActorRepo: Send + Sync {
    /// Look up a locally owned actor by username.
    async fn get_by_username(&self, username: &str) -> Result<Option<Actor>, Error>;
    /// Look up any actor by its URI.
    async fn get_by_id(&self, id: &Url) -> Result<Option<Actor>, Error>;
    /// Insert or replace an actor record.
    async fn save(&self, actor: &Actor) -> Result<(), Error>;
    /// Remove an actor and its follow relationships.
    async fn delete(&self, id: &Url) -> Result<(), Error>;
    /// Record `follower` as following the local actor `username`.
    async fn add_follower(&self, username: &str, follower: &Url) -> Result<(), Error>;
    /// Remove `follower` from the local actor's followers. No-op when absent.
    async fn remove_follower(&self, username: &str, follower: &Url) -> Result<(), Error>;
    /// Record the local actor `username` as following `followee`.
    async fn add_following(&self, username: &str, followee: &Url) -> Result<(), Error>;
    /// Remove `followee` from the local actor's following. No-op when absent.
    async fn remove_following(&self, username: &str, followee: &Url) -> Result<(), Error>;
    /// Followers of a local actor, newest first.
    async fn list_followers(
        &self,
        username: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Url>, Error>;
    /// Actors a local actor follows, newest first.
    async fn list_following(
        &self,
        username: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Url>, Error>;
    /// Local usernames that follow the given (remote) actor. Used to route
    /// `Public` and followers-collection addressing from the shared inbox.
    async fn local_followers_of(&self, actor: &Url) -> Result<Vec<String>, Error>;
}

/// Persistence of activities and the derived activity collections.
#[async_trait]
pub trait ActivityRepo: Send + Sync {
    /// Persist an activity into a local user's inbox index.
    ///
    /// Re-persisting the same id with identical bytes only extends the index;
    /// the same id with a different body is a [Error::Conflict].
    async fn save_inbox(
        &self,
        username: &str,
        activity: &Activity,
        received_at: DateTime<Utc>,
    ) -> Result<(), Error>;
    /// Persist an activity produced by a local user.
    async fn save_outbox(
        &self,
        username: &str,
        activity: &Activity,
        received_at: DateTime<Utc>,
    ) -> Result<(), Error>;
    /// Look up an activity by id.
    async fn get_by_id(&self, id: &Url) -> Result<Option<Activity>, Error>;
    /// The deduplication primitive: whether an activity id is already stored.
    async fn exists(&self, id: &Url) -> Result<bool, Error>;
    /// Remove an activity.
    async fn delete(&self, id: &Url) -> Result<(), Error>;
    /// A local user's inbox, newest first.
    async fn list_inbox(
        &self,
        username: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error>;
    /// A local user's outbox, newest first.
    async fn list_outbox(
        &self,
        username: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error>;
    /// Activities replying to the given object.
    async fn replies(
        &self,
        object: &Url,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error>;
    /// `Like`s of the given object, minus superseding `Undo`s.
    async fn likes(
        &self,
        object: &Url,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error>;
    /// `Announce`s of the given object, minus superseding `Undo`s.
    async fn shares(
        &self,
        object: &Url,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error>;
    /// Objects the given actor has liked. Keyed on the activity's `actor`
    /// URI, never the inbox owner.
    async fn liked_by(
        &self,
        actor: &Url,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error>;
    /// Objects the given actor has announced.
    async fn shared_by(
        &self,
        actor: &Url,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error>;
}

/// Persistence of content objects.
#[async_trait]
pub trait ObjectRepo: Send + Sync {
    /// Look up an object by id. Tombstoned objects are still returned.
    async fn get_by_id(&self, id: &Url) -> Result<Option<ApObject>, Error>;
    /// Insert a new object.
    async fn save(&self, object: &ApObject) -> Result<(), Error>;
    /// Replace an existing object, keeping its id.
    async fn update(&self, object: &ApObject) -> Result<(), Error>;
    /// Mark an object deleted. Keeps the record so a `Tombstone` can be
    /// served. No-op when the id is unknown.
    async fn tombstone(&self, id: &Url) -> Result<(), Error>;
}

/// The durable delivery queue.
#[async_trait]
pub trait DeliveryRepo: Send + Sync {
    /// Append new records to the queue.
    async fn enqueue(&self, records: Vec<DeliveryRecord>) -> Result<(), Error>;
    /// Atomically lease up to `batch` ready records, transitioning them to
    /// `Processing` with `attempt_count` incremented and `last_attempt_at`
    /// set. Ready records are interleaved by target host so one failing
    /// recipient cannot starve the rest.
    async fn lease_pending(
        &self,
        batch: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryRecord>, Error>;
    /// Mark a leased record delivered.
    async fn mark_delivered(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), Error>;
    /// Record a retryable failure: applies the backoff schedule (or the
    /// remote's `Retry-After` when longer is requested) and moves the record
    /// to `Failed`, or to `Dead` once `max_retries` is exhausted.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<(), Error>;
    /// Record a permanent failure. Terminal.
    async fn mark_dead(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<(), Error>;
    /// Revert leased records back to `Pending` without counting the attempt.
    /// Used when shutting down with deliveries in flight.
    async fn release(&self, ids: &[Uuid]) -> Result<(), Error>;
    /// Drop `Delivered` records completed before `delivered_before` and
    /// `Dead` records completed before `dead_before`. Returns the number of
    /// records removed.
    async fn reap(
        &self,
        delivered_before: DateTime<Utc>,
        dead_before: DateTime<Utc>,
    ) -> Result<u64, Error>;
    /// Look up a record by id.
    async fn get(&self, id: Uuid) -> Result<Option<DeliveryRecord>, Error>;
}
