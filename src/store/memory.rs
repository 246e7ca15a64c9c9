//! In-memory backend for all repository traits.
//!
//! Every map lives behind one mutex, which makes the lease and follow-set
//! updates trivially atomic. Suitable for tests and single-node standalone
//! use; a database backend implements the same traits.

use crate::{
    config::DEFAULT_BACKOFF_SCHEDULE,
    delivery::{DeliveryRecord, DeliveryStatus},
    error::Error,
    model::{Actor, ApObject},
    protocol::activity::{Activity, ActivityKind},
    store::{ActivityRepo, ActorRepo, DeliveryRepo, ObjectRepo, Paged},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::Duration,
};
use url::Url;
use uuid::Uuid;

struct StoredActivity {
    activity: Activity,
    received_at: DateTime<Utc>,
}

impl StoredActivity {
    fn sort_key(&self) -> DateTime<Utc> {
        self.activity.published.unwrap_or(self.received_at)
    }
}

#[derive(Default)]
struct Inner {
    actors: HashMap<Url, Actor>,
    usernames: HashMap<String, Url>,
    followers: HashMap<String, Vec<Url>>,
    following: HashMap<String, Vec<Url>>,
    activities: HashMap<Url, StoredActivity>,
    inbox: HashMap<String, Vec<Url>>,
    outbox: HashMap<String, Vec<Url>>,
    objects: HashMap<Url, ApObject>,
    deliveries: HashMap<Uuid, DeliveryRecord>,
}

/// An in-memory store implementing every repository trait.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    backoff_schedule: Vec<Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl MemoryStore {
    /// Empty store with the default backoff schedule.
    pub fn new() -> MemoryStore {
        MemoryStore::with_backoff_schedule(DEFAULT_BACKOFF_SCHEDULE.to_vec())
    }

    /// Empty store with a custom backoff schedule.
    pub fn with_backoff_schedule(backoff_schedule: Vec<Duration>) -> MemoryStore {
        MemoryStore {
            inner: Mutex::new(Inner::default()),
            backoff_schedule,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::Transient("store mutex poisoned".into()))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let Some(last) = self.backoff_schedule.len().checked_sub(1) else {
            return Duration::from_secs(60);
        };
        let index = (attempt.max(1) as usize - 1).min(last);
        self.backoff_schedule[index]
    }
}

fn paginate<T>(mut items: Vec<(DateTime<Utc>, T)>, limit: usize, offset: usize) -> Paged<T> {
    // newest first; ties broken towards stable order
    items.sort_by(|a, b| b.0.cmp(&a.0));
    let total = items.len() as u64;
    let page = items
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(_, item)| item)
        .collect();
    (page, total)
}

fn listed(index: &HashMap<String, Vec<Url>>, inner: &Inner, username: &str) -> Vec<(DateTime<Utc>, Activity)> {
    index
        .get(username)
        .into_iter()
        .flatten()
        .filter_map(|id| inner.activities.get(id))
        .map(|stored| (stored.sort_key(), stored.activity.clone()))
        .collect()
}

/// Whether a stored activity has been retracted by a later (or earlier
/// arriving) `Undo` of the same actor. Evaluated at query time so the
/// `Undo`-before-`Like` race converges to the same outcome.
fn is_undone(inner: &Inner, target: &Activity) -> bool {
    inner.activities.values().any(|stored| {
        let undo = &stored.activity;
        if undo.kind != ActivityKind::Undo || undo.actor != target.actor {
            return false;
        }
        if undo.object_uri() == Some(&target.id) {
            return true;
        }
        match undo.inner_activity() {
            Some(original) => {
                original.kind == target.kind
                    && original.actor == target.actor
                    && original.object_uri() == target.object_uri()
            }
            None => false,
        }
    })
}

fn save_activity(
    inner: &mut Inner,
    index: fn(&mut Inner) -> &mut HashMap<String, Vec<Url>>,
    username: &str,
    activity: &Activity,
    received_at: DateTime<Utc>,
) -> Result<(), Error> {
    if let Some(existing) = inner.activities.get(&activity.id) {
        if existing.activity.raw() != activity.raw() {
            return Err(Error::Conflict);
        }
    } else {
        inner.activities.insert(
            activity.id.clone(),
            StoredActivity {
                activity: activity.clone(),
                received_at,
            },
        );
    }
    let entries = index(inner).entry(username.to_owned()).or_default();
    if !entries.contains(&activity.id) {
        entries.push(activity.id.clone());
    }
    Ok(())
}

#[async_trait]
impl ActorRepo for MemoryStore {
    async fn get_by_username(&self, username: &str) -> Result<Option<Actor>, Error> {
        let inner = self.lock()?;
        Ok(inner
            .usernames
            .get(username)
            .and_then(|id| inner.actors.get(id))
            .cloned())
    }

    async fn get_by_id(&self, id: &Url) -> Result<Option<Actor>, Error> {
        Ok(self.lock()?.actors.get(id).cloned())
    }

    async fn save(&self, actor: &Actor) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if let Some(username) = &actor.username {
            inner.usernames.insert(username.clone(), actor.id.clone());
        }
        inner.actors.insert(actor.id.clone(), actor.clone());
        Ok(())
    }

    async fn delete(&self, id: &Url) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if let Some(actor) = inner.actors.remove(id) {
            if let Some(username) = actor.username {
                inner.usernames.remove(&username);
                inner.followers.remove(&username);
                inner.following.remove(&username);
            }
        }
        for followers in inner.followers.values_mut() {
            followers.retain(|follower| follower != id);
        }
        for following in inner.following.values_mut() {
            following.retain(|followee| followee != id);
        }
        Ok(())
    }

    async fn add_follower(&self, username: &str, follower: &Url) -> Result<(), Error> {
        let mut inner = self.lock()?;
        let entries = inner.followers.entry(username.to_owned()).or_default();
        if !entries.contains(follower) {
            entries.push(follower.clone());
        }
        Ok(())
    }

    async fn remove_follower(&self, username: &str, follower: &Url) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if let Some(entries) = inner.followers.get_mut(username) {
            entries.retain(|entry| entry != follower);
        }
        Ok(())
    }

    async fn add_following(&self, username: &str, followee: &Url) -> Result<(), Error> {
        let mut inner = self.lock()?;
        let entries = inner.following.entry(username.to_owned()).or_default();
        if !entries.contains(followee) {
            entries.push(followee.clone());
        }
        Ok(())
    }

    async fn remove_following(&self, username: &str, followee: &Url) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if let Some(entries) = inner.following.get_mut(username) {
            entries.retain(|entry| entry != followee);
        }
        Ok(())
    }

    async fn list_followers(
        &self,
        username: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Url>, Error> {
        let inner = self.lock()?;
        let entries = inner.followers.get(username).cloned().unwrap_or_default();
        let total = entries.len() as u64;
        Ok((
            entries.into_iter().rev().skip(offset).take(limit).collect(),
            total,
        ))
    }

    async fn list_following(
        &self,
        username: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Url>, Error> {
        let inner = self.lock()?;
        let entries = inner.following.get(username).cloned().unwrap_or_default();
        let total = entries.len() as u64;
        Ok((
            entries.into_iter().rev().skip(offset).take(limit).collect(),
            total,
        ))
    }

    async fn local_followers_of(&self, actor: &Url) -> Result<Vec<String>, Error> {
        let inner = self.lock()?;
        Ok(inner
            .following
            .iter()
            .filter(|(_, followees)| followees.contains(actor))
            .map(|(username, _)| username.clone())
            .collect())
    }
}

#[async_trait]
impl ActivityRepo for MemoryStore {
    async fn save_inbox(
        &self,
        username: &str,
        activity: &Activity,
        received_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut inner = self.lock()?;
        save_activity(&mut inner, |i| &mut i.inbox, username, activity, received_at)
    }

    async fn save_outbox(
        &self,
        username: &str,
        activity: &Activity,
        received_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut inner = self.lock()?;
        save_activity(&mut inner, |i| &mut i.outbox, username, activity, received_at)
    }

    async fn get_by_id(&self, id: &Url) -> Result<Option<Activity>, Error> {
        let inner = self.lock()?;
        Ok(inner.activities.get(id).map(|stored| stored.activity.clone()))
    }

    async fn exists(&self, id: &Url) -> Result<bool, Error> {
        Ok(self.lock()?.activities.contains_key(id))
    }

    async fn delete(&self, id: &Url) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.activities.remove(id);
        for entries in inner.inbox.values_mut() {
            entries.retain(|entry| entry != id);
        }
        for entries in inner.outbox.values_mut() {
            entries.retain(|entry| entry != id);
        }
        Ok(())
    }

    async fn list_inbox(
        &self,
        username: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error> {
        let inner = self.lock()?;
        let items = listed(&inner.inbox, &inner, username);
        Ok(paginate(items, limit, offset))
    }

    async fn list_outbox(
        &self,
        username: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error> {
        let inner = self.lock()?;
        let items = listed(&inner.outbox, &inner, username);
        Ok(paginate(items, limit, offset))
    }

    async fn replies(
        &self,
        object: &Url,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error> {
        let inner = self.lock()?;
        let items = inner
            .activities
            .values()
            .filter(|stored| {
                stored
                    .activity
                    .inner_object()
                    .and_then(|doc| doc.in_reply_to.as_ref())
                    == Some(object)
            })
            .map(|stored| (stored.sort_key(), stored.activity.clone()))
            .collect();
        Ok(paginate(items, limit, offset))
    }

    async fn likes(
        &self,
        object: &Url,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error> {
        self.derived(limit, offset, |activity| {
            activity.kind == ActivityKind::Like && activity.object_uri() == Some(object)
        })
    }

    async fn shares(
        &self,
        object: &Url,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error> {
        self.derived(limit, offset, |activity| {
            activity.kind == ActivityKind::Announce && activity.object_uri() == Some(object)
        })
    }

    async fn liked_by(
        &self,
        actor: &Url,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error> {
        self.derived(limit, offset, |activity| {
            activity.kind == ActivityKind::Like && activity.actor == *actor
        })
    }

    async fn shared_by(
        &self,
        actor: &Url,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Activity>, Error> {
        self.derived(limit, offset, |activity| {
            activity.kind == ActivityKind::Announce && activity.actor == *actor
        })
    }
}

impl MemoryStore {
    fn derived(
        &self,
        limit: usize,
        offset: usize,
        filter: impl Fn(&Activity) -> bool,
    ) -> Result<Paged<Activity>, Error> {
        let inner = self.lock()?;
        let items = inner
            .activities
            .values()
            .filter(|stored| filter(&stored.activity) && !is_undone(&inner, &stored.activity))
            .map(|stored| (stored.sort_key(), stored.activity.clone()))
            .collect();
        Ok(paginate(items, limit, offset))
    }
}

#[async_trait]
impl ObjectRepo for MemoryStore {
    async fn get_by_id(&self, id: &Url) -> Result<Option<ApObject>, Error> {
        Ok(self.lock()?.objects.get(id).cloned())
    }

    async fn save(&self, object: &ApObject) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.objects.insert(object.id.clone(), object.clone());
        Ok(())
    }

    async fn update(&self, object: &ApObject) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if !inner.objects.contains_key(&object.id) {
            return Err(Error::NotFound);
        }
        inner.objects.insert(object.id.clone(), object.clone());
        Ok(())
    }

    async fn tombstone(&self, id: &Url) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if let Some(object) = inner.objects.get_mut(id) {
            object.tombstoned = true;
            object.content = None;
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryRepo for MemoryStore {
    async fn enqueue(&self, records: Vec<DeliveryRecord>) -> Result<(), Error> {
        let mut inner = self.lock()?;
        for record in records {
            inner.deliveries.insert(record.id, record);
        }
        Ok(())
    }

    async fn lease_pending(
        &self,
        batch: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryRecord>, Error> {
        let mut inner = self.lock()?;

        // Group ready records by host, then pick round-robin across hosts so
        // a single slow recipient cannot occupy the whole batch.
        let mut by_host: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
        for record in inner.deliveries.values() {
            if record.is_ready(now) {
                by_host
                    .entry(record.target_host().to_owned())
                    .or_default()
                    .push(record.id);
            }
        }
        for ids in by_host.values_mut() {
            ids.sort_by_key(|id| inner.deliveries[id].next_attempt_at);
        }

        let mut selected = Vec::new();
        let mut round = 0;
        while selected.len() < batch {
            let mut picked_any = false;
            for ids in by_host.values() {
                if let Some(id) = ids.get(round) {
                    selected.push(*id);
                    picked_any = true;
                    if selected.len() == batch {
                        break;
                    }
                }
            }
            if !picked_any {
                break;
            }
            round += 1;
        }

        let mut leased = Vec::with_capacity(selected.len());
        for id in selected {
            if let Some(record) = inner.deliveries.get_mut(&id) {
                record.status = DeliveryStatus::Processing;
                record.attempt_count += 1;
                record.last_attempt_at = Some(now);
                leased.push(record.clone());
            }
        }
        Ok(leased)
    }

    async fn mark_delivered(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), Error> {
        let mut inner = self.lock()?;
        let record = inner.deliveries.get_mut(&id).ok_or(Error::NotFound)?;
        record.status = DeliveryStatus::Delivered;
        record.completed_at = Some(now);
        record.last_error = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut inner = self.lock()?;
        let record = inner.deliveries.get_mut(&id).ok_or(Error::NotFound)?;
        let delay = retry_after.unwrap_or_else(|| self.backoff_delay(record.attempt_count));
        record.last_error = Some(error.to_owned());
        if record.attempt_count >= record.max_retries {
            record.status = DeliveryStatus::Dead;
            record.attempt_count = record.max_retries;
            record.completed_at = Some(now);
        } else {
            record.status = DeliveryStatus::Failed;
            let base = record.last_attempt_at.unwrap_or(now);
            record.next_attempt_at =
                base + chrono::Duration::from_std(delay).map_err(Error::other)?;
        }
        Ok(())
    }

    async fn mark_dead(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<(), Error> {
        let mut inner = self.lock()?;
        let record = inner.deliveries.get_mut(&id).ok_or(Error::NotFound)?;
        record.status = DeliveryStatus::Dead;
        record.attempt_count = record.max_retries;
        record.completed_at = Some(now);
        record.last_error = Some(error.to_owned());
        Ok(())
    }

    async fn release(&self, ids: &[Uuid]) -> Result<(), Error> {
        let mut inner = self.lock()?;
        for id in ids {
            if let Some(record) = inner.deliveries.get_mut(id) {
                if record.status == DeliveryStatus::Processing {
                    record.status = DeliveryStatus::Pending;
                    record.attempt_count = record.attempt_count.saturating_sub(1);
                }
            }
        }
        Ok(())
    }

    async fn reap(
        &self,
        delivered_before: DateTime<Utc>,
        dead_before: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let mut inner = self.lock()?;
        let before = inner.deliveries.len();
        inner.deliveries.retain(|_, record| {
            let Some(completed_at) = record.completed_at else {
                return true;
            };
            match record.status {
                DeliveryStatus::Delivered => completed_at >= delivered_before,
                DeliveryStatus::Dead => completed_at >= dead_before,
                _ => true,
            }
        });
        Ok((before - inner.deliveries.len()) as u64)
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeliveryRecord>, Error> {
        Ok(self.lock()?.deliveries.get(&id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn activity(json: &str) -> Activity {
        Activity::parse(json.as_bytes()).unwrap()
    }

    fn like(id: &str) -> Activity {
        activity(&format!(
            r#"{{"id":"{id}","type":"Like","actor":"https://remote.test/users/bob",
                "object":"https://example.com/users/alice/objects/1"}}"#
        ))
    }

    fn undo_of(id: &str, target: &str) -> Activity {
        activity(&format!(
            r#"{{"id":"{id}","type":"Undo","actor":"https://remote.test/users/bob",
                "object":"{target}"}}"#
        ))
    }

    fn record(host: &str, now: DateTime<Utc>) -> DeliveryRecord {
        DeliveryRecord::new(
            Url::parse("https://example.com/users/alice/activities/1").unwrap(),
            Bytes::from_static(b"{}"),
            Url::parse(&format!("https://{host}/inbox")).unwrap(),
            "alice".to_owned(),
            Url::parse("https://example.com/users/alice").unwrap(),
            5,
            now,
        )
    }

    #[tokio::test]
    async fn exists_is_the_dedup_primitive() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let follow = activity(
            r#"{"id":"https://remote.test/a/1","type":"Follow",
                "actor":"https://remote.test/users/bob",
                "object":"https://example.com/users/alice"}"#,
        );
        assert!(!store.exists(&follow.id).await.unwrap());
        store.save_inbox("alice", &follow, now).await.unwrap();
        assert!(store.exists(&follow.id).await.unwrap());

        // identical body is accepted, different body conflicts
        store.save_inbox("alice", &follow, now).await.unwrap();
        let (items, total) = store.list_inbox("alice", 10, 0).await.unwrap();
        assert_eq!((items.len(), total), (1, 1));

        let forged = activity(
            r#"{"id":"https://remote.test/a/1","type":"Follow",
                "actor":"https://remote.test/users/mallory",
                "object":"https://example.com/users/alice"}"#,
        );
        let err = store.save_inbox("alice", &forged, now).await.unwrap_err();
        assert_eq!(err, Error::Conflict);
    }

    #[tokio::test]
    async fn stored_bytes_are_preserved() {
        let store = MemoryStore::new();
        let body = r#"{"id":"https://remote.test/a/2","type":"Like","actor":"https://remote.test/users/bob","object":"https://example.com/o/1"}"#;
        let like = activity(body);
        store.save_inbox("alice", &like, Utc::now()).await.unwrap();
        let loaded = ActivityRepo::get_by_id(&store, &like.id).await.unwrap().unwrap();
        assert_eq!(loaded.raw().as_ref(), body.as_bytes());
    }

    #[tokio::test]
    async fn likes_subtract_undos_in_either_order() {
        let object = Url::parse("https://example.com/users/alice/objects/1").unwrap();
        let now = Utc::now();

        // like first, undo second
        let store = MemoryStore::new();
        store.save_inbox("alice", &like("https://remote.test/a/10"), now).await.unwrap();
        let (_, total) = store.likes(&object, 10, 0).await.unwrap();
        assert_eq!(total, 1);
        store
            .save_inbox(
                "alice",
                &undo_of("https://remote.test/a/11", "https://remote.test/a/10"),
                now,
            )
            .await
            .unwrap();
        let (_, total) = store.likes(&object, 10, 0).await.unwrap();
        assert_eq!(total, 0);

        // undo arrives before the like it retracts
        let store = MemoryStore::new();
        store
            .save_inbox(
                "alice",
                &undo_of("https://remote.test/a/11", "https://remote.test/a/10"),
                now,
            )
            .await
            .unwrap();
        store.save_inbox("alice", &like("https://remote.test/a/10"), now).await.unwrap();
        let (_, total) = store.likes(&object, 10, 0).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn liked_by_keys_on_the_activity_actor() {
        let store = MemoryStore::new();
        // delivered to alice's inbox, but the semantic actor is bob
        store
            .save_inbox("alice", &like("https://remote.test/a/20"), Utc::now())
            .await
            .unwrap();
        let bob = Url::parse("https://remote.test/users/bob").unwrap();
        let alice = Url::parse("https://example.com/users/alice").unwrap();
        let (_, by_bob) = store.liked_by(&bob, 10, 0).await.unwrap();
        let (_, by_alice) = store.liked_by(&alice, 10, 0).await.unwrap();
        assert_eq!((by_bob, by_alice), (1, 0));
    }

    #[tokio::test]
    async fn lease_transitions_and_is_exclusive() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .enqueue(vec![record("one.test", now), record("two.test", now)])
            .await
            .unwrap();

        let first = store.lease_pending(10, now).await.unwrap();
        assert_eq!(first.len(), 2);
        for leased in &first {
            assert_eq!(leased.status, DeliveryStatus::Processing);
            assert_eq!(leased.attempt_count, 1);
        }

        // nothing ready while processing
        let second = store.lease_pending(10, now).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn lease_interleaves_hosts() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut records = Vec::new();
        for _ in 0..5 {
            records.push(record("busy.test", now));
        }
        records.push(record("quiet.test", now));
        store.enqueue(records).await.unwrap();

        let leased = store.lease_pending(2, now).await.unwrap();
        let hosts: Vec<&str> = leased.iter().map(DeliveryRecord::target_host).collect();
        assert!(hosts.contains(&"quiet.test"));
    }

    #[tokio::test]
    async fn backoff_follows_the_schedule() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.enqueue(vec![record("remote.test", now)]).await.unwrap();

        let expected = [60, 300, 900, 3600];
        let mut lease_time = now;
        for delay_secs in expected {
            let leased = store.lease_pending(1, lease_time).await.unwrap();
            assert_eq!(leased.len(), 1);
            let id = leased[0].id;
            store.mark_failed(id, "503", None, lease_time).await.unwrap();
            let failed = store.get(id).await.unwrap().unwrap();
            assert_eq!(failed.status, DeliveryStatus::Failed);
            let gap = failed.next_attempt_at - failed.last_attempt_at.unwrap();
            assert_eq!(gap.num_seconds(), delay_secs);

            // not ready before the backoff expires
            assert!(store
                .lease_pending(1, failed.next_attempt_at - chrono::Duration::seconds(1))
                .await
                .unwrap()
                .is_empty());
            lease_time = failed.next_attempt_at;
        }

        // fifth failure exhausts the retries
        let leased = store.lease_pending(1, lease_time).await.unwrap();
        let id = leased[0].id;
        store.mark_failed(id, "503", None, lease_time).await.unwrap();
        let dead = store.get(id).await.unwrap().unwrap();
        assert_eq!(dead.status, DeliveryStatus::Dead);
        assert_eq!(dead.attempt_count, dead.max_retries);
    }

    #[tokio::test]
    async fn retry_after_overrides_the_schedule() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.enqueue(vec![record("remote.test", now)]).await.unwrap();
        let id = store.lease_pending(1, now).await.unwrap()[0].id;
        store
            .mark_failed(id, "429", Some(Duration::from_secs(120)), now)
            .await
            .unwrap();
        let failed = store.get(id).await.unwrap().unwrap();
        let gap = failed.next_attempt_at - failed.last_attempt_at.unwrap();
        assert_eq!(gap.num_seconds(), 120);
    }

    #[tokio::test]
    async fn permanent_failure_pins_the_attempt_count() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.enqueue(vec![record("remote.test", now)]).await.unwrap();
        let id = store.lease_pending(1, now).await.unwrap()[0].id;
        store.mark_dead(id, "410 Gone", now).await.unwrap();
        let dead = store.get(id).await.unwrap().unwrap();
        assert_eq!(dead.status, DeliveryStatus::Dead);
        assert_eq!(dead.attempt_count, dead.max_retries);
        // terminal: never leased again
        assert!(store
            .lease_pending(1, now + chrono::Duration::days(30))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn release_reverts_without_counting_the_attempt() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.enqueue(vec![record("remote.test", now)]).await.unwrap();
        let id = store.lease_pending(1, now).await.unwrap()[0].id;
        store.release(&[id]).await.unwrap();
        let released = store.get(id).await.unwrap().unwrap();
        assert_eq!(released.status, DeliveryStatus::Pending);
        assert_eq!(released.attempt_count, 0);
    }

    #[tokio::test]
    async fn reap_drops_finished_records() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .enqueue(vec![record("a.test", now), record("b.test", now), record("c.test", now)])
            .await
            .unwrap();
        let leased = store.lease_pending(3, now).await.unwrap();
        store.mark_delivered(leased[0].id, now).await.unwrap();
        store.mark_dead(leased[1].id, "gone", now).await.unwrap();

        let later = now + chrono::Duration::days(8);
        let removed = store
            .reap(later - chrono::Duration::hours(24), later - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.get(leased[2].id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn follow_sets_dedupe_and_reverse() {
        let store = MemoryStore::new();
        let bob = Url::parse("https://remote.test/users/bob").unwrap();
        store.add_follower("alice", &bob).await.unwrap();
        store.add_follower("alice", &bob).await.unwrap();
        let (followers, total) = store.list_followers("alice", 10, 0).await.unwrap();
        assert_eq!((followers.len(), total), (1, 1));

        store.add_following("carol", &bob).await.unwrap();
        assert_eq!(store.local_followers_of(&bob).await.unwrap(), vec!["carol"]);

        store.remove_follower("alice", &bob).await.unwrap();
        let (_, total) = store.list_followers("alice", 10, 0).await.unwrap();
        assert_eq!(total, 0);
        // removing again is a no-op
        store.remove_follower("alice", &bob).await.unwrap();
    }
}
