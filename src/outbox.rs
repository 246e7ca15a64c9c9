//! Outbox pipeline: author, persist, address, enqueue.
//!
//! Accepts client submissions (authenticated upstream) and internally
//! synthesized response activities. Assigns stable URIs, persists, computes
//! the delivery envelope and hands remote targets to the delivery queue.
//! Local targets bypass the queue and go straight into the inbox pipeline.

use crate::{
    engine::FederationEngine,
    error::Error,
    delivery::DeliveryRecord,
    model::Actor,
    protocol::activity::{public, Activity, ActivityKind},
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, info};
use url::Url;

/// Result of an outbox submission.
#[derive(Debug)]
pub struct SubmitOutcome {
    /// URI assigned to the activity
    pub activity_id: Url,
    /// URI assigned to the inner object, when one was created
    pub object_id: Option<Url>,
    /// Number of delivery records enqueued
    pub enqueued: usize,
}

impl FederationEngine {
    /// Submit an activity (or bare object) on behalf of a local user.
    ///
    /// The caller must already be authenticated as `username`; route handlers
    /// enforce that, and internal callers are trusted.
    pub async fn submit_activity(
        &self,
        username: &str,
        document: Value,
    ) -> Result<SubmitOutcome, Error> {
        let actor = self
            .local_actor(username)
            .await?
            .ok_or(Error::NotFound)?;
        if !actor.local || actor.private_key_pem.is_none() {
            return Err(Error::NotAuthorized("outbox of a remote actor"));
        }

        let document = self.normalize(username, &actor, document)?;
        let activity = Activity::from_value(&document)?;

        let now = self.config.now();
        self.activities.save_outbox(username, &activity, now).await?;
        let object_id = match activity.inner_object() {
            Some(doc) => {
                let record = doc.clone().into_record(now)?;
                if activity.kind == ActivityKind::Update {
                    self.objects.update(&record).await?;
                } else {
                    self.objects.save(&record).await?;
                }
                Some(record.id)
            }
            None => None,
        };
        if activity.kind == ActivityKind::Delete {
            if let Some(object) = activity.object_uri() {
                self.objects.tombstone(object).await?;
            }
        }
        self.apply_submission_effects(username, &actor, &activity).await?;

        let (inboxes, local) = self.compute_envelope(username, &activity).await?;

        let enqueued = inboxes.len();
        let records: Vec<DeliveryRecord> = inboxes
            .into_iter()
            .map(|inbox| {
                DeliveryRecord::new(
                    activity.id.clone(),
                    activity.raw().clone(),
                    inbox,
                    username.to_owned(),
                    actor.id.clone(),
                    self.config.max_retries,
                    now,
                )
            })
            .collect();
        if !records.is_empty() {
            self.deliveries.enqueue(records).await?;
        }

        let local: Vec<String> = local.into_iter().collect();
        if !local.is_empty() {
            self.deliver_local(&local, &activity).await?;
        }

        info!(
            id = %activity.id,
            kind = activity.kind.as_str(),
            enqueued,
            "accepted outbox submission"
        );
        Ok(SubmitOutcome {
            activity_id: activity.id.clone(),
            object_id,
            enqueued,
        })
    }

    /// Follow-set bookkeeping the submitting side owns: an `Accept` of a
    /// pending follow admits the follower, an `Undo` of one's own follow
    /// drops the following entry. The remote side runs its own handlers on
    /// receipt.
    async fn apply_submission_effects(
        &self,
        username: &str,
        actor: &Actor,
        activity: &Activity,
    ) -> Result<(), Error> {
        match activity.kind {
            ActivityKind::Accept => {
                if let Some(follow) = self.referenced_activity(activity).await? {
                    if follow.kind == ActivityKind::Follow
                        && follow.object_uri() == Some(&actor.id)
                    {
                        self.actors.add_follower(username, &follow.actor).await?;
                    }
                }
            }
            ActivityKind::Undo => {
                if let Some(original) = self.referenced_activity(activity).await? {
                    if original.kind == ActivityKind::Follow && original.actor == actor.id {
                        if let Some(followed) = original.object_uri() {
                            self.actors.remove_following(username, followed).await?;
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Wrap bare objects in a `Create` and assign local URIs.
    fn normalize(&self, username: &str, actor: &Actor, document: Value) -> Result<Value, Error> {
        let Value::Object(_) = &document else {
            return Err(Error::Validation("submission must be a json object".into()));
        };
        let kind = document
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("submission is missing a type".into()))?;

        let mut document = if ActivityKind::parse(kind).is_some() {
            document
        } else {
            // bare object: wrap it, hoisting the addressing
            let to = document.get("to").cloned().unwrap_or(Value::Null);
            let cc = document.get("cc").cloned().unwrap_or(Value::Null);
            let mut wrapper = json!({
                "@context": "https://www.w3.org/ns/activitystreams",
                "type": "Create",
                "object": document,
            });
            if !to.is_null() {
                wrapper["to"] = to;
            }
            if !cc.is_null() {
                wrapper["cc"] = cc;
            }
            wrapper
        };

        let now = self.config.now();
        document["id"] = Value::String(self.config.new_activity_uri(username).into());
        document["actor"] = Value::String(actor.id.clone().into());
        if document.get("published").is_none() {
            document["published"] = Value::String(now.to_rfc3339());
        }

        // a fresh inline object gets a local URI, the owner back-link and its
        // derived-collection links
        let is_create = document.get("type").and_then(Value::as_str) == Some("Create");
        if is_create {
            if let Some(object) = document.get_mut("object") {
                if object.is_object() {
                    if object.get("id").is_none() {
                        object["id"] =
                            Value::String(self.config.new_object_uri(username).into());
                    }
                    if let Some(object_id) = object.get("id").and_then(Value::as_str) {
                        let object_id = object_id.to_owned();
                        for collection in ["replies", "likes", "shares"] {
                            if object.get(collection).is_none() {
                                object[collection] =
                                    Value::String(format!("{object_id}/{collection}"));
                            }
                        }
                    }
                    object["attributedTo"] = Value::String(actor.id.clone().into());
                    if object.get("published").is_none() {
                        object["published"] = Value::String(now.to_rfc3339());
                    }
                }
            }
        }

        Ok(document)
    }

    /// The union of direct recipients and, when the actor's own followers
    /// collection is addressed, every follower — deduplicated by shared
    /// inbox. Returns remote inbox URLs and local usernames separately.
    async fn compute_envelope(
        &self,
        username: &str,
        activity: &Activity,
    ) -> Result<(Vec<Url>, BTreeSet<String>), Error> {
        let mut inboxes = BTreeSet::new();
        let mut local = BTreeSet::new();
        let own_followers = self.config.followers_uri(username);
        let public = public();

        let mut fan_out_followers = false;
        for uri in activity.audience() {
            if *uri == public {
                // public produces no delivery targets beyond followers and
                // direct recipients
                continue;
            }
            if *uri == own_followers {
                fan_out_followers = true;
                continue;
            }
            if let Some(local_name) = self.config.local_username_of(uri) {
                if local_name != username {
                    local.insert(local_name);
                }
                continue;
            }
            if self.config.is_local_url(uri) {
                continue;
            }
            match self.recipient_inbox(uri).await {
                Ok(inbox) => {
                    inboxes.insert(inbox);
                }
                Err(err) => debug!(%uri, %err, "skipping unresolvable recipient"),
            }
        }

        if fan_out_followers {
            let (followers, _) = self
                .actors
                .list_followers(username, usize::MAX, 0)
                .await?;
            for follower in followers {
                if let Some(local_name) = self.config.local_username_of(&follower) {
                    local.insert(local_name);
                    continue;
                }
                match self.recipient_inbox(&follower).await {
                    Ok(inbox) => {
                        inboxes.insert(inbox);
                    }
                    Err(err) => debug!(follower = %follower, %err, "skipping follower"),
                }
            }
        }

        let mut targets = Vec::with_capacity(inboxes.len());
        for inbox in inboxes {
            if let Err(err) = self.config.verify_url_valid(&inbox).await {
                debug!(%inbox, %err, "inbox url invalid, skipping");
                continue;
            }
            targets.push(inbox);
        }
        Ok((targets, local))
    }

    /// Preferred delivery inbox of a recipient: the shared inbox when the
    /// actor advertises one.
    async fn recipient_inbox(&self, uri: &Url) -> Result<Url, Error> {
        if let Some(known) = self.actors.get_by_id(uri).await? {
            return Ok(known.shared_inbox_or_inbox());
        }
        let fetched = self.resolver.fetch_actor(uri).await?;
        Ok(fetched.shared_inbox_or_inbox())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::FederationConfig,
        model::ActorKind,
        protocol::activity::ActivityKind,
        signatures::tests::test_keypair,
        store::{memory::MemoryStore, ActivityRepo, ActorRepo, DeliveryRepo, ObjectRepo},
    };
    use chrono::Utc;
    use std::sync::Arc;

    async fn engine() -> (FederationEngine, Arc<MemoryStore>) {
        let config = FederationConfig::builder()
            .domain("example.com")
            .debug(true)
            .build()
            .expect("valid config");
        FederationEngine::with_memory_store(config)
            .await
            .expect("engine")
    }

    fn local_actor(config: &FederationConfig, username: &str) -> crate::model::Actor {
        crate::model::Actor::new_local(config, username, ActorKind::Person).expect("keygen")
    }

    fn remote_actor(id: &str, shared_inbox: Option<&str>) -> crate::model::Actor {
        let url = Url::parse(id).expect("url");
        let keypair = test_keypair();
        let now = Utc::now();
        crate::model::Actor {
            id: url,
            username: None,
            kind: ActorKind::Person,
            display_name: None,
            summary: None,
            icon: None,
            inbox: Url::parse(&format!("{id}/inbox")).expect("url"),
            outbox: Url::parse(&format!("{id}/outbox")).expect("url"),
            followers_url: Url::parse(&format!("{id}/followers")).expect("url"),
            following_url: Url::parse(&format!("{id}/following")).expect("url"),
            shared_inbox: shared_inbox.map(|uri| Url::parse(uri).expect("url")),
            public_key_pem: keypair.public_key,
            private_key_pem: None,
            manually_approves_followers: false,
            local: false,
            published: now,
            last_refreshed_at: now,
        }
    }

    fn note_submission() -> Value {
        json!({
            "type": "Note",
            "content": "hello",
            "to": ["https://www.w3.org/ns/activitystreams#Public"],
            "cc": ["http://example.com/users/alice/followers"],
        })
    }

    #[tokio::test]
    async fn bare_note_is_wrapped_and_fanned_out() {
        let (engine, store) = engine().await;
        ActorRepo::save(&*store, &local_actor(engine.config(), "alice"))
            .await
            .expect("save");
        for (id, shared) in [
            ("http://one.test/users/u1", None),
            ("http://two.test/users/u2", Some("http://two.test/inbox")),
            ("http://two.test/users/u3", Some("http://two.test/inbox")),
        ] {
            let follower = remote_actor(id, shared);
            ActorRepo::save(&*store, &follower).await.expect("save");
            store
                .add_follower("alice", &follower.id)
                .await
                .expect("follow");
        }

        let outcome = engine
            .submit_activity("alice", note_submission())
            .await
            .expect("submit");

        // wrapped in a Create under a local activity URI
        assert!(outcome
            .activity_id
            .as_str()
            .starts_with("http://example.com/users/alice/activities/"));
        let activity = ActivityRepo::get_by_id(store.as_ref(), &outcome.activity_id)
            .await
            .expect("get")
            .expect("stored");
        assert_eq!(activity.kind, ActivityKind::Create);

        // object stored under a local object URI with the owner back-link
        let object_id = outcome.object_id.expect("object id");
        assert!(object_id
            .as_str()
            .starts_with("http://example.com/users/alice/objects/"));
        let object = ObjectRepo::get_by_id(store.as_ref(), &object_id)
            .await
            .expect("get")
            .expect("stored");
        assert_eq!(
            object.attributed_to.as_str(),
            "http://example.com/users/alice"
        );

        // outbox lists it
        let (outbox, total) = store.list_outbox("alice", 10, 0).await.expect("outbox");
        assert_eq!((outbox.len(), total), (1, 1));

        // one delivery per distinct inbox: u1's own inbox plus the shared
        // inbox of two.test, deduplicated
        assert_eq!(outcome.enqueued, 2);
        let leased = store.lease_pending(10, Utc::now()).await.expect("lease");
        let mut targets: Vec<String> = leased
            .iter()
            .map(|record| record.target_inbox.to_string())
            .collect();
        targets.sort();
        assert_eq!(
            targets,
            vec![
                "http://one.test/users/u1/inbox".to_owned(),
                "http://two.test/inbox".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn identical_submissions_get_distinct_uris() {
        let (engine, store) = engine().await;
        ActorRepo::save(&*store, &local_actor(engine.config(), "alice"))
            .await
            .expect("save");

        let first = engine
            .submit_activity("alice", note_submission())
            .await
            .expect("submit");
        let second = engine
            .submit_activity("alice", note_submission())
            .await
            .expect("submit");
        assert_ne!(first.activity_id, second.activity_id);
        assert_ne!(first.object_id, second.object_id);

        let (_, total) = store.list_outbox("alice", 10, 0).await.expect("outbox");
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn local_recipients_bypass_the_queue() {
        let (engine, store) = engine().await;
        ActorRepo::save(&*store, &local_actor(engine.config(), "alice"))
            .await
            .expect("save");
        ActorRepo::save(&*store, &local_actor(engine.config(), "carol"))
            .await
            .expect("save");

        let submission = json!({
            "type": "Note",
            "content": "hi carol",
            "to": ["http://example.com/users/carol"],
        });
        let outcome = engine
            .submit_activity("alice", submission)
            .await
            .expect("submit");

        assert_eq!(outcome.enqueued, 0);
        assert!(store.lease_pending(10, Utc::now()).await.expect("lease").is_empty());
        let (inbox, _) = store.list_inbox("carol", 10, 0).await.expect("inbox");
        assert_eq!(inbox[0].id, outcome.activity_id);
    }

    #[tokio::test]
    async fn submission_by_unknown_user_is_not_found() {
        let (engine, _) = engine().await;
        let err = engine
            .submit_activity("nobody", note_submission())
            .await
            .expect_err("unknown");
        assert_eq!(err, Error::NotFound);
    }

    #[tokio::test]
    async fn submitted_activity_keeps_client_kind() {
        let (engine, store) = engine().await;
        ActorRepo::save(&*store, &local_actor(engine.config(), "alice"))
            .await
            .expect("save");
        ActorRepo::save(
            &*store,
            &remote_actor("http://remote.test/users/bob", None),
        )
        .await
        .expect("save");

        let like = json!({
            "type": "Like",
            "to": ["http://remote.test/users/bob"],
            "object": "http://remote.test/n/1",
        });
        let outcome = engine.submit_activity("alice", like).await.expect("submit");
        let activity = ActivityRepo::get_by_id(store.as_ref(), &outcome.activity_id)
            .await
            .expect("get")
            .expect("stored");
        assert_eq!(activity.kind, ActivityKind::Like);
        assert!(outcome.object_id.is_none());
        assert_eq!(outcome.enqueued, 1);
    }

    #[tokio::test]
    async fn accepting_a_pending_follow_admits_the_follower() {
        let (engine, store) = engine().await;
        let mut alice = local_actor(engine.config(), "alice");
        alice.manually_approves_followers = true;
        ActorRepo::save(&*store, &alice).await.expect("save");
        ActorRepo::save(
            &*store,
            &remote_actor("http://remote.test/users/bob", None),
        )
        .await
        .expect("save");

        // the pending follow sits in alice's inbox
        let follow = crate::protocol::activity::Activity::parse(
            br#"{"id":"http://remote.test/a/1","type":"Follow",
                "actor":"http://remote.test/users/bob",
                "object":"http://example.com/users/alice"}"#,
        )
        .expect("parse");
        store.save_inbox("alice", &follow, Utc::now()).await.expect("save");
        let (_, total) = store.list_followers("alice", 10, 0).await.expect("list");
        assert_eq!(total, 0);

        // alice approves
        let accept = json!({
            "type": "Accept",
            "to": ["http://remote.test/users/bob"],
            "object": "http://remote.test/a/1",
        });
        let outcome = engine.submit_activity("alice", accept).await.expect("submit");
        assert_eq!(outcome.enqueued, 1);

        let (followers, _) = store.list_followers("alice", 10, 0).await.expect("list");
        assert_eq!(followers[0].as_str(), "http://remote.test/users/bob");
    }

    #[tokio::test]
    async fn undoing_own_follow_drops_the_following_entry() {
        let (engine, store) = engine().await;
        ActorRepo::save(&*store, &local_actor(engine.config(), "alice"))
            .await
            .expect("save");
        let bob = remote_actor("http://remote.test/users/bob", None);
        ActorRepo::save(&*store, &bob).await.expect("save");

        let follow = crate::protocol::activity::Activity::parse(
            br#"{"id":"http://example.com/users/alice/activities/f1","type":"Follow",
                "actor":"http://example.com/users/alice",
                "object":"http://remote.test/users/bob"}"#,
        )
        .expect("parse");
        store.save_outbox("alice", &follow, Utc::now()).await.expect("save");
        store.add_following("alice", &bob.id).await.expect("following");

        let undo = json!({
            "type": "Undo",
            "to": ["http://remote.test/users/bob"],
            "object": "http://example.com/users/alice/activities/f1",
        });
        let outcome = engine.submit_activity("alice", undo).await.expect("submit");
        assert_eq!(outcome.enqueued, 1);

        let (_, total) = store.list_following("alice", 10, 0).await.expect("list");
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn follow_then_accept_roundtrip_locally() {
        // alice and carol on the same instance: a Follow submitted by alice
        // is auto-accepted by carol's side without touching the queue
        let (engine, store) = engine().await;
        ActorRepo::save(&*store, &local_actor(engine.config(), "alice"))
            .await
            .expect("save");
        ActorRepo::save(&*store, &local_actor(engine.config(), "carol"))
            .await
            .expect("save");

        let follow = json!({
            "type": "Follow",
            "to": ["http://example.com/users/carol"],
            "object": "http://example.com/users/carol",
        });
        engine.submit_activity("alice", follow).await.expect("submit");

        let (followers, _) = store.list_followers("carol", 10, 0).await.expect("list");
        assert_eq!(followers[0].as_str(), "http://example.com/users/alice");
        // and carol's acceptance flowed back into alice's following set
        let (following, _) = store.list_following("alice", 10, 0).await.expect("list");
        assert_eq!(following[0].as_str(), "http://example.com/users/carol");
    }
}
