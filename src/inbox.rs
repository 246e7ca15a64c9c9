//! Inbox pipeline: receive, authenticate, dedupe, route, dispatch.
//!
//! Recipients are persisted before the per-type handlers run, so within one
//! actor's inbox the persistence order is the receipt order. Handlers are
//! idempotent and commutative in outcome for reordered `Undo` pairs.

use crate::{
    engine::FederationEngine,
    error::Error,
    model::Actor,
    protocol::{
        activity::{Activity, ActivityKind},
        verification::verify_domains_match,
    },
    signatures::{verify_body_digest, verify_date, verify_request, SignatureHeader},
};
use bytes::Bytes;
use http::{uri::PathAndQuery, HeaderMap, Method, Uri};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Raw parts of an inbox POST, independent of the web framework.
#[derive(Debug)]
pub struct InboxRequest {
    /// All request headers
    pub headers: HeaderMap,
    /// Request method, always `POST` in practice
    pub method: Method,
    /// Request target, as signed
    pub uri: Uri,
    /// The request body
    pub body: Bytes,
}

/// What the pipeline did with a received activity. All variants surface as
/// 202 on the wire.
#[derive(Debug, PartialEq, Eq)]
pub enum InboxOutcome {
    /// Persisted and dispatched
    Accepted,
    /// Duplicate of an already-stored activity; no side effects
    AlreadySeen,
    /// Accepted and ignored, eg. an unsupported type
    Ignored(String),
}

impl FederationEngine {
    /// Receive a signed activity POSTed to a local inbox.
    ///
    /// `recipient` is the owning username for `/users/{u}/inbox`, or `None`
    /// for the shared inbox, where recipients are routed purely by
    /// addressing.
    pub async fn receive_activity(
        &self,
        request: InboxRequest,
        recipient: Option<&str>,
    ) -> Result<InboxOutcome, Error> {
        if request.body.len() > self.config.max_body_bytes {
            return Err(Error::Validation("request body too large".into()));
        }
        if let Some(username) = recipient {
            if self.local_actor(username).await?.is_none() {
                return Err(Error::NotFound);
            }
        }

        let activity = match Activity::parse(&request.body) {
            Ok(activity) => activity,
            Err(Error::UnsupportedType(kind)) => {
                debug!(%kind, "ignoring activity of unsupported type");
                return Ok(InboxOutcome::Ignored(kind));
            }
            Err(err) => return Err(err),
        };

        verify_body_digest(request.headers.get("digest"), &request.body)?;
        verify_date(
            request.headers.get("date"),
            self.config.now(),
            self.config.clock_skew,
        )?;

        // Basic sanity of the claimed origin: id and actor must share a host,
        // and locally-minted ids never arrive over the network.
        verify_domains_match(&activity.id, &activity.actor)?;
        self.config.verify_url_valid(&activity.id).await?;
        if self.config.is_local_url(&activity.id) {
            return Err(Error::Validation(
                "activity claims to originate from this instance".into(),
            ));
        }

        let signer = self.verify_signature(&request).await?;
        self.authenticate(&activity, &signer)?;

        if self.activities.exists(&activity.id).await? {
            debug!(id = %activity.id, "suppressing replayed activity");
            return Ok(InboxOutcome::AlreadySeen);
        }

        let recipients = self.resolve_recipients(&activity, recipient).await?;
        if recipients.is_empty() {
            debug!(id = %activity.id, "no local recipients, ignoring");
            return Ok(InboxOutcome::Ignored("unaddressed".into()));
        }

        // Persist before dispatching, so inbox order reflects receipt order
        // and a handler crash never loses the activity.
        let now = self.config.now();
        for username in &recipients {
            self.activities.save_inbox(username, &activity, now).await?;
        }

        if let Err(err) = self.dispatch(&activity).await {
            match err {
                Error::Transient(_) | Error::Other(_) => return Err(err),
                // the sender cannot fix these by retrying; accept and log
                err => warn!(id = %activity.id, %err, "handler rejected activity"),
            }
        }

        info!(id = %activity.id, kind = activity.kind.as_str(), "received activity");
        Ok(InboxOutcome::Accepted)
    }

    /// Deliver a locally-produced activity straight into local inboxes,
    /// bypassing signatures and the network.
    pub(crate) async fn deliver_local(
        &self,
        recipients: &[String],
        activity: &Activity,
    ) -> Result<(), Error> {
        let now = self.config.now();
        for username in recipients {
            self.activities.save_inbox(username, activity, now).await?;
        }
        // boxed: local delivery can re-enter the dispatcher through a
        // synthesized response activity
        Box::pin(self.dispatch(activity)).await
    }

    async fn verify_signature(&self, request: &InboxRequest) -> Result<Actor, Error> {
        let header = SignatureHeader::parse(&request.headers)?;
        let path_and_query = request
            .uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .unwrap_or("");

        let signer = self.resolver.resolve_key(&header.key_id).await?;
        let verified = verify_request(
            &request.headers,
            &request.method,
            path_and_query,
            &signer.public_key_pem,
            true,
        );
        match verified {
            Ok(()) => Ok(signer),
            Err(Error::SignatureInvalid) => {
                // the actor may have rotated its key; refresh once and retry
                self.resolver.invalidate_key(&header.key_id).await;
                let signer = self.resolver.resolve_key(&header.key_id).await?;
                verify_request(
                    &request.headers,
                    &request.method,
                    path_and_query,
                    &signer.public_key_pem,
                    true,
                )?;
                Ok(signer)
            }
            Err(err) => Err(err),
        }
    }

    /// Verify a signed GET, for authorized-fetch mode.
    pub async fn verify_get(&self, headers: &HeaderMap, uri: &Uri) -> Result<(), Error> {
        let header = SignatureHeader::parse(headers)?;
        verify_date(headers.get("date"), self.config.now(), self.config.clock_skew)?;
        let signer = self.resolver.resolve_key(&header.key_id).await?;
        let path_and_query = uri.path_and_query().map(PathAndQuery::as_str).unwrap_or("");
        verify_request(headers, &Method::GET, path_and_query, &signer.public_key_pem, false)
    }

    fn authenticate(&self, activity: &Activity, signer: &Actor) -> Result<(), Error> {
        if signer.id == activity.actor {
            return Ok(());
        }
        // Forwarded Announces are delivered by a relay whose signature does
        // not match the announcing actor. Require the claimed actor to at
        // least be plausible for the activity id.
        if activity.kind == ActivityKind::Announce
            && verify_domains_match(&activity.actor, &activity.id).is_ok()
        {
            debug!(id = %activity.id, signer = %signer.id, "accepting forwarded announce");
            return Ok(());
        }
        Err(Error::ActorMismatch {
            signer: Box::new(signer.id.clone()),
            actor: Box::new(activity.actor.clone()),
        })
    }

    /// Which local users should see this activity.
    async fn resolve_recipients(
        &self,
        activity: &Activity,
        direct: Option<&str>,
    ) -> Result<Vec<String>, Error> {
        let mut recipients = BTreeSet::new();
        if let Some(username) = direct {
            recipients.insert(username.to_owned());
        }

        for uri in activity.audience() {
            // explicit local actor addressing
            if let Some(username) = self.config.local_username_of(uri) {
                if self.actors.get_by_username(&username).await?.is_some() {
                    recipients.insert(username);
                }
                continue;
            }
            // a local actor's followers collection: route to its local members
            if let Some(owner) = self.config.local_followers_username_of(uri) {
                let (followers, _) = self.actors.list_followers(&owner, usize::MAX, 0).await?;
                for follower in followers {
                    if let Some(username) = self.config.local_username_of(&follower) {
                        recipients.insert(username);
                    }
                }
            }
        }

        // public activities reach the sender's local followers via the
        // shared inbox
        if activity.is_public() {
            for username in self.actors.local_followers_of(&activity.actor).await? {
                recipients.insert(username);
            }
        }

        // a follow is for the followed actor even without explicit addressing
        if activity.kind == ActivityKind::Follow {
            if let Some(object) = activity.object_uri() {
                if let Some(username) = self.config.local_username_of(object) {
                    if self.actors.get_by_username(&username).await?.is_some() {
                        recipients.insert(username);
                    }
                }
            }
        }

        Ok(recipients.into_iter().collect())
    }

    /// The per-type state machine.
    async fn dispatch(&self, activity: &Activity) -> Result<(), Error> {
        match activity.kind {
            ActivityKind::Create => self.handle_create(activity).await,
            ActivityKind::Update => self.handle_update(activity).await,
            ActivityKind::Delete => self.handle_delete(activity).await,
            ActivityKind::Follow => self.handle_follow(activity).await,
            ActivityKind::Accept => self.handle_accept(activity).await,
            ActivityKind::Reject => self.handle_reject(activity).await,
            ActivityKind::Undo => self.handle_undo(activity).await,
            // Like/Announce are indexed by persistence alone; the derived
            // collections are computed from the stored records
            ActivityKind::Like | ActivityKind::Announce => Ok(()),
            // persisted for visibility filtering elsewhere, no side effects
            ActivityKind::Add
            | ActivityKind::Remove
            | ActivityKind::Block
            | ActivityKind::Flag => Ok(()),
        }
    }

    async fn handle_create(&self, activity: &Activity) -> Result<(), Error> {
        let Some(doc) = activity.inner_object() else {
            // a Create referencing a remote object by URI carries nothing to
            // persist locally
            return Ok(());
        };
        let record = doc.clone().into_record(self.config.now())?;
        if record.attributed_to != activity.actor {
            return Err(Error::Validation(
                "created object is not attributed to the creating actor".into(),
            ));
        }
        if self.objects.get_by_id(&record.id).await?.is_none() {
            self.objects.save(&record).await?;
        }
        Ok(())
    }

    async fn handle_update(&self, activity: &Activity) -> Result<(), Error> {
        let Some(doc) = activity.inner_object() else {
            return Ok(());
        };
        let record = doc.clone().into_record(self.config.now())?;
        let Some(existing) = self.objects.get_by_id(&record.id).await? else {
            return Err(Error::NotFound);
        };
        if existing.attributed_to != activity.actor {
            return Err(Error::NotAuthorized("update of a foreign object"));
        }
        self.objects.update(&record).await
    }

    async fn handle_delete(&self, activity: &Activity) -> Result<(), Error> {
        let object = activity.require_object_uri()?;
        // Delete(Actor) removes the actor itself
        if *object == activity.actor {
            self.actors.delete(object).await?;
            return Ok(());
        }
        if let Some(existing) = self.objects.get_by_id(object).await? {
            if existing.attributed_to != activity.actor {
                return Err(Error::NotAuthorized("delete of a foreign object"));
            }
            self.objects.tombstone(object).await?;
        }
        Ok(())
    }

    async fn handle_follow(&self, activity: &Activity) -> Result<(), Error> {
        let object = activity.require_object_uri()?;
        let Some(username) = self.config.local_username_of(object) else {
            return Err(Error::NotFound);
        };
        let Some(followed) = self.local_actor(&username).await? else {
            return Err(Error::NotFound);
        };

        if followed.manually_approves_followers {
            // the persisted Follow is the pending state; acceptance happens
            // through the local user's outbox
            info!(follower = %activity.actor, followed = %followed.id, "follow pending approval");
            return Ok(());
        }

        self.actors.add_follower(&username, &activity.actor).await?;
        info!(follower = %activity.actor, followed = %followed.id, "follow accepted");

        // echo the follow back inside the Accept; the outbox assigns the id
        let follow_value: serde_json::Value =
            serde_json::from_slice(activity.raw()).map_err(Error::other)?;
        let accept = json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Accept",
            "to": [activity.actor.clone()],
            "object": follow_value,
        });
        self.submit_activity(&username, accept).await?;
        Ok(())
    }

    /// The follow an `Accept`/`Reject`/`Undo` refers to, either inline or by
    /// id against the store.
    pub(crate) async fn referenced_activity(
        &self,
        activity: &Activity,
    ) -> Result<Option<Activity>, Error> {
        if let Some(inner) = activity.inner_activity() {
            return Ok(Some(inner.clone()));
        }
        match activity.object_uri() {
            Some(uri) => self.activities.get_by_id(uri).await,
            None => Ok(None),
        }
    }

    async fn handle_accept(&self, activity: &Activity) -> Result<(), Error> {
        let Some(follow) = self.referenced_activity(activity).await? else {
            return Ok(());
        };
        if follow.kind != ActivityKind::Follow {
            return Ok(());
        }
        // only meaningful if the accepted follow is one we sent
        let Some(username) = self.config.local_username_of(&follow.actor) else {
            return Ok(());
        };
        let Some(followed) = follow.object_uri() else {
            return Ok(());
        };
        if *followed != activity.actor {
            return Err(Error::NotAuthorized("accept by an actor that was not followed"));
        }
        self.actors.add_following(&username, followed).await?;
        info!(follower = %follow.actor, followed = %followed, "follow confirmed");
        Ok(())
    }

    async fn handle_reject(&self, activity: &Activity) -> Result<(), Error> {
        let Some(follow) = self.referenced_activity(activity).await? else {
            return Ok(());
        };
        if follow.kind != ActivityKind::Follow {
            return Ok(());
        }
        let Some(username) = self.config.local_username_of(&follow.actor) else {
            return Ok(());
        };
        if let Some(followed) = follow.object_uri() {
            // drop any optimistic entry; absent is fine
            self.actors.remove_following(&username, followed).await?;
        }
        Ok(())
    }

    async fn handle_undo(&self, activity: &Activity) -> Result<(), Error> {
        let Some(original) = self.referenced_activity(activity).await? else {
            // undoing something we never saw is a no-op
            return Ok(());
        };
        if original.actor != activity.actor {
            return Err(Error::NotAuthorized("undo of a foreign activity"));
        }
        match original.kind {
            ActivityKind::Follow => {
                let Some(followed) = original.object_uri() else {
                    return Ok(());
                };
                if let Some(username) = self.config.local_username_of(followed) {
                    self.actors.remove_follower(&username, &activity.actor).await?;
                    info!(follower = %activity.actor, followed = %followed, "follow retracted");
                }
                Ok(())
            }
            // Like/Announce retraction is evaluated by the derived queries
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Clock, FederationConfig},
        model::{ActorKind, ObjectKind},
        signatures::{sign_request, tests::test_keypair},
        store::{memory::MemoryStore, ActivityRepo, ActorRepo, DeliveryRepo, ObjectRepo},
    };
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use url::Url;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

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

    fn local_actor(config: &FederationConfig, username: &str, auto_accept: bool) -> Actor {
        let mut actor = Actor::new_local(config, username, ActorKind::Person).expect("keygen");
        actor.manually_approves_followers = !auto_accept;
        actor
    }

    fn remote_actor(id: &str) -> Actor {
        let url = Url::parse(id).expect("url");
        let keypair = test_keypair();
        let now = Utc::now();
        Actor {
            id: url.clone(),
            username: None,
            kind: ActorKind::Person,
            display_name: None,
            summary: None,
            icon: None,
            inbox: Url::parse(&format!("{id}/inbox")).expect("url"),
            outbox: Url::parse(&format!("{id}/outbox")).expect("url"),
            followers_url: Url::parse(&format!("{id}/followers")).expect("url"),
            following_url: Url::parse(&format!("{id}/following")).expect("url"),
            shared_inbox: None,
            public_key_pem: keypair.public_key,
            private_key_pem: None,
            manually_approves_followers: false,
            local: false,
            published: now,
            last_refreshed_at: now,
        }
    }

    fn signed_inbox_request(body: &str, path: &str) -> InboxRequest {
        signed_inbox_request_at(body, path, Utc::now())
    }

    fn signed_inbox_request_at(body: &str, path: &str, date: DateTime<Utc>) -> InboxRequest {
        let url = Url::parse(&format!("http://example.com{path}")).expect("url");
        let headers = sign_request(
            &Method::POST,
            &url,
            Some(body.as_bytes()),
            "http://remote.test/users/bob#main-key",
            crate::signatures::tests::TEST_PRIVATE_KEY,
            date,
        )
        .expect("sign");
        InboxRequest {
            headers,
            method: Method::POST,
            uri: path.parse().expect("uri"),
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    fn follow_body() -> String {
        r#"{"id":"http://remote.test/a/1","type":"Follow",
            "actor":"http://remote.test/users/bob",
            "object":"http://example.com/users/alice"}"#
            .to_owned()
    }

    async fn seed(engine: &FederationEngine, store: &MemoryStore, auto_accept: bool) {
        let alice = local_actor(engine.config(), "alice", auto_accept);
        ActorRepo::save(store, &alice).await.expect("save alice");
        let bob = remote_actor("http://remote.test/users/bob");
        ActorRepo::save(store, &bob).await.expect("save bob");
    }

    #[tokio::test]
    async fn anonymous_follow_is_auto_accepted() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;

        let request = signed_inbox_request(&follow_body(), "/users/alice/inbox");
        let outcome = engine
            .receive_activity(request, Some("alice"))
            .await
            .expect("receive");
        assert_eq!(outcome, InboxOutcome::Accepted);

        // bob is now a follower
        let (followers, _) = store.list_followers("alice", 10, 0).await.expect("list");
        assert_eq!(followers[0].as_str(), "http://remote.test/users/bob");

        // one Accept enqueued for bob's inbox, wrapping the Follow
        let leased = store.lease_pending(10, Utc::now()).await.expect("lease");
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].target_inbox.as_str(), "http://remote.test/users/bob/inbox");
        let accept = Activity::parse(&leased[0].activity).expect("parse accept");
        assert_eq!(accept.kind, ActivityKind::Accept);
        assert_eq!(accept.actor.as_str(), "http://example.com/users/alice");
        assert_eq!(
            accept.inner_activity().expect("inner follow").id.as_str(),
            "http://remote.test/a/1"
        );
    }

    #[tokio::test]
    async fn replayed_follow_is_suppressed() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;

        let first = signed_inbox_request(&follow_body(), "/users/alice/inbox");
        engine.receive_activity(first, Some("alice")).await.expect("receive");
        let second = signed_inbox_request(&follow_body(), "/users/alice/inbox");
        let outcome = engine
            .receive_activity(second, Some("alice"))
            .await
            .expect("receive");
        assert_eq!(outcome, InboxOutcome::AlreadySeen);

        let (followers, total) = store.list_followers("alice", 10, 0).await.expect("list");
        assert_eq!((followers.len(), total), (1, 1));
        // no second Accept was produced
        let leased = store.lease_pending(10, Utc::now()).await.expect("lease");
        assert_eq!(leased.len(), 1);
    }

    #[tokio::test]
    async fn stale_date_is_rejected_without_persistence() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;

        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        let request = signed_inbox_request_at(&follow_body(), "/users/alice/inbox", epoch);
        let err = engine
            .receive_activity(request, Some("alice"))
            .await
            .expect_err("stale");
        assert_eq!(err, Error::StaleDate);

        let follow_id = Url::parse("http://remote.test/a/1").expect("url");
        assert!(!store.exists(&follow_id).await.expect("exists"));
    }

    #[tokio::test]
    async fn manual_approval_keeps_follow_pending() {
        let (engine, store) = engine().await;
        seed(&engine, &store, false).await;

        let request = signed_inbox_request(&follow_body(), "/users/alice/inbox");
        let outcome = engine
            .receive_activity(request, Some("alice"))
            .await
            .expect("receive");
        assert_eq!(outcome, InboxOutcome::Accepted);

        let (_, total) = store.list_followers("alice", 10, 0).await.expect("list");
        assert_eq!(total, 0);
        assert!(store.lease_pending(10, Utc::now()).await.expect("lease").is_empty());
        // the pending follow is in alice's inbox
        let (inbox, _) = store.list_inbox("alice", 10, 0).await.expect("inbox");
        assert_eq!(inbox[0].kind, ActivityKind::Follow);
    }

    #[tokio::test]
    async fn undo_follow_removes_the_follower() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;

        let request = signed_inbox_request(&follow_body(), "/users/alice/inbox");
        engine.receive_activity(request, Some("alice")).await.expect("receive");

        let undo = r#"{"id":"http://remote.test/a/2","type":"Undo",
            "actor":"http://remote.test/users/bob",
            "object":{"id":"http://remote.test/a/1","type":"Follow",
                "actor":"http://remote.test/users/bob",
                "object":"http://example.com/users/alice"}}"#;
        let request = signed_inbox_request(undo, "/users/alice/inbox");
        engine.receive_activity(request, Some("alice")).await.expect("receive");

        let (_, total) = store.list_followers("alice", 10, 0).await.expect("list");
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn create_persists_the_inner_object() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;

        let create = r#"{"id":"http://remote.test/a/3","type":"Create",
            "actor":"http://remote.test/users/bob",
            "to":["http://example.com/users/alice"],
            "object":{"id":"http://remote.test/n/3","type":"Note",
                "attributedTo":"http://remote.test/users/bob","content":"hi alice"}}"#;
        let request = signed_inbox_request(create, "/users/alice/inbox");
        engine.receive_activity(request, Some("alice")).await.expect("receive");

        let note_id = Url::parse("http://remote.test/n/3").expect("url");
        let note = ObjectRepo::get_by_id(store.as_ref(), &note_id)
            .await
            .expect("get")
            .expect("stored");
        assert_eq!(note.kind, ObjectKind::Note);
        assert_eq!(note.content.as_deref(), Some("hi alice"));
    }

    #[tokio::test]
    async fn update_requires_the_owning_actor() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;
        ActorRepo::save(&*store, &remote_actor("http://remote.test/users/eve"))
            .await
            .expect("save");

        let create = r#"{"id":"http://remote.test/a/4","type":"Create",
            "actor":"http://remote.test/users/bob",
            "to":["http://example.com/users/alice"],
            "object":{"id":"http://remote.test/n/4","type":"Note",
                "attributedTo":"http://remote.test/users/bob","content":"v1"}}"#;
        engine
            .receive_activity(signed_inbox_request(create, "/users/alice/inbox"), Some("alice"))
            .await
            .expect("receive");

        // an update claiming a different author is dropped by the handler
        let forged = r#"{"id":"http://remote.test/a/5","type":"Update",
            "actor":"http://remote.test/users/bob",
            "to":["http://example.com/users/alice"],
            "object":{"id":"http://remote.test/n/4","type":"Note",
                "attributedTo":"http://remote.test/users/eve","content":"v2"}}"#;
        engine
            .receive_activity(signed_inbox_request(forged, "/users/alice/inbox"), Some("alice"))
            .await
            .expect("accepted but ignored");

        let note_id = Url::parse("http://remote.test/n/4").expect("url");
        let note = ObjectRepo::get_by_id(store.as_ref(), &note_id)
            .await
            .expect("get")
            .expect("stored");
        assert_eq!(note.content.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn delete_tombstones_the_object() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;

        let create = r#"{"id":"http://remote.test/a/6","type":"Create",
            "actor":"http://remote.test/users/bob",
            "to":["http://example.com/users/alice"],
            "object":{"id":"http://remote.test/n/6","type":"Note",
                "attributedTo":"http://remote.test/users/bob","content":"soon gone"}}"#;
        engine
            .receive_activity(signed_inbox_request(create, "/users/alice/inbox"), Some("alice"))
            .await
            .expect("receive");

        let delete = r#"{"id":"http://remote.test/a/7","type":"Delete",
            "actor":"http://remote.test/users/bob",
            "to":["http://example.com/users/alice"],
            "object":"http://remote.test/n/6"}"#;
        engine
            .receive_activity(signed_inbox_request(delete, "/users/alice/inbox"), Some("alice"))
            .await
            .expect("receive");

        let note_id = Url::parse("http://remote.test/n/6").expect("url");
        let note = ObjectRepo::get_by_id(store.as_ref(), &note_id)
            .await
            .expect("get")
            .expect("kept for tombstoning");
        assert!(note.tombstoned);
        assert!(note.content.is_none());
    }

    #[tokio::test]
    async fn unsupported_type_is_ignored() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;

        let body = r#"{"id":"http://remote.test/a/8","type":"Arrive",
            "actor":"http://remote.test/users/bob"}"#;
        let request = signed_inbox_request(body, "/users/alice/inbox");
        let outcome = engine
            .receive_activity(request, Some("alice"))
            .await
            .expect("receive");
        assert_eq!(outcome, InboxOutcome::Ignored("Arrive".into()));
    }

    #[tokio::test]
    async fn signer_must_match_the_actor() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;

        // signed with bob's key, but claims to be from eve on the same host
        let body = r#"{"id":"http://remote.test/a/9","type":"Follow",
            "actor":"http://remote.test/users/eve",
            "object":"http://example.com/users/alice"}"#;
        ActorRepo::save(&*store, &remote_actor("http://remote.test/users/eve"))
            .await
            .expect("save");
        let request = signed_inbox_request(body, "/users/alice/inbox");
        let err = engine
            .receive_activity(request, Some("alice"))
            .await
            .expect_err("mismatch");
        assert_eq!(
            err,
            Error::ActorMismatch {
                signer: Box::new(Url::parse("http://remote.test/users/bob").expect("url")),
                actor: Box::new(Url::parse("http://remote.test/users/eve").expect("url")),
            }
        );
    }

    #[tokio::test]
    async fn accept_of_our_follow_updates_following() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;

        // alice follows bob; pretend the outbox already sent the Follow
        let follow = Activity::parse(
            br#"{"id":"http://example.com/users/alice/activities/f1","type":"Follow",
                "actor":"http://example.com/users/alice",
                "object":"http://remote.test/users/bob"}"#,
        )
        .expect("parse");
        store.save_outbox("alice", &follow, Utc::now()).await.expect("save");

        let accept = r#"{"id":"http://remote.test/a/10","type":"Accept",
            "actor":"http://remote.test/users/bob",
            "to":["http://example.com/users/alice"],
            "object":"http://example.com/users/alice/activities/f1"}"#;
        engine
            .receive_activity(signed_inbox_request(accept, "/users/alice/inbox"), Some("alice"))
            .await
            .expect("receive");

        let (following, _) = store.list_following("alice", 10, 0).await.expect("list");
        assert_eq!(following[0].as_str(), "http://remote.test/users/bob");

        // a later Undo(Follow) from our side is the outbox's business; a
        // Reject after the fact removes the entry again
        let reject = r#"{"id":"http://remote.test/a/11","type":"Reject",
            "actor":"http://remote.test/users/bob",
            "to":["http://example.com/users/alice"],
            "object":"http://example.com/users/alice/activities/f1"}"#;
        engine
            .receive_activity(signed_inbox_request(reject, "/users/alice/inbox"), Some("alice"))
            .await
            .expect("receive");
        let (_, total) = store.list_following("alice", 10, 0).await.expect("list");
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn like_and_undo_converge_in_the_derived_collection() {
        let (engine, store) = engine().await;
        seed(&engine, &store, true).await;

        // alice publishes a note
        let note = serde_json::json!({
            "type": "Note",
            "content": "like me",
            "to": ["https://www.w3.org/ns/activitystreams#Public"],
        });
        let outcome = engine.submit_activity("alice", note).await.expect("submit");
        let object_id = outcome.object_id.expect("object id");

        // bob likes it
        let like = format!(
            r#"{{"id":"http://remote.test/a/30","type":"Like",
                "actor":"http://remote.test/users/bob",
                "to":["http://example.com/users/alice"],
                "object":"{object_id}"}}"#
        );
        engine
            .receive_activity(signed_inbox_request(&like, "/users/alice/inbox"), Some("alice"))
            .await
            .expect("receive");

        let (_, likes) = store.likes(&object_id, 10, 0).await.expect("likes");
        assert_eq!(likes, 1);
        let bob = Url::parse("http://remote.test/users/bob").expect("url");
        let (_, liked) = store.liked_by(&bob, 10, 0).await.expect("liked");
        assert_eq!(liked, 1);

        // and takes it back
        let undo = r#"{"id":"http://remote.test/a/31","type":"Undo",
            "actor":"http://remote.test/users/bob",
            "to":["http://example.com/users/alice"],
            "object":"http://remote.test/a/30"}"#;
        engine
            .receive_activity(signed_inbox_request(undo, "/users/alice/inbox"), Some("alice"))
            .await
            .expect("receive");

        let (_, likes) = store.likes(&object_id, 10, 0).await.expect("likes");
        assert_eq!(likes, 0);
    }

    #[tokio::test]
    async fn fixed_clock_drives_staleness() {
        let now = Utc::now();
        let config = FederationConfig::builder()
            .domain("example.com")
            .debug(true)
            .clock(Arc::new(FixedClock(now - chrono::Duration::hours(2))) as Arc<dyn Clock>)
            .build()
            .expect("valid config");
        let (engine, store) = FederationEngine::with_memory_store(config).await.expect("engine");
        seed(&engine, &store, true).await;

        // request signed "now" is two hours ahead of the engine clock
        let request = signed_inbox_request_at(&follow_body(), "/users/alice/inbox", now);
        let err = engine
            .receive_activity(request, Some("alice"))
            .await
            .expect_err("stale");
        assert_eq!(err, Error::StaleDate);
    }
}
