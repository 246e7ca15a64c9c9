//! Normalized records stored by the repositories.
//!
//! These are identity-by-URI: records reference each other through `Url`s,
//! never through live handles, so the actor → outbox → activity → actor cycle
//! stays reference-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// The closed set of actor kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorKind {
    /// An individual user
    Person,
    /// An automated service
    Service,
    /// A group of users
    Group,
    /// An organization
    Organization,
    /// A software application, used for the system actor
    Application,
}

/// A federation participant, local or remote.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Actor {
    /// Stable, globally unique URI
    pub id: Url,
    /// Unique local username; `None` for remote actors
    pub username: Option<String>,
    /// Actor kind
    pub kind: ActorKind,
    /// Display name, if any
    pub display_name: Option<String>,
    /// Profile summary, if any
    pub summary: Option<String>,
    /// Avatar URL, if any
    pub icon: Option<Url>,
    /// Where activities for this actor are delivered
    pub inbox: Url,
    /// Where activities by this actor are published
    pub outbox: Url,
    /// Followers collection URI
    pub followers_url: Url,
    /// Following collection URI
    pub following_url: Url,
    /// Instance-level inbox advertised by the actor's server, if any
    pub shared_inbox: Option<Url>,
    /// Public key in PEM format
    pub public_key_pem: String,
    /// Private key in PEM format. Always present for local actors, never for
    /// remote ones.
    pub private_key_pem: Option<String>,
    /// Whether incoming follows require explicit approval
    pub manually_approves_followers: bool,
    /// Whether this actor is owned by this instance
    pub local: bool,
    /// Creation time
    pub published: DateTime<Utc>,
    /// When this record was last fetched from its origin; local actors never
    /// refresh
    pub last_refreshed_at: DateTime<Utc>,
}

impl Actor {
    /// Create a locally-owned actor with a fresh keypair and the standard
    /// local URIs. Identity providers call this when materializing users.
    pub fn new_local(
        config: &crate::config::FederationConfig,
        username: &str,
        kind: ActorKind,
    ) -> Result<Actor, crate::error::Error> {
        let keypair = crate::signatures::generate_actor_keypair()?;
        let now = config.now();
        Ok(Actor {
            id: config.actor_uri(username),
            username: Some(username.to_owned()),
            kind,
            display_name: None,
            summary: None,
            icon: None,
            inbox: config.inbox_uri(username),
            outbox: config.outbox_uri(username),
            followers_url: config.followers_uri(username),
            following_url: config.following_uri(username),
            shared_inbox: Some(config.shared_inbox_uri()),
            public_key_pem: keypair.public_key,
            private_key_pem: Some(keypair.private_key),
            manually_approves_followers: false,
            local: true,
            published: now,
            last_refreshed_at: now,
        })
    }

    /// URI of the actor's signing key, `{id}#main-key`
    pub fn key_id(&self) -> String {
        crate::protocol::public_key::main_key_id(&self.id)
    }

    /// Returns shared inbox if it exists, normal inbox otherwise.
    pub fn shared_inbox_or_inbox(&self) -> Url {
        self.shared_inbox.clone().unwrap_or_else(|| self.inbox.clone())
    }
}

/// The closed set of object kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A short textual note
    Note,
    /// A long-form article
    Article,
    /// An image
    Image,
    /// A video
    Video,
    /// A generic document
    Document,
    /// A poll
    Question,
}

/// Stored content acted upon by activities.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApObject {
    /// Stable URI; for local objects `{base}/users/{u}/objects/{uuid}`
    pub id: Url,
    /// Object kind
    pub kind: ObjectKind,
    /// Owning actor URI. Local objects always back-link their owner.
    pub attributed_to: Url,
    /// Pre-sanitized content
    pub content: Option<String>,
    /// Parent object URI when this is a reply
    pub in_reply_to: Option<Url>,
    /// Publication time
    pub published: DateTime<Utc>,
    /// Addressed recipients
    pub to: Vec<Url>,
    /// Carbon-copied recipients
    pub cc: Vec<Url>,
    /// Replies collection URI, if assigned
    pub replies: Option<Url>,
    /// Likes collection URI, if assigned
    pub likes: Option<Url>,
    /// Shares collection URI, if assigned
    pub shares: Option<Url>,
    /// Set by `Delete`; a tombstoned object serves a `Tombstone` document
    pub tombstoned: bool,
}
