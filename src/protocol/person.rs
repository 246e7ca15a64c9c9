//! Wire document for actors

use crate::{
    error::Error,
    model::{Actor, ActorKind},
    protocol::{helpers::deserialize_skip_error, public_key::PublicKey},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// An actor document as it appears on the wire.
///
/// Named `Person` after its most common kind; the `type` field carries the
/// actual kind for services, groups and the like.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    /// Actor kind
    #[serde(rename = "type")]
    pub kind: ActorKind,
    /// Stable actor URI
    pub id: Url,
    /// Local handle on the owning instance
    pub preferred_username: String,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Profile summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Avatar
    #[serde(default, deserialize_with = "deserialize_skip_error")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    /// Inbox URL
    pub inbox: Url,
    /// Outbox URL; some implementations omit it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox: Option<Url>,
    /// Followers collection URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers: Option<Url>,
    /// Following collection URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following: Option<Url>,
    /// Additional delivery endpoints
    #[serde(default, deserialize_with = "deserialize_skip_error")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Endpoints>,
    /// Signing key
    pub public_key: PublicKey,
    /// Whether follows need explicit approval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manually_approves_followers: Option<bool>,
    /// Creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

/// Actor avatar
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Icon {
    /// Image URL
    pub url: Url,
}

/// Actor-level delivery endpoints
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    /// Instance-level shared inbox
    pub shared_inbox: Option<Url>,
}

impl Person {
    /// Render a stored actor as its wire document.
    pub fn from_actor(actor: &Actor) -> Person {
        Person {
            kind: actor.kind,
            id: actor.id.clone(),
            preferred_username: actor
                .username
                .clone()
                .unwrap_or_else(|| actor.id.path().rsplit('/').next().unwrap_or_default().to_owned()),
            name: actor.display_name.clone(),
            summary: actor.summary.clone(),
            icon: actor.icon.clone().map(|url| Icon { url }),
            inbox: actor.inbox.clone(),
            outbox: Some(actor.outbox.clone()),
            followers: Some(actor.followers_url.clone()),
            following: Some(actor.following_url.clone()),
            endpoints: actor.shared_inbox.clone().map(|shared_inbox| Endpoints {
                shared_inbox: Some(shared_inbox),
            }),
            public_key: PublicKey::new(actor.id.clone(), actor.public_key_pem.clone()),
            manually_approves_followers: Some(actor.manually_approves_followers),
            published: Some(actor.published),
        }
    }

    /// Convert a fetched remote document into a stored actor record.
    ///
    /// The key must belong to the document: a `publicKey.owner` pointing at a
    /// different actor is rejected.
    pub fn into_actor(self, now: DateTime<Utc>) -> Result<Actor, Error> {
        if self.public_key.owner != self.id {
            return Err(Error::UrlVerification("Public key owner does not match actor"));
        }
        let fallback = |suffix: &str| -> Url {
            #[allow(clippy::expect_used)]
            Url::parse(&format!("{}/{suffix}", self.id))
                .expect("actor id with path suffix is a valid url")
        };
        Ok(Actor {
            followers_url: self.followers.unwrap_or_else(|| fallback("followers")),
            following_url: self.following.unwrap_or_else(|| fallback("following")),
            outbox: self.outbox.unwrap_or_else(|| fallback("outbox")),
            id: self.id,
            username: None,
            kind: self.kind,
            display_name: self.name,
            summary: self.summary,
            icon: self.icon.map(|icon| icon.url),
            inbox: self.inbox,
            shared_inbox: self.endpoints.and_then(|endpoints| endpoints.shared_inbox),
            public_key_pem: self.public_key.public_key_pem,
            private_key_pem: None,
            manually_approves_followers: self.manually_approves_followers.unwrap_or(false),
            local: false,
            published: self.published.unwrap_or(now),
            last_refreshed_at: now,
        })
    }
}
