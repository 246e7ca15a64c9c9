//! The closed activity set, its wire document and the normalizing extractor.
//!
//! Incoming documents are parsed into [Activity] exactly once, at ingestion.
//! Downstream code works with the extracted record and never re-parses JSON;
//! the original bytes are retained so persisted activities stay byte-equivalent
//! with what was received.

use crate::{
    error::Error,
    protocol::{
        helpers::{deserialize_one_or_many, deserialize_url_or_id},
        object::ObjectDoc,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// The closed set of activity types handled by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    /// Publish an object
    Create,
    /// Replace a previously published object
    Update,
    /// Tombstone an object
    Delete,
    /// Request to follow an actor
    Follow,
    /// Approve an activity, typically a `Follow`
    Accept,
    /// Decline an activity, typically a `Follow`
    Reject,
    /// Retract a prior activity by reference
    Undo,
    /// Like an object
    Like,
    /// Boost an object to one's followers
    Announce,
    /// Add an object to a collection
    Add,
    /// Remove an object from a collection
    Remove,
    /// Block an actor
    Block,
    /// Report an object or actor
    Flag,
}

impl ActivityKind {
    /// Parse a `type` value, returning `None` outside the supported set.
    pub fn parse(kind: &str) -> Option<ActivityKind> {
        use ActivityKind::{
            Accept, Add, Announce, Block, Create, Delete, Flag, Follow, Like, Reject, Remove,
            Undo, Update,
        };
        Some(match kind {
            "Create" => Create,
            "Update" => Update,
            "Delete" => Delete,
            "Follow" => Follow,
            "Accept" => Accept,
            "Reject" => Reject,
            "Undo" => Undo,
            "Like" => Like,
            "Announce" => Announce,
            "Add" => Add,
            "Remove" => Remove,
            "Block" => Block,
            "Flag" => Flag,
            _ => return None,
        })
    }

    /// The wire `type` string
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Create => "Create",
            ActivityKind::Update => "Update",
            ActivityKind::Delete => "Delete",
            ActivityKind::Follow => "Follow",
            ActivityKind::Accept => "Accept",
            ActivityKind::Reject => "Reject",
            ActivityKind::Undo => "Undo",
            ActivityKind::Like => "Like",
            ActivityKind::Announce => "Announce",
            ActivityKind::Add => "Add",
            ActivityKind::Remove => "Remove",
            ActivityKind::Block => "Block",
            ActivityKind::Flag => "Flag",
        }
    }
}

/// The `object` field of an activity: a reference, an inline object, or a
/// nested activity (eg. the `Follow` inside an `Accept`).
#[derive(Clone, Debug)]
pub enum ActivityObject {
    /// Reference by URI
    Uri(Url),
    /// Inline content object
    Object(Box<ObjectDoc>),
    /// Nested activity
    Activity(Box<Activity>),
}

impl ActivityObject {
    /// The id of the referenced thing, whatever its shape.
    pub fn uri(&self) -> Option<&Url> {
        match self {
            ActivityObject::Uri(uri) => Some(uri),
            ActivityObject::Object(doc) => doc.id.as_ref(),
            ActivityObject::Activity(activity) => Some(&activity.id),
        }
    }
}

/// Wire shape of an activity; tolerant of the common cross-implementation
/// variations (single-or-array addressing, embedded actor objects).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityDoc {
    id: Url,
    #[serde(rename = "type")]
    kind: String,
    #[serde(deserialize_with = "deserialize_url_or_id")]
    actor: Url,
    #[serde(default)]
    object: Option<Value>,
    #[serde(default)]
    target: Option<Url>,
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    to: Vec<Url>,
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    cc: Vec<Url>,
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    bcc: Vec<Url>,
    #[serde(default)]
    published: Option<DateTime<Utc>>,
}

/// A normalized activity record.
#[derive(Clone, Debug)]
pub struct Activity {
    /// Stable, dereferenceable id
    pub id: Url,
    /// Activity type
    pub kind: ActivityKind,
    /// Performing actor
    pub actor: Url,
    /// Acted-upon object
    pub object: Option<ActivityObject>,
    /// Indirect object, eg. the collection of an `Add`
    pub target: Option<Url>,
    /// Addressed recipients
    pub to: Vec<Url>,
    /// Carbon-copied recipients
    pub cc: Vec<Url>,
    /// Blind-copied recipients
    pub bcc: Vec<Url>,
    /// Publication time
    pub published: Option<DateTime<Utc>>,
    raw: Bytes,
}

impl Activity {
    /// Parse and normalize a received document.
    pub fn parse(body: &[u8]) -> Result<Activity, Error> {
        let doc: ActivityDoc = serde_json::from_slice(body)
            .map_err(|err| Error::Validation(err.to_string()))?;
        Activity::from_doc(doc, Bytes::copy_from_slice(body))
    }

    /// Normalize an in-memory JSON document, eg. one built by the outbox.
    pub fn from_value(value: &Value) -> Result<Activity, Error> {
        let doc: ActivityDoc = serde_json::from_value(value.clone())
            .map_err(|err| Error::Validation(err.to_string()))?;
        let raw = serde_json::to_vec(value).map_err(Error::other)?;
        Activity::from_doc(doc, raw.into())
    }

    fn from_doc(doc: ActivityDoc, raw: Bytes) -> Result<Activity, Error> {
        let kind = ActivityKind::parse(&doc.kind)
            .ok_or_else(|| Error::UnsupportedType(doc.kind.clone()))?;
        let object = doc.object.map(|value| parse_object(&value)).transpose()?;
        Ok(Activity {
            id: doc.id,
            kind,
            actor: doc.actor,
            object,
            target: doc.target,
            to: doc.to,
            cc: doc.cc,
            bcc: doc.bcc,
            published: doc.published,
            raw,
        })
    }

    /// The bytes this record was extracted from.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// All addressing entries, in `to`, `cc`, `bcc` order.
    pub fn audience(&self) -> impl Iterator<Item = &Url> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Whether the activity is addressed to the public collection.
    pub fn is_public(&self) -> bool {
        let public = public();
        self.audience().any(|uri| *uri == public)
    }

    /// Id of the acted-upon object, however the `object` field is shaped.
    pub fn object_uri(&self) -> Option<&Url> {
        self.object.as_ref().and_then(ActivityObject::uri)
    }

    /// The inline content object, for `Create`/`Update`.
    pub fn inner_object(&self) -> Option<&ObjectDoc> {
        match &self.object {
            Some(ActivityObject::Object(doc)) => Some(doc.as_ref()),
            _ => None,
        }
    }

    /// The nested activity, for `Accept`/`Reject`/`Undo`.
    pub fn inner_activity(&self) -> Option<&Activity> {
        match &self.object {
            Some(ActivityObject::Activity(activity)) => Some(activity.as_ref()),
            _ => None,
        }
    }

    /// Id of the acted-upon object, or a validation error naming the field.
    pub fn require_object_uri(&self) -> Result<&Url, Error> {
        self.object_uri()
            .ok_or_else(|| Error::Validation("activity is missing its object".into()))
    }
}

fn parse_object(value: &Value) -> Result<ActivityObject, Error> {
    if let Value::String(uri) = value {
        let uri = Url::parse(uri).map_err(|err| Error::Validation(err.to_string()))?;
        return Ok(ActivityObject::Uri(uri));
    }

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation("inline object is missing a type".into()))?;

    if ActivityKind::parse(kind).is_some() {
        let nested = Activity::from_value(value)?;
        return Ok(ActivityObject::Activity(Box::new(nested)));
    }

    if let Ok(doc) = serde_json::from_value::<ObjectDoc>(value.clone()) {
        return Ok(ActivityObject::Object(Box::new(doc)));
    }

    // Tombstones and exotic types reduce to their id
    if let Some(id) = value.get("id").and_then(Value::as_str) {
        let uri = Url::parse(id).map_err(|err| Error::Validation(err.to_string()))?;
        return Ok(ActivityObject::Uri(uri));
    }

    Err(Error::Validation(format!("unusable inline object of type {kind}")))
}

/// The special public collection, `https://www.w3.org/ns/activitystreams#Public`
pub fn public() -> Url {
    activitystreams_kinds::public()
}
