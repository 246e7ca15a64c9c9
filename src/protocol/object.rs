//! Wire documents for objects and tombstones

use crate::{
    error::Error,
    model::{ApObject, ObjectKind},
    protocol::helpers::{deserialize_one_or_many, deserialize_url_or_id},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// An object document as it appears on the wire, inline in a `Create`/`Update`
/// or as a bare outbox submission.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDoc {
    /// Object kind
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    /// Stable URI; absent on bare submissions until the outbox assigns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Url>,
    /// Owning actor
    #[serde(default, deserialize_with = "deserialize_opt_url_or_id")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributed_to: Option<Url>,
    /// Pre-sanitized content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Parent object when this is a reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<Url>,
    /// Publication time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    /// Addressed recipients
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<Url>,
    /// Carbon-copied recipients
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<Url>,
    /// Replies collection URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replies: Option<Url>,
    /// Likes collection URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<Url>,
    /// Shares collection URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<Url>,
}

fn deserialize_opt_url_or_id<'de, D>(deserializer: D) -> Result<Option<Url>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_url_or_id(deserializer).map(Some)
}

impl ObjectDoc {
    /// Convert into a stored object record. Requires `id` and `attributedTo`,
    /// which the outbox assigns before persisting and remote `Create`s must
    /// carry.
    pub fn into_record(self, now: DateTime<Utc>) -> Result<ApObject, Error> {
        let id = self
            .id
            .ok_or_else(|| Error::Validation("object is missing an id".into()))?;
        let attributed_to = self
            .attributed_to
            .ok_or_else(|| Error::Validation("object is missing attributedTo".into()))?;
        Ok(ApObject {
            id,
            kind: self.kind,
            attributed_to,
            content: self.content,
            in_reply_to: self.in_reply_to,
            published: self.published.unwrap_or(now),
            to: self.to,
            cc: self.cc,
            replies: self.replies,
            likes: self.likes,
            shares: self.shares,
            tombstoned: false,
        })
    }

    /// Render a stored object record on the wire.
    pub fn from_record(record: &ApObject) -> ObjectDoc {
        ObjectDoc {
            kind: record.kind,
            id: Some(record.id.clone()),
            attributed_to: Some(record.attributed_to.clone()),
            content: record.content.clone(),
            in_reply_to: record.in_reply_to.clone(),
            published: Some(record.published),
            to: record.to.clone(),
            cc: record.cc.clone(),
            replies: record.replies.clone(),
            likes: record.likes.clone(),
            shares: record.shares.clone(),
        }
    }
}

/// Document served in place of a deleted object.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    /// `Tombstone`
    #[serde(rename = "type")]
    pub kind: TombstoneType,
    /// Id of the deleted object
    pub id: Url,
    /// Kind the object had before deletion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub former_type: Option<ObjectKind>,
}

/// Type tag for [Tombstone]
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub enum TombstoneType {
    /// The only value
    #[default]
    Tombstone,
}

impl Tombstone {
    /// Tombstone for a deleted stored object
    pub fn for_object(record: &ApObject) -> Tombstone {
        Tombstone {
            kind: TombstoneType::Tombstone,
            id: record.id.clone(),
            former_type: Some(record.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_note() {
        let json = r#"{
            "type": "Note",
            "id": "https://remote.test/n/1",
            "attributedTo": "https://remote.test/users/bob",
            "content": "hello",
            "to": "https://www.w3.org/ns/activitystreams#Public"
        }"#;
        let doc: ObjectDoc = serde_json::from_str(json).expect("parse");
        assert_eq!(doc.kind, ObjectKind::Note);
        assert_eq!(doc.to.len(), 1);
        let record = doc.into_record(Utc::now()).expect("record");
        assert_eq!(record.attributed_to.as_str(), "https://remote.test/users/bob");
    }

    #[test]
    fn bare_note_has_no_id() {
        let doc: ObjectDoc =
            serde_json::from_str(r#"{"type": "Note", "content": "hi"}"#).expect("parse");
        assert!(doc.id.is_none());
        assert!(doc.into_record(Utc::now()).is_err());
    }

    #[test]
    fn unknown_object_type_is_rejected() {
        let res = serde_json::from_str::<ObjectDoc>(r#"{"type": "CustomWidget"}"#);
        assert!(res.is_err());
    }
}
