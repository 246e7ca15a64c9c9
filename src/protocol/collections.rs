//! Rendered `OrderedCollection` documents

use activitystreams_kinds::collection::{OrderedCollectionPageType, OrderedCollectionType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Collection summary returned when no `page` query parameter is given.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollection {
    /// `OrderedCollection`
    #[serde(rename = "type")]
    pub kind: OrderedCollectionType,
    /// The collection URI
    pub id: Url,
    /// Total number of items across all pages
    pub total_items: u64,
    /// URI of the first page
    pub first: Url,
}

/// A single collection page.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollectionPage {
    /// `OrderedCollectionPage`
    #[serde(rename = "type")]
    pub kind: OrderedCollectionPageType,
    /// The page URI
    pub id: Url,
    /// The collection this page belongs to
    pub part_of: Url,
    /// Items on this page, newest first
    pub ordered_items: Vec<Value>,
    /// URI of the next page; absent past the end
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Url>,
    /// URI of the previous page; absent on the first page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<Url>,
}
