//! Pagination and rendering of the derived collections.
//!
//! A collection URI renders as a summary (`OrderedCollection`) when no `page`
//! query parameter is present, and as an `OrderedCollectionPage` otherwise.
//! Ordering is reverse-chronological by `published`, falling back to
//! ingestion time.

use crate::{
    engine::FederationEngine,
    error::Error,
    protocol::collections::{OrderedCollection, OrderedCollectionPage},
    store::Paged,
};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

/// Query parameters of a collection request.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct PageQuery {
    /// Page number, starting at 0. Absent requests the summary document.
    pub page: Option<u64>,
    /// Requested page size; capped by the configured maximum.
    pub limit: Option<u64>,
}

/// Either a collection summary or one of its pages.
#[derive(Debug)]
pub enum CollectionResponse {
    /// The wrapper document with `totalItems` and `first`
    Summary(OrderedCollection),
    /// One page of items
    Page(OrderedCollectionPage),
}

/// The derived collections the engine can render.
#[derive(Clone, Debug)]
pub enum CollectionSelector<'a> {
    /// Activities addressed to a local user
    Inbox(&'a str),
    /// Activities produced by a local user
    Outbox(&'a str),
    /// Accepted, unrevoked followers of a local user
    Followers(&'a str),
    /// Actors a local user follows
    Following(&'a str),
    /// Objects an actor has liked
    Liked(&'a Url),
    /// Objects an actor has announced
    Shared(&'a Url),
    /// Activities replying to an object
    Replies(&'a Url),
    /// `Like`s of an object
    Likes(&'a Url),
    /// `Announce`s of an object
    Shares(&'a Url),
}

impl FederationEngine {
    /// Render a collection, as a summary or a page depending on the query.
    pub async fn collection(
        &self,
        id: &Url,
        selector: CollectionSelector<'_>,
        query: PageQuery,
    ) -> Result<CollectionResponse, Error> {
        let limit = query
            .limit
            .map(|limit| limit as usize)
            .unwrap_or(self.config.page_size)
            .min(self.config.max_page_size)
            .max(1);

        let Some(page) = query.page else {
            let total = self.fetch(&selector, 0, 0).await?.1;
            return Ok(CollectionResponse::Summary(OrderedCollection {
                kind: Default::default(),
                id: id.clone(),
                total_items: total,
                first: page_uri(id, 0, query.limit),
            }));
        };

        let offset = (page as usize).saturating_mul(limit);
        let (items, total) = self.fetch(&selector, limit, offset).await?;
        let has_more = offset.saturating_add(items.len()) < total as usize;

        Ok(CollectionResponse::Page(OrderedCollectionPage {
            kind: Default::default(),
            id: page_uri(id, page, query.limit),
            part_of: id.clone(),
            ordered_items: items,
            next: has_more.then(|| page_uri(id, page + 1, query.limit)),
            prev: (page > 0).then(|| page_uri(id, page - 1, query.limit)),
        }))
    }

    async fn fetch(
        &self,
        selector: &CollectionSelector<'_>,
        limit: usize,
        offset: usize,
    ) -> Result<Paged<Value>, Error> {
        match selector {
            CollectionSelector::Inbox(username) => {
                to_items(self.activities.list_inbox(username, limit, offset).await?)
            }
            CollectionSelector::Outbox(username) => {
                to_items(self.activities.list_outbox(username, limit, offset).await?)
            }
            CollectionSelector::Followers(username) => {
                let (items, total) = self.actors.list_followers(username, limit, offset).await?;
                Ok((items.into_iter().map(url_item).collect(), total))
            }
            CollectionSelector::Following(username) => {
                let (items, total) = self.actors.list_following(username, limit, offset).await?;
                Ok((items.into_iter().map(url_item).collect(), total))
            }
            CollectionSelector::Liked(actor) => {
                to_items(self.activities.liked_by(actor, limit, offset).await?)
            }
            CollectionSelector::Shared(actor) => {
                to_items(self.activities.shared_by(actor, limit, offset).await?)
            }
            CollectionSelector::Replies(object) => {
                to_items(self.activities.replies(object, limit, offset).await?)
            }
            CollectionSelector::Likes(object) => {
                to_items(self.activities.likes(object, limit, offset).await?)
            }
            CollectionSelector::Shares(object) => {
                to_items(self.activities.shares(object, limit, offset).await?)
            }
        }
    }
}

fn to_items(paged: Paged<crate::protocol::activity::Activity>) -> Result<Paged<Value>, Error> {
    let (activities, total) = paged;
    let mut items = Vec::with_capacity(activities.len());
    for activity in activities {
        items.push(serde_json::from_slice(activity.raw()).map_err(Error::other)?);
    }
    Ok((items, total))
}

fn url_item(url: Url) -> Value {
    Value::String(url.into())
}

fn page_uri(collection: &Url, page: u64, limit: Option<u64>) -> Url {
    let mut uri = collection.clone();
    {
        let mut pairs = uri.query_pairs_mut();
        pairs.clear();
        pairs.append_pair("page", &page.to_string());
        if let Some(limit) = limit {
            pairs.append_pair("limit", &limit.to_string());
        }
    }
    uri
}
