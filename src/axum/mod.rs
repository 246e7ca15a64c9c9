//! Handlers and router for the federation HTTP surface.
//!
//! [federation_router] mounts every endpoint of the engine; nest it under the
//! configured path prefix when one is set. Content is served as
//! `application/activity+json`; HTML rendering for browsers is the
//! embedder's business.

/// Wrapper struct to respond with `application/activity+json`
pub mod json;
/// NodeInfo discovery documents
pub mod nodeinfo;

use crate::{
    collection::{CollectionResponse, CollectionSelector, PageQuery},
    engine::FederationEngine,
    error::Error,
    inbox::InboxRequest,
    model::Actor,
    protocol::{
        context::WithContext,
        object::{ObjectDoc, Tombstone},
        person::Person,
        public_key::key_owner_id,
        verification::verify_urls_match,
    },
    signatures::{verify_body_digest, verify_date, verify_request, SignatureHeader},
    webfinger::{build_webfinger_response, extract_webfinger_name, Webfinger},
};
use axum::{
    async_trait,
    extract::{FromRequest, Path, Query, Request, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http::{HeaderMap, StatusCode, Uri};
use self::json::FederationJson;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Upper bound on inbox bodies read by the extractor; the pipeline enforces
/// the configured limit on top.
const MAX_EXTRACTED_BODY: usize = 10 * 1024 * 1024;

/// Router serving every federation endpoint against the given engine.
pub fn federation_router(engine: FederationEngine) -> Router {
    Router::new()
        .route("/.well-known/webfinger", get(get_webfinger))
        .route("/.well-known/nodeinfo", get(nodeinfo::get_wellknown))
        .route("/nodeinfo/2.0", get(nodeinfo::get))
        .route("/users/:user", get(get_actor))
        .route("/users/:user/inbox", get(get_inbox).post(post_inbox))
        .route("/users/:user/outbox", get(get_outbox).post(post_outbox))
        .route("/users/:user/followers", get(get_followers))
        .route("/users/:user/following", get(get_following))
        .route("/users/:user/liked", get(get_liked))
        .route("/users/:user/shared", get(get_shared))
        .route("/users/:user/activities/:activity", get(get_activity))
        .route("/users/:user/objects/:object", get(get_object))
        .route("/users/:user/objects/:object/replies", get(get_replies))
        .route("/users/:user/objects/:object/likes", get(get_likes))
        .route("/users/:user/objects/:object/shares", get(get_shares))
        .route("/inbox", post(post_shared_inbox))
        .with_state(engine)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        // no detail leaks on auth failures
        let body = if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            "request could not be authenticated".to_owned()
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}

/// Raw request parts handed to the inbox pipeline, collected framework-side.
pub struct ActivityData(pub InboxRequest);

#[async_trait]
impl<S> FromRequest<S> for ActivityData
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_EXTRACTED_BODY)
            .await
            .map_err(|err| (StatusCode::PAYLOAD_TOO_LARGE, err.to_string()).into_response())?;
        Ok(ActivityData(InboxRequest {
            headers: parts.headers,
            method: parts.method,
            uri: parts.uri,
            body: bytes,
        }))
    }
}

#[derive(Deserialize)]
struct WebfingerQuery {
    resource: String,
}

async fn get_webfinger(
    State(engine): State<FederationEngine>,
    Query(query): Query<WebfingerQuery>,
) -> Result<Json<Webfinger>, Error> {
    let username = extract_webfinger_name(&query.resource, engine.config())?.to_owned();
    let actor = engine.local_actor(&username).await?.ok_or(Error::NotFound)?;
    Ok(Json(build_webfinger_response(query.resource, actor.id)))
}

async fn get_actor(
    State(engine): State<FederationEngine>,
    Path(user): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<FederationJson<WithContext<Person>>, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    let actor = engine.local_actor(&user).await?.ok_or(Error::NotFound)?;
    Ok(FederationJson(WithContext::new_default(Person::from_actor(
        &actor,
    ))))
}

async fn post_inbox(
    State(engine): State<FederationEngine>,
    Path(user): Path<String>,
    ActivityData(request): ActivityData,
) -> Result<StatusCode, Error> {
    engine.receive_activity(request, Some(&user)).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn post_shared_inbox(
    State(engine): State<FederationEngine>,
    ActivityData(request): ActivityData,
) -> Result<StatusCode, Error> {
    engine.receive_activity(request, None).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn post_outbox(
    State(engine): State<FederationEngine>,
    Path(user): Path<String>,
    ActivityData(request): ActivityData,
) -> Result<Response, Error> {
    let actor = engine.local_actor(&user).await?.ok_or(Error::NotFound)?;
    authenticate_local(&engine, &actor, &request)?;

    let document: Value = serde_json::from_slice(&request.body)
        .map_err(|err| Error::Validation(err.to_string()))?;
    let outcome = engine.submit_activity(&user, document).await?;

    debug!(activity = %outcome.activity_id, "outbox submission created");
    Ok((
        StatusCode::CREATED,
        [(http::header::LOCATION, outcome.activity_id.to_string())],
    )
        .into_response())
}

/// Outbox POSTs are signature-authenticated as the path user; there is no
/// session auth in this engine.
fn authenticate_local(
    engine: &FederationEngine,
    actor: &Actor,
    request: &InboxRequest,
) -> Result<(), Error> {
    let header = SignatureHeader::parse(&request.headers)?;
    verify_urls_match(&key_owner_id(&header.key_id), &actor.id)
        .map_err(|_| Error::NotAuthorized("signature is not by the outbox owner"))?;
    verify_body_digest(request.headers.get("digest"), &request.body)?;
    verify_date(
        request.headers.get("date"),
        engine.config().now(),
        engine.config().clock_skew,
    )?;
    let path_and_query = request
        .uri
        .path_and_query()
        .map(http::uri::PathAndQuery::as_str)
        .unwrap_or("");
    verify_request(
        &request.headers,
        &request.method,
        path_and_query,
        &actor.public_key_pem,
        true,
    )
}

async fn get_inbox(
    State(engine): State<FederationEngine>,
    Path(user): Path<String>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    engine.local_actor(&user).await?.ok_or(Error::NotFound)?;
    let id = engine.config().inbox_uri(&user);
    let rendered = engine
        .collection(&id, CollectionSelector::Inbox(&user), query)
        .await?;
    Ok(collection_response(rendered))
}

async fn get_outbox(
    State(engine): State<FederationEngine>,
    Path(user): Path<String>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    engine.local_actor(&user).await?.ok_or(Error::NotFound)?;
    let id = engine.config().outbox_uri(&user);
    let rendered = engine
        .collection(&id, CollectionSelector::Outbox(&user), query)
        .await?;
    Ok(collection_response(rendered))
}

async fn get_followers(
    State(engine): State<FederationEngine>,
    Path(user): Path<String>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    engine.local_actor(&user).await?.ok_or(Error::NotFound)?;
    let id = engine.config().followers_uri(&user);
    let rendered = engine
        .collection(&id, CollectionSelector::Followers(&user), query)
        .await?;
    Ok(collection_response(rendered))
}

async fn get_following(
    State(engine): State<FederationEngine>,
    Path(user): Path<String>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    engine.local_actor(&user).await?.ok_or(Error::NotFound)?;
    let id = engine.config().following_uri(&user);
    let rendered = engine
        .collection(&id, CollectionSelector::Following(&user), query)
        .await?;
    Ok(collection_response(rendered))
}

async fn get_liked(
    State(engine): State<FederationEngine>,
    Path(user): Path<String>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    let actor = engine.local_actor(&user).await?.ok_or(Error::NotFound)?;
    let id = local_url(&engine, &format!("/users/{user}/liked"))?;
    let rendered = engine
        .collection(&id, CollectionSelector::Liked(&actor.id), query)
        .await?;
    Ok(collection_response(rendered))
}

async fn get_shared(
    State(engine): State<FederationEngine>,
    Path(user): Path<String>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    let actor = engine.local_actor(&user).await?.ok_or(Error::NotFound)?;
    let id = local_url(&engine, &format!("/users/{user}/shared"))?;
    let rendered = engine
        .collection(&id, CollectionSelector::Shared(&actor.id), query)
        .await?;
    Ok(collection_response(rendered))
}

async fn get_activity(
    State(engine): State<FederationEngine>,
    Path((user, activity)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    let id = local_url(&engine, &format!("/users/{user}/activities/{activity}"))?;
    let record = engine
        .activities
        .get_by_id(&id)
        .await?
        .ok_or(Error::NotFound)?;
    let document: Value = serde_json::from_slice(record.raw()).map_err(Error::other)?;
    Ok(FederationJson(document).into_response())
}

async fn get_object(
    State(engine): State<FederationEngine>,
    Path((user, object)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    let id = object_url(&engine, &user, &object)?;
    let record = engine.objects.get_by_id(&id).await?.ok_or(Error::NotFound)?;
    if record.tombstoned {
        let tombstone = FederationJson(WithContext::new_default(Tombstone::for_object(&record)));
        return Ok((StatusCode::GONE, tombstone).into_response());
    }
    Ok(FederationJson(WithContext::new_default(ObjectDoc::from_record(&record))).into_response())
}

async fn get_replies(
    State(engine): State<FederationEngine>,
    Path((user, object)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    let object_id = object_url(&engine, &user, &object)?;
    let id = local_url(&engine, &format!("/users/{user}/objects/{object}/replies"))?;
    let rendered = engine
        .collection(&id, CollectionSelector::Replies(&object_id), query)
        .await?;
    Ok(collection_response(rendered))
}

async fn get_likes(
    State(engine): State<FederationEngine>,
    Path((user, object)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    let object_id = object_url(&engine, &user, &object)?;
    let id = local_url(&engine, &format!("/users/{user}/objects/{object}/likes"))?;
    let rendered = engine
        .collection(&id, CollectionSelector::Likes(&object_id), query)
        .await?;
    Ok(collection_response(rendered))
}

async fn get_shares(
    State(engine): State<FederationEngine>,
    Path((user, object)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, Error> {
    authorize_fetch(&engine, &headers, &uri).await?;
    let object_id = object_url(&engine, &user, &object)?;
    let id = local_url(&engine, &format!("/users/{user}/objects/{object}/shares"))?;
    let rendered = engine
        .collection(&id, CollectionSelector::Shares(&object_id), query)
        .await?;
    Ok(collection_response(rendered))
}

async fn authorize_fetch(
    engine: &FederationEngine,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<(), Error> {
    if !engine.config().authorized_fetch {
        return Ok(());
    }
    engine.verify_get(headers, uri).await
}

fn collection_response(rendered: CollectionResponse) -> Response {
    match rendered {
        CollectionResponse::Summary(summary) => {
            FederationJson(WithContext::new_default(summary)).into_response()
        }
        CollectionResponse::Page(page) => {
            FederationJson(WithContext::new_default(page)).into_response()
        }
    }
}

fn local_url(engine: &FederationEngine, path: &str) -> Result<Url, Error> {
    Url::parse(&format!("{}{path}", engine.config().base_url()))
        .map_err(|err| Error::Validation(err.to_string()))
}

fn object_url(engine: &FederationEngine, user: &str, object: &str) -> Result<Url, Error> {
    local_url(engine, &format!("/users/{user}/objects/{object}"))
}
