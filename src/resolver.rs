//! Resolution and caching of remote actors and their signing keys.
//!
//! The keyId → actor cache is the hot path of inbox verification: hits resolve
//! without I/O, misses perform one signed GET. Concurrent misses for the same
//! keyId collapse to a single upstream fetch.

use crate::{
    config::FederationConfig,
    error::Error,
    model::Actor,
    protocol::{person::Person, public_key::key_owner_id, verification::verify_urls_match},
    signatures::sign_request,
    store::ActorRepo,
    FEDERATION_CONTENT_TYPE,
};
use bytes::BytesMut;
use futures::StreamExt;
use http::{Method, StatusCode};
use moka::future::Cache;
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};
use url::Url;

/// Signing identity used for server-level GETs, normally the system actor.
#[derive(Clone)]
pub struct FetchSigner {
    /// keyId to present
    pub key_id: String,
    /// Private key in PEM format
    pub private_key_pem: String,
}

/// Resolves actors by key id or actor URI, against the local store first and
/// the network second.
#[derive(Clone)]
pub struct ActorResolver {
    config: FederationConfig,
    actors: Arc<dyn ActorRepo>,
    cache: Cache<Url, Actor>,
    signer: Arc<RwLock<Option<FetchSigner>>>,
}

impl ActorResolver {
    /// Build a resolver over the given actor store.
    pub fn new(config: FederationConfig, actors: Arc<dyn ActorRepo>) -> ActorResolver {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(config.key_cache_ttl)
            .build();
        ActorResolver {
            config,
            actors,
            cache,
            signer: Arc::new(RwLock::new(None)),
        }
    }

    /// Install the identity used to sign server-level fetches.
    pub fn set_fetch_signer(&self, signer: FetchSigner) {
        if let Ok(mut slot) = self.signer.write() {
            *slot = Some(signer);
        }
    }

    /// Resolve a signature keyId to the actor owning it.
    ///
    /// All load failures surface as [Error::UnknownKey]; cached entries expire
    /// after the configured TTL.
    pub async fn resolve_key(&self, key_id: &Url) -> Result<Actor, Error> {
        let owner = key_owner_id(key_id);
        self.cache
            .try_get_with(owner.clone(), self.load(owner.clone()))
            .await
            .map_err(|err: Arc<Error>| Error::UnknownKey(format!("{owner}: {err}")))
    }

    /// Drop a cached key resolution, forcing the next [Self::resolve_key] to
    /// reload. Used to soft-refresh after a verification failure, in case the
    /// actor rotated its key.
    pub async fn invalidate_key(&self, key_id: &Url) {
        self.cache.invalidate(&key_owner_id(key_id)).await;
    }

    async fn load(&self, owner: Url) -> Result<Actor, Error> {
        if let Some(actor) = self.actors.get_by_id(&owner).await? {
            if actor.local || !self.is_stale(&actor) {
                return Ok(actor);
            }
            // stale remote actor: refetch, fall back to the cached record if
            // the origin is unreachable
            match self.fetch_actor(&owner).await {
                Ok(fresh) => return Ok(fresh),
                Err(err) => {
                    debug!(%owner, %err, "actor refresh failed, using stored record");
                    return Ok(actor);
                }
            }
        }
        self.fetch_actor(&owner).await
    }

    fn is_stale(&self, actor: &Actor) -> bool {
        let age = self.config.now().signed_duration_since(actor.last_refreshed_at);
        age.to_std()
            .map(|age| age > self.config.actor_refresh_interval)
            .unwrap_or(false)
    }

    /// Fetch an actor document over HTTP, verify it, and store it.
    pub async fn fetch_actor(&self, id: &Url) -> Result<Actor, Error> {
        let person: Person = self.fetch_json(id).await?;
        verify_urls_match(&person.id, id)?;
        let actor = person.into_actor(self.config.now())?;
        self.actors.save(&actor).await?;
        info!(actor = %actor.id, "fetched remote actor");
        Ok(actor)
    }

    /// Fetch a remote json document, signing the request when a fetch signer
    /// is installed (authorized-fetch instances reject unsigned GETs).
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, Error> {
        self.config.verify_url_valid(url).await?;
        info!("fetching remote object {}", url.as_str());

        let mut request = self
            .config
            .client
            .get(url.as_str())
            .header("accept", FEDERATION_CONTENT_TYPE)
            .timeout(self.config.request_timeout);

        let signer = match self.signer.read() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(signer) = signer {
            let headers = sign_request(
                &Method::GET,
                url,
                None,
                &signer.key_id,
                &signer.private_key_pem,
                self.config.now(),
            )?;
            request = request.headers(headers);
        }

        let response = request
            .send()
            .await
            .map_err(|err| Error::Transient(err.to_string()))?;

        if response.status() == StatusCode::GONE {
            return Err(Error::ObjectDeleted);
        }
        if !response.status().is_success() {
            return Err(Error::Transient(format!(
                "fetch of {url} returned {}",
                response.status()
            )));
        }

        let body = read_limited(response, self.config.max_body_bytes).await?;
        serde_json::from_slice(&body).map_err(|err| Error::Validation(err.to_string()))
    }
}

/// Read a response body, failing once it exceeds `limit` bytes.
pub(crate) async fn read_limited(
    response: reqwest::Response,
    limit: usize,
) -> Result<bytes::Bytes, Error> {
    let mut body = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| Error::Transient(err.to_string()))?;
        if body.len() + chunk.len() > limit {
            return Err(Error::ResponseBodyLimit);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}
