//! The federation engine: pipelines wired to their collaborators.
//!
//! The engine owns no background tasks itself; spawn the delivery workers
//! with [crate::delivery::DeliveryWorker::spawn] and mount the HTTP routes
//! from [crate::axum].

use crate::{
    config::FederationConfig,
    error::Error,
    model::Actor,
    resolver::{ActorResolver, FetchSigner},
    store::{memory::MemoryStore, ActivityRepo, ActorRepo, DeliveryRepo, ObjectRepo},
    system_actor::ensure_system_actor,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Narrow interface to an identity provider which can materialize local
/// actors on first reference, eg. from an external user database.
#[async_trait]
pub trait ResolveLocalActor: Send + Sync {
    /// Return the actor for a local username, or `None` if no such user
    /// exists. The engine persists whatever is returned.
    async fn resolve_local_actor(&self, username: &str) -> Result<Option<Actor>, Error>;
}

/// The core federation engine.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct FederationEngine {
    pub(crate) config: FederationConfig,
    pub(crate) actors: Arc<dyn ActorRepo>,
    pub(crate) activities: Arc<dyn ActivityRepo>,
    pub(crate) objects: Arc<dyn ObjectRepo>,
    pub(crate) deliveries: Arc<dyn DeliveryRepo>,
    pub(crate) resolver: ActorResolver,
    pub(crate) local_provider: Option<Arc<dyn ResolveLocalActor>>,
}

impl FederationEngine {
    /// Wire an engine over the given repositories. Ensures the system actor
    /// exists and installs it as the signing identity for server fetches.
    pub async fn new(
        config: FederationConfig,
        actors: Arc<dyn ActorRepo>,
        activities: Arc<dyn ActivityRepo>,
        objects: Arc<dyn ObjectRepo>,
        deliveries: Arc<dyn DeliveryRepo>,
    ) -> Result<FederationEngine, Error> {
        let resolver = ActorResolver::new(config.clone(), actors.clone());
        let system = ensure_system_actor(&config, actors.as_ref()).await?;
        let private_key_pem = system
            .private_key_pem
            .clone()
            .ok_or_else(|| Error::Validation("system actor has no private key".into()))?;
        resolver.set_fetch_signer(FetchSigner {
            key_id: system.key_id(),
            private_key_pem,
        });
        Ok(FederationEngine {
            config,
            actors,
            activities,
            objects,
            deliveries,
            resolver,
            local_provider: None,
        })
    }

    /// Engine backed by a fresh [MemoryStore].
    pub async fn with_memory_store(
        config: FederationConfig,
    ) -> Result<(FederationEngine, Arc<MemoryStore>), Error> {
        let store = Arc::new(MemoryStore::with_backoff_schedule(
            config.backoff_schedule.clone(),
        ));
        let engine = FederationEngine::new(
            config,
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
        )
        .await?;
        Ok((engine, store))
    }

    /// Install an identity provider for lazy local-actor provisioning.
    pub fn with_local_provider(mut self, provider: Arc<dyn ResolveLocalActor>) -> Self {
        self.local_provider = Some(provider);
        self
    }

    /// The engine configuration.
    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// The actor/key resolver.
    pub fn resolver(&self) -> &ActorResolver {
        &self.resolver
    }

    /// Look up a local actor, falling back to the identity provider when one
    /// is installed.
    pub async fn local_actor(&self, username: &str) -> Result<Option<Actor>, Error> {
        if let Some(actor) = self.actors.get_by_username(username).await? {
            return Ok(Some(actor));
        }
        if let Some(provider) = &self.local_provider {
            if let Some(actor) = provider.resolve_local_actor(username).await? {
                self.actors.save(&actor).await?;
                return Ok(Some(actor));
            }
        }
        Ok(None)
    }
}
