//! Server-owned signing identity.
//!
//! Authorized-fetch instances reject unsigned GETs, so even resolving the key
//! of a first-contact signature needs a signing identity of our own. The
//! system actor is an `Application` actor owned by the server itself; its
//! private key lives in the actor store alongside local user keys.

use crate::{
    config::FederationConfig,
    error::Error,
    model::{Actor, ActorKind},
    store::ActorRepo,
};
use tracing::info;

/// Username of the server-owned actor.
pub const SYSTEM_ACTOR_NAME: &str = "sys";

/// Fetch the system actor, creating it with a fresh keypair on first use.
pub async fn ensure_system_actor(
    config: &FederationConfig,
    actors: &dyn ActorRepo,
) -> Result<Actor, Error> {
    if let Some(actor) = actors.get_by_username(SYSTEM_ACTOR_NAME).await? {
        return Ok(actor);
    }

    let mut actor = Actor::new_local(config, SYSTEM_ACTOR_NAME, ActorKind::Application)?;
    actor.display_name = Some(config.domain().to_owned());
    actor.manually_approves_followers = true;
    actors.save(&actor).await?;
    info!(actor = %actor.id, "created system actor");
    Ok(actor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn created_once_and_reused() {
        let config = FederationConfig::builder()
            .domain("example.com")
            .build()
            .expect("valid config");
        let store = MemoryStore::new();

        let first = ensure_system_actor(&config, &store).await.expect("create");
        assert_eq!(first.id.as_str(), "https://example.com/users/sys");
        assert_eq!(first.kind, ActorKind::Application);
        assert!(first.private_key_pem.is_some());

        let second = ensure_system_actor(&config, &store).await.expect("reuse");
        assert_eq!(second.public_key_pem, first.public_key_pem);
    }
}
