//! Struct which is used to federate actor keys for HTTP signatures

use serde::{Deserialize, Serialize};
use url::Url;

/// Public key of actors which is used for HTTP signatures.
///
/// This needs to be federated in the `public_key` field of all actors.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    /// Id of this private key.
    pub id: String,
    /// ID of the actor that this public key belongs to
    pub owner: Url,
    /// The actual public key in PEM format
    pub public_key_pem: String,
}

impl PublicKey {
    /// Create a new [PublicKey] struct for the `owner` with `public_key_pem`.
    ///
    /// It uses a standard key id of `{actor_id}#main-key`
    pub fn new(owner: Url, public_key_pem: String) -> Self {
        let id = main_key_id(&owner);
        PublicKey {
            id,
            owner,
            public_key_pem,
        }
    }
}

/// Standard key id of the given actor, `{actor_id}#main-key`
pub fn main_key_id(owner: &Url) -> String {
    format!("{}#main-key", &owner)
}

/// Actor id a key id belongs to: the key id with its fragment stripped.
pub fn key_owner_id(key_id: &Url) -> Url {
    let mut owner = key_id.clone();
    owner.set_fragment(None);
    owner
}
