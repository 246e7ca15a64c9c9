#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

/// Handlers and router for the federation HTTP surface
pub mod axum;
/// Pagination and rendering of derived collections
pub mod collection;
/// Configuration for this crate
pub mod config;
/// Durable delivery queue and worker pool
pub mod delivery;
/// The federation engine tying the pipelines to their collaborators
pub mod engine;
/// Error messages returned by this crate
pub mod error;
/// Inbox pipeline: receive, authenticate, dedupe, dispatch
pub mod inbox;
/// Normalized records stored by the repositories
pub mod model;
/// Outbox pipeline: author, persist, address, enqueue
pub mod outbox;
/// Data structures which define federated messages
pub mod protocol;
/// Resolution and caching of remote actors and their keys
pub mod resolver;
/// HTTP signature signing and verification
pub mod signatures;
/// Repository contracts and the in-memory backend
pub mod store;
/// Server-owned signing identity
pub mod system_actor;
/// Resolves identifiers of the form `name@example.com`
pub mod webfinger;

pub use activitystreams_kinds as kinds;

/// Mime type for Activitypub, used for `Accept` and `Content-Type` HTTP headers
pub static FEDERATION_CONTENT_TYPE: &str = "application/activity+json";
