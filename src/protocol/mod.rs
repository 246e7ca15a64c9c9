//! Data structures which define federated messages

/// Closed activity set, wire document and the normalizing extractor
pub mod activity;
/// Rendered `OrderedCollection` documents
pub mod collections;
/// Wrapper for federated structs which handles `@context`
pub mod context;
/// Serde deserialization functions which help to receive differently shaped data
pub mod helpers;
/// Wire documents for objects and tombstones
pub mod object;
/// Wire document for actors
pub mod person;
/// Struct which is used to federate actor keys for HTTP signatures
pub mod public_key;
/// Verify that received data is valid
pub mod verification;
