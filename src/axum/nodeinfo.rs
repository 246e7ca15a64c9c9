//! Support for providing nodeinfo on `/nodeinfo/2.0`
//!
//! The schema for the response format can be found here:
//!   <http://nodeinfo.diaspora.software/ns/schema/2.0#>

use crate::{config::FederationConfig, engine::FederationEngine};
use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use url::Url;

/// Schema identifier served in the content-type profile and discovery links
pub const NODE_INFO_SCHEMA: &str = "http://nodeinfo.diaspora.software/ns/schema/2.0";

pub(super) async fn get_wellknown(State(engine): State<FederationEngine>) -> Json<Discovery> {
    Json(Discovery::new(engine.config()))
}

pub(super) async fn get(State(_engine): State<FederationEngine>) -> impl IntoResponse {
    let headers = [(
        header::CONTENT_TYPE,
        format!("application/json; profile={NODE_INFO_SCHEMA}#"),
    )];
    (headers, Json(NodeInfo::new()))
}

/// The `/.well-known/nodeinfo` discovery document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    /// Pointers to the schema versions this server provides
    pub links: Vec<DiscoveryLink>,
}

/// One schema pointer inside [Discovery]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryLink {
    /// Schema identifier
    pub rel: String,
    /// Where the document is served
    pub href: Url,
}

impl Discovery {
    fn new(config: &FederationConfig) -> Self {
        #[allow(clippy::expect_used)]
        let href = Url::parse(&format!("{}/nodeinfo/2.0", config.base_url()))
            .expect("base url with fixed path is valid");
        Discovery {
            links: vec![DiscoveryLink {
                rel: NODE_INFO_SCHEMA.to_owned(),
                href,
            }],
        }
    }
}

/// NodeInfo schema version 2.0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    version: &'static str,
    software: Software,
    protocols: Vec<&'static str>,
    services: Services,
    open_registrations: bool,
    usage: UsageStats,
}

impl NodeInfo {
    fn new() -> Self {
        Self {
            version: "2.0",
            software: Software::from_env(),
            protocols: vec!["activitypub"],
            services: Services::default(),
            open_registrations: false,
            usage: UsageStats::default(),
        }
    }
}

/// Metadata about the server software in use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Software {
    name: &'static str,
    version: &'static str,
}

impl Software {
    fn from_env() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
        }
    }
}

/// Third party services this server bridges; always empty here
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Services {
    inbound: Vec<String>,
    outbound: Vec<String>,
}

/// Usage statistics. Only the schema-required `users` key is reported; the
/// engine does not track aggregate counts.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    users: UserStats,
}

/// Statistics about the users of this server
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    total: u32,
}
