//! Resolves identifiers of the form `name@example.com`

use crate::{
    config::FederationConfig,
    error::{Error, Error::WebfingerResolveFailed},
    model::Actor,
    resolver::ActorResolver,
    FEDERATION_CONTENT_TYPE,
};
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

/// Turns a person id like `name@example.com` into an actor, using webfinger.
///
/// This is the client capability the delivery side needs to address actors it
/// only knows by handle.
pub async fn webfinger_resolve_actor(
    identifier: &str,
    resolver: &ActorResolver,
    config: &FederationConfig,
) -> Result<Actor, Error> {
    let (_, domain) = identifier
        .splitn(2, '@')
        .collect_tuple()
        .ok_or(WebfingerResolveFailed)?;
    let protocol = if config.debug { "http" } else { "https" };
    let fetch_url =
        format!("{protocol}://{domain}/.well-known/webfinger?resource=acct:{identifier}");
    debug!("fetching webfinger url: {}", &fetch_url);

    let url = Url::parse(&fetch_url).map_err(|_| WebfingerResolveFailed)?;
    let res: Webfinger = resolver.fetch_json(&url).await?;

    let links = res
        .links
        .iter()
        .filter(|link| {
            link.kind
                .as_deref()
                .map(|kind| kind.starts_with("application/"))
                .unwrap_or(false)
        })
        .filter_map(|link| link.href.clone());
    for link in links {
        if let Ok(actor) = resolver.fetch_actor(&link).await {
            return Ok(actor);
        }
    }
    Err(WebfingerResolveFailed)
}

/// Extracts username from a webfinger resource parameter.
///
/// For a parameter of the form `acct:gargron@mastodon.social` it returns `gargron`.
///
/// Returns an error if the query doesn't match the local domain.
pub fn extract_webfinger_name<'a>(
    query: &'a str,
    config: &FederationConfig,
) -> Result<&'a str, Error> {
    let regex = Regex::new(&format!(
        "^acct:([a-zA-Z0-9_]{{1,}})@{}$",
        regex::escape(config.domain())
    ))
    .map_err(Error::other)?;
    Ok(regex
        .captures(query)
        .and_then(|captures| captures.get(1))
        .ok_or(WebfingerResolveFailed)?
        .as_str())
}

/// Builds a basic webfinger response under the assumption that `html` and
/// `activity+json` links are identical.
pub fn build_webfinger_response(resource: String, url: Url) -> Webfinger {
    Webfinger {
        subject: resource,
        aliases: vec![url.clone()],
        links: vec![
            WebfingerLink {
                rel: Some("http://webfinger.net/rel/profile-page".to_string()),
                kind: Some("text/html".to_string()),
                href: Some(url.clone()),
                properties: Default::default(),
            },
            WebfingerLink {
                rel: Some("self".to_string()),
                kind: Some(FEDERATION_CONTENT_TYPE.to_string()),
                href: Some(url),
                properties: Default::default(),
            },
        ],
    }
}

/// A webfinger response with information about a `preferredUsername`
#[derive(Serialize, Deserialize, Debug)]
pub struct Webfinger {
    /// The actor which is described here, for example `acct:LemmyDev@mastodon.social`
    pub subject: String,
    /// Links where further data about `subject` can be retrieved
    #[serde(default)]
    pub links: Vec<WebfingerLink>,
    /// Other uris which identify `subject`
    #[serde(default)]
    pub aliases: Vec<Url>,
}

/// A single link included as part of a [Webfinger] response
#[derive(Serialize, Deserialize, Debug)]
pub struct WebfingerLink {
    /// Relationship of the link, such as `self` or `http://webfinger.net/rel/profile-page`
    pub rel: Option<String>,
    /// Media type of the target resource
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Url pointing to the target resource
    pub href: Option<Url>,
    /// Additional data about the link
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}
