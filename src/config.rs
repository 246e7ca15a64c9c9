//! Configuration for the federation engine
//!
//! Use [FederationConfig::builder](crate::config::FederationConfig::builder) to initialize it.
//!
//! ```
//! # use apub_core::config::FederationConfig;
//! let config = FederationConfig::builder()
//!     .domain("example.com")
//!     .worker_count(16)
//!     .build()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_builder::Builder;
use dyn_clone::{clone_trait_object, DynClone};
use reqwest_middleware::ClientWithMiddleware;
use std::{sync::Arc, time::Duration};
use url::Url;

/// Backoff applied after each failed delivery attempt, in order.
pub const DEFAULT_BACKOFF_SCHEDULE: [Duration; 5] = [
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(4 * 60 * 60),
];

/// Configuration for the federation engine, with various federation related settings
#[derive(Builder, Clone)]
#[builder(build_fn(private, name = "partial_build"))]
pub struct FederationConfig {
    /// The domain where this federated instance is running
    #[builder(setter(into))]
    pub(crate) domain: String,
    /// Optional path prefix under which the federation routes are mounted (eg. `/ap`)
    #[builder(default, setter(into))]
    pub(crate) path_prefix: String,
    /// HTTP client used for all outgoing requests. Middleware can be used to add functionality
    /// like log tracing or retry of failed requests. When not set explicitly, [build](FederationConfigBuilder::build)
    /// creates a client from the configured connect and request timeouts.
    pub(crate) client: ClientWithMiddleware,
    /// Run the engine in debug mode. This allows usage of http and localhost urls. Do not use
    /// for production.
    #[builder(default = "false")]
    pub(crate) debug: bool,
    /// Require valid signatures on document GETs as well as inbox POSTs
    #[builder(default = "false")]
    pub(crate) authorized_fetch: bool,
    /// Number of concurrent delivery workers
    #[builder(default = "8")]
    pub(crate) worker_count: usize,
    /// Maximum concurrent deliveries per remote host
    #[builder(default = "2")]
    pub(crate) per_host_concurrency: usize,
    /// Delivery attempts before a record is moved to `Dead`
    #[builder(default = "5")]
    pub(crate) max_retries: u32,
    /// Backoff applied after the i-th failed attempt. Attempts beyond the
    /// schedule length reuse the last entry.
    #[builder(default = "DEFAULT_BACKOFF_SCHEDULE.to_vec()")]
    pub(crate) backoff_schedule: Vec<Duration>,
    /// Connect timeout for outbound HTTP
    #[builder(default = "Duration::from_secs(10)")]
    #[allow(dead_code)]
    pub(crate) connect_timeout: Duration,
    /// Total timeout for outbound HTTP
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) request_timeout: Duration,
    /// Cap on inbound request bodies and fetched response bodies
    #[builder(default = "1024 * 1024")]
    pub(crate) max_body_bytes: usize,
    /// Allowed difference between the `Date` header and the local clock
    #[builder(default = "Duration::from_secs(5 * 60)")]
    pub(crate) clock_skew: Duration,
    /// How long resolved keys stay cached before re-resolution
    #[builder(default = "Duration::from_secs(60 * 60)")]
    pub(crate) key_cache_ttl: Duration,
    /// Cached remote actors older than this are refetched on dereference
    #[builder(default = "Duration::from_secs(24 * 60 * 60)")]
    pub(crate) actor_refresh_interval: Duration,
    /// Default collection page size
    #[builder(default = "20")]
    pub(crate) page_size: usize,
    /// Upper bound on requested collection page sizes
    #[builder(default = "80")]
    pub(crate) max_page_size: usize,
    /// Maximum delivery records leased per worker poll
    #[builder(default = "100")]
    pub(crate) lease_batch: usize,
    /// Delay between delivery queue polls when the queue is empty
    #[builder(default = "Duration::from_secs(1)")]
    pub(crate) poll_interval: Duration,
    /// How often the reaper removes finished delivery records
    #[builder(default = "Duration::from_secs(60 * 60)")]
    pub(crate) reaper_interval: Duration,
    /// Retention for `Delivered` records
    #[builder(default = "Duration::from_secs(24 * 60 * 60)")]
    pub(crate) delivered_retention: Duration,
    /// Retention for `Dead` records
    #[builder(default = "Duration::from_secs(7 * 24 * 60 * 60)")]
    pub(crate) dead_retention: Duration,
    /// Grace period for in-flight deliveries on shutdown
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) shutdown_grace: Duration,
    /// Function used to verify that urls are valid, see [UrlVerifier] for details
    #[builder(default = "Box::new(DefaultUrlVerifier())")]
    pub(crate) url_verifier: Box<dyn UrlVerifier + Sync>,
    /// Source of the current time; swap for a fixed clock in tests
    #[builder(default = "Arc::new(SystemClock)")]
    pub(crate) clock: Arc<dyn Clock>,
}

impl FederationConfig {
    /// Returns a new config builder with default values.
    pub fn builder() -> FederationConfigBuilder {
        FederationConfigBuilder::default()
    }

    /// Returns the local domain
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The current time according to the configured clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn scheme(&self) -> &'static str {
        if self.debug {
            "http"
        } else {
            "https"
        }
    }

    /// Base url of this instance, eg. `https://example.com`
    pub fn base_url(&self) -> String {
        format!("{}://{}{}", self.scheme(), self.domain, self.path_prefix)
    }

    /// Stable URI of the actor owned by `username`
    pub fn actor_uri(&self, username: &str) -> Url {
        self.local_url(&format!("/users/{username}"))
    }

    /// Inbox URL of a local actor
    pub fn inbox_uri(&self, username: &str) -> Url {
        self.local_url(&format!("/users/{username}/inbox"))
    }

    /// Outbox URL of a local actor
    pub fn outbox_uri(&self, username: &str) -> Url {
        self.local_url(&format!("/users/{username}/outbox"))
    }

    /// Followers collection URL of a local actor
    pub fn followers_uri(&self, username: &str) -> Url {
        self.local_url(&format!("/users/{username}/followers"))
    }

    /// Following collection URL of a local actor
    pub fn following_uri(&self, username: &str) -> Url {
        self.local_url(&format!("/users/{username}/following"))
    }

    /// Instance-level shared inbox URL
    pub fn shared_inbox_uri(&self) -> Url {
        self.local_url("/inbox")
    }

    /// Mint a fresh activity URI for a local actor
    pub fn new_activity_uri(&self, username: &str) -> Url {
        self.local_url(&format!("/users/{username}/activities/{}", uuid::Uuid::new_v4()))
    }

    /// Mint a fresh object URI for a local actor
    pub fn new_object_uri(&self, username: &str) -> Url {
        self.local_url(&format!("/users/{username}/objects/{}", uuid::Uuid::new_v4()))
    }

    fn local_url(&self, path: &str) -> Url {
        let url = format!("{}{}", self.base_url(), path);
        #[allow(clippy::expect_used)]
        Url::parse(&url).expect("constructed from valid domain and path")
    }

    /// Perform some security checks on URLs as mentioned in activitypub spec, and call the
    /// user-supplied [UrlVerifier].
    ///
    /// <https://www.w3.org/TR/activitypub/#security-considerations>
    pub(crate) async fn verify_url_valid(&self, url: &Url) -> Result<(), Error> {
        match url.scheme() {
            "https" => {}
            "http" => {
                if !self.debug {
                    return Err(Error::UrlVerification(
                        "Http urls are only allowed in debug mode",
                    ));
                }
            }
            _ => return Err(Error::UrlVerification("Invalid url scheme")),
        };

        // Urls which use our local domain are not a security risk, no further verification needed
        if self.is_local_url(url) {
            return Ok(());
        }

        if url.host_str().is_none() {
            return Err(Error::UrlVerification("Url must have a host"));
        }

        if url.host_str() == Some("localhost") && !self.debug {
            return Err(Error::UrlVerification(
                "Localhost is only allowed in debug mode",
            ));
        }

        self.url_verifier
            .verify(url)
            .await
            .map_err(Error::UrlVerification)?;

        Ok(())
    }

    /// Returns true if the url refers to this instance. Handles hostnames like `localhost:8540`
    /// for local debugging.
    pub(crate) fn is_local_url(&self, url: &Url) -> bool {
        let Some(mut domain) = url.host_str().map(ToOwned::to_owned) else {
            return false;
        };
        if let Some(port) = url.port() {
            domain = format!("{domain}:{port}");
        }
        domain == self.domain
    }

    /// True when `uri` is the id of a locally owned actor, ie. `{base}/users/{username}`.
    /// Returns the username.
    pub(crate) fn local_username_of(&self, uri: &Url) -> Option<String> {
        if !self.is_local_url(uri) {
            return None;
        }
        let path = uri.path();
        let rest = path.strip_prefix(&format!("{}/users/", self.path_prefix))?;
        if rest.is_empty() || rest.contains('/') {
            return None;
        }
        Some(rest.to_owned())
    }

    /// If `uri` is the followers collection of a local actor, returns the username.
    pub(crate) fn local_followers_username_of(&self, uri: &Url) -> Option<String> {
        if !self.is_local_url(uri) {
            return None;
        }
        let path = uri.path();
        let rest = path.strip_prefix(&format!("{}/users/", self.path_prefix))?;
        let username = rest.strip_suffix("/followers")?;
        if username.is_empty() || username.contains('/') {
            return None;
        }
        Some(username.to_owned())
    }
}

impl FederationConfigBuilder {
    /// Constructs a new config instance with the values supplied to the
    /// builder. When no HTTP client was given, one is created from the
    /// configured connect and request timeouts.
    pub fn build(&mut self) -> Result<FederationConfig, FederationConfigBuilderError> {
        if self.client.is_none() {
            let connect = self.connect_timeout.unwrap_or(Duration::from_secs(10));
            let request = self.request_timeout.unwrap_or(Duration::from_secs(30));
            let client = reqwest::Client::builder()
                .connect_timeout(connect)
                .timeout(request)
                .build()
                .map_err(|err| {
                    FederationConfigBuilderError::ValidationError(err.to_string())
                })?;
            self.client = Some(client.into());
        }
        self.partial_build()
    }
}

/// Handler for validating URLs.
///
/// This is used for implementing domain blocklists and similar functionality. It is called
/// with the ID of newly received activities, when fetching remote data from a given URL
/// and before sending an activity to a given inbox URL. If processing for this domain/URL
/// should be aborted, return an error. In case of `Ok(())`, processing continues.
#[async_trait]
pub trait UrlVerifier: DynClone + Send {
    /// Should return Ok iff the given url is valid for processing.
    async fn verify(&self, url: &Url) -> Result<(), &'static str>;
}

/// Default URL verifier which does nothing.
#[derive(Clone)]
struct DefaultUrlVerifier();

#[async_trait]
impl UrlVerifier for DefaultUrlVerifier {
    async fn verify(&self, _url: &Url) -> Result<(), &'static str> {
        Ok(())
    }
}

clone_trait_object!(UrlVerifier);

/// Source of the current time. The pipelines never call `Utc::now()` directly,
/// so tests can substitute a fixed clock.
pub trait Clock: Send + Sync {
    /// The current instant
    fn now(&self) -> DateTime<Utc>;
}

/// [Clock] backed by the system time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
