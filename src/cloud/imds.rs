//! Instance metadata service client

use crate::domain::ports::{InstanceMetadata, Zone};
use crate::error::{Error, Result};
use backoff::ExponentialBackoffBuilder;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";
const COMPUTE_PATH: &str = "/metadata/instance/compute";
const API_VERSION: &str = "2021-10-01";

/// Metadata client settings
#[derive(Debug, Clone)]
pub struct ImdsConfig {
    pub endpoint: String,
    pub request_timeout: Duration,
    /// Total time spent retrying a failing query
    pub max_retry_elapsed: Duration,
    /// How long a fetched document is served from cache
    pub cache_ttl: Duration,
    /// How long a failed query is reported without asking again
    pub failure_ttl: Duration,
}

impl Default for ImdsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_IMDS_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(2),
            max_retry_elapsed: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(60),
            failure_ttl: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
enum Cached {
    Document(InstanceMetadata),
    Failed(String),
}

/// Cached, retrying reader of the local instance's compute metadata
pub struct ImdsClient {
    config: ImdsConfig,
    http: reqwest::Client,
    cache: Mutex<Option<(Instant, Cached)>>,
    /// Serializes queries so concurrent callers share one result
    inflight: tokio::sync::Mutex<()>,
}

impl ImdsClient {
    pub fn new(config: ImdsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            // Link-local endpoint, never proxied
            .no_proxy()
            .build()?;
        Ok(Self {
            config,
            http,
            cache: Mutex::new(None),
            inflight: tokio::sync::Mutex::new(()),
        })
    }

    /// Compute metadata of this instance
    ///
    /// Successes are cached for `cache_ttl` and failures for `failure_ttl`.
    pub async fn compute(&self) -> Result<InstanceMetadata> {
        if let Some(cached) = self.cached() {
            return cached;
        }

        let _guard = self.inflight.lock().await;
        if let Some(cached) = self.cached() {
            return cached;
        }

        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_elapsed_time(Some(self.config.max_retry_elapsed))
            .build();
        let result = backoff::future::retry(backoff, move || async move {
            self.fetch().await.map_err(|e| {
                if let backoff::Error::Transient { err, .. } = &e {
                    warn!("Instance metadata query failed, retrying: {}", err);
                }
                e
            })
        })
        .await;

        let entry = match &result {
            Ok(metadata) => Cached::Document(metadata.clone()),
            Err(e) => Cached::Failed(e.to_string()),
        };
        *self.cache.lock() = Some((Instant::now(), entry));
        result
    }

    fn cached(&self) -> Option<Result<InstanceMetadata>> {
        let cache = self.cache.lock();
        let (fetched_at, entry) = cache.as_ref()?;
        match entry {
            Cached::Document(metadata) if fetched_at.elapsed() < self.config.cache_ttl => {
                Some(Ok(metadata.clone()))
            }
            Cached::Failed(reason) if fetched_at.elapsed() < self.config.failure_ttl => Some(Err(
                Error::CloudProvider(format!("instance metadata unavailable: {}", reason)),
            )),
            _ => None,
        }
    }

    /// One query; server-side and connection failures are transient
    async fn fetch(&self) -> std::result::Result<InstanceMetadata, backoff::Error<Error>> {
        let url = format!("{}{}", self.config.endpoint.trim_end_matches('/'), COMPUTE_PATH);
        debug!("Querying instance metadata at {}", url);
        let response = self
            .http
            .get(&url)
            .header("Metadata", "true")
            .query(&[("api-version", API_VERSION), ("format", "json")])
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    backoff::Error::transient(Error::from(e))
                } else {
                    backoff::Error::permanent(Error::from(e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let err = Error::CloudProvider(format!("instance metadata returned {}", status));
            return Err(if is_transient_status(status) {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }
        response
            .json::<InstanceMetadata>()
            .await
            .map_err(|e| backoff::Error::permanent(Error::from(e)))
    }
}

/// Statuses the metadata service returns while it is still coming up
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::GONE
}

/// Zone of an instance from its compute metadata
///
/// Zonal instances report `<location>-<zone>`; others report their fault
/// domain, which never validates as an availability zone.
pub fn zone_from_metadata(metadata: &InstanceMetadata) -> Result<Zone> {
    let region = metadata.location.to_lowercase();
    if !metadata.zone.is_empty() {
        return Ok(Zone {
            failure_domain: format!("{}-{}", region, metadata.zone.to_lowercase()),
            region,
        });
    }
    if metadata.platform_fault_domain.is_empty() {
        return Err(Error::CloudProvider(
            "instance metadata carries neither zone nor fault domain".into(),
        ));
    }
    Ok(Zone {
        failure_domain: metadata.platform_fault_domain.clone(),
        region,
    })
}
