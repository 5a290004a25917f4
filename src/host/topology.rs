//! Topology discovery.
//!
//! # Responsibilities
//! - Query the endpoint listing over one live pooled connection
//! - Parse `{"endpoints":[{"endpoint":"tcp://host:port"}]}` into addresses
//! - Merge into the registry, keeping the previous set on any failure
//! - Run on a timer on the client's runtime until shutdown

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time;
use url::Url;

use crate::error::{ClientError, Result};
use crate::execution::pipeline::check_status;
use crate::execution::{Method, WireRequest};
use crate::host::{HostRegistry, MergeOutcome};
use crate::pool::ConnectionPool;
use crate::transport::compression::decompress_response;

const SCHEMES: &[&str] = &["tcp", "http", "ssl", "https", "h2"];

#[derive(Debug, Deserialize)]
struct EndpointListing {
    endpoints: Vec<EndpointEntry>,
}

#[derive(Debug, Deserialize)]
struct EndpointEntry {
    endpoint: String,
}

/// Parse an endpoint listing into `host:port` addresses.
///
/// Entries with an unknown scheme or without a port are skipped.
pub fn parse_endpoints(body: &[u8]) -> Result<Vec<String>> {
    let listing: EndpointListing = serde_json::from_slice(body)?;
    let mut addresses = Vec::with_capacity(listing.endpoints.len());
    for entry in listing.endpoints {
        let url = match Url::parse(&entry.endpoint) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(endpoint = %entry.endpoint, error = %e, "Skipping unparsable endpoint");
                continue;
            }
        };
        if !SCHEMES.contains(&url.scheme()) {
            tracing::warn!(endpoint = %entry.endpoint, "Skipping endpoint with unsupported scheme");
            continue;
        }
        match (url.host_str(), url.port_or_known_default()) {
            (Some(host), Some(port)) => addresses.push(format!("{host}:{port}")),
            _ => tracing::warn!(endpoint = %entry.endpoint, "Skipping endpoint without host and port"),
        }
    }
    Ok(addresses)
}

/// Refreshes the host registry from the cluster's endpoint listing.
#[derive(Debug)]
pub struct TopologyRefresher {
    registry: Arc<HostRegistry>,
    pool: Arc<ConnectionPool>,
    path: String,
    headers: Vec<(String, String)>,
}

impl TopologyRefresher {
    /// `headers` are sent with every listing request (client identity).
    pub fn new(
        registry: Arc<HostRegistry>,
        pool: Arc<ConnectionPool>,
        path: impl Into<String>,
        headers: Vec<(String, String)>,
    ) -> Self {
        Self {
            registry,
            pool,
            path: path.into(),
            headers,
        }
    }

    /// Fetch the listing from the first host that answers and merge it.
    ///
    /// On failure the registry is left untouched and the last error is
    /// returned.
    pub async fn refresh(&self) -> Result<MergeOutcome> {
        let hosts = self.registry.hosts();
        let recovery = self.registry.recovery();
        let mut ordered: Vec<_> = hosts.iter().filter(|h| h.is_eligible(recovery)).collect();
        ordered.extend(hosts.iter().filter(|h| !h.is_eligible(recovery)));

        let mut last_error = ClientError::NoAvailableHost;
        for host in ordered {
            match self.fetch(host.address()).await {
                Ok(addresses) => {
                    self.registry.mark_healthy(host);
                    let outcome = self.registry.merge(addresses);
                    for removed in &outcome.removed {
                        self.pool.remove_host(removed);
                    }
                    return Ok(outcome);
                }
                Err(e) => {
                    tracing::debug!(host = %host.address(), error = %e, "Topology query failed");
                    if e.is_transport() {
                        self.registry.mark_unhealthy(host);
                    }
                    last_error = e;
                }
            }
        }

        tracing::warn!(error = %last_error, "Topology refresh failed, keeping previous host set");
        Err(last_error)
    }

    async fn fetch(&self, address: &str) -> Result<Vec<String>> {
        let request = WireRequest {
            method: Method::Get,
            path: self.path.clone(),
            headers: self.headers.clone(),
            body: Bytes::new(),
        };
        let mut connection = self.pool.acquire(address).await?;
        let response = connection.send(request).await;
        drop(connection);

        let mut response = response?;
        decompress_response(&mut response)?;
        let response = check_status(response)?;
        parse_endpoints(&response.body)
    }

    /// Refresh every `interval` until shutdown. The first refresh happens
    /// one interval after start.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = interval.as_secs(), path = %self.path, "Topology refresher starting");

        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are logged inside refresh.
                    let _ = self.refresh().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Topology refresher received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
