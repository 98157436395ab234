//! Address resolution.
//!
//! Addresses are `host:port` strings. The port is whatever follows the last
//! `:`, so bracketed and bare IPv6 literals both work (`[::1]:25`, `::1:25`).

use std::future::Future;
use std::net::SocketAddr;
use tracing::debug;

use crate::error::{constants, BounceError, Result};

/// Split `host:port` into its parts.
pub fn split_host_port(address: &str) -> Result<(&str, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| resolution_error(address, constants::ERR_MISSING_PORT))?;

    let port = port
        .parse::<u16>()
        .map_err(|_| resolution_error(address, constants::ERR_INVALID_PORT))?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    Ok((host, port))
}

fn resolution_error(address: &str, reason: impl Into<String>) -> BounceError {
    BounceError::ResolutionError {
        address: address.to_string(),
        reason: reason.into(),
    }
}

/// Maps a `host:port` string to connectable endpoints, in preference order.
pub trait Resolver {
    fn resolve(&self, address: &str) -> impl Future<Output = Result<Vec<SocketAddr>>> + Send;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    async fn resolve(&self, address: &str) -> Result<Vec<SocketAddr>> {
        let (host, port) = split_host_port(address)?;

        let endpoints: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| resolution_error(address, e.to_string()))?
            .collect();

        if endpoints.is_empty() {
            return Err(resolution_error(address, constants::ERR_NO_ENDPOINTS));
        }

        debug!(address, candidates = endpoints.len(), "Address resolved");
        Ok(endpoints)
    }
}

/// Resolver returning a fixed endpoint list, for tests and pinned setups.
///
/// The address form is still validated so malformed input fails the same
/// way it does with [`SystemResolver`].
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    endpoints: Vec<SocketAddr>,
}

impl StaticResolver {
    pub fn new(endpoints: Vec<SocketAddr>) -> Self {
        Self { endpoints }
    }
}

impl Resolver for StaticResolver {
    async fn resolve(&self, address: &str) -> Result<Vec<SocketAddr>> {
        split_host_port(address)?;
        if self.endpoints.is_empty() {
            return Err(resolution_error(address, constants::ERR_NO_ENDPOINTS));
        }
        Ok(self.endpoints.clone())
    }
}
