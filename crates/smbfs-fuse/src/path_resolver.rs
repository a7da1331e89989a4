//! Share URL construction with an optional resolved-address override.
//!
//! The share is configured as `smb://host/share`. When the host name has
//! already been resolved (e.g. by a NetBIOS lookup the client library cannot
//! do), the host segment can be swapped for the IPv4 address while the share
//! portion is kept verbatim. Kerberos needs the real host name for ticketing,
//! so callers decide whether the override is applied.

use std::net::Ipv4Addr;

use smbfs_mount::SharePath;
use thiserror::Error;
use tracing::{debug, error};

/// URL scheme prefix for SMB shares.
pub const SMB_URL_PREFIX: &str = "smb://";

/// Errors from share URL handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The URL is not of the form `smb://host/share[/...]`.
    #[error("Invalid share URL {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The resolved address is not a 4-byte IPv4 address.
    #[error("Unsupported resolved address of {0} bytes")]
    UnsupportedAddress(usize),
}

/// Validates a share URL and returns the byte offset where the host ends.
fn parse_share_url(url: &str) -> Result<usize, ResolveError> {
    let invalid = |reason| ResolveError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let rest = url
        .strip_prefix(SMB_URL_PREFIX)
        .ok_or_else(|| invalid("missing smb:// prefix"))?;
    if url.ends_with('/') {
        return Err(invalid("trailing '/'"));
    }
    let host_len = rest.find('/').ok_or_else(|| invalid("no share name"))?;
    if host_len == 0 {
        return Err(invalid("empty host"));
    }
    let share = &rest[host_len + 1..];
    if share.is_empty() || share.starts_with('/') {
        return Err(invalid("empty share name"));
    }
    Ok(SMB_URL_PREFIX.len() + host_len)
}

/// Returns Ok if `url` is a usable share URL.
pub fn validate_share_url(url: &str) -> Result<(), ResolveError> {
    parse_share_url(url).map(|_| ())
}

/// Holds the configured share URL and the URL currently in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    share_url: String,
    host_end: usize,
    resolved_url: String,
}

impl PathResolver {
    /// Creates a resolver for `share_url` with no override.
    pub fn new(share_url: &str) -> Result<Self, ResolveError> {
        let host_end = parse_share_url(share_url)?;
        Ok(Self {
            share_url: share_url.to_string(),
            host_end,
            resolved_url: share_url.to_string(),
        })
    }

    /// Replaces the host with a resolved IPv4 address, or reverts to the
    /// configured URL when `address` is empty.
    ///
    /// Anything other than four bytes leaves the current URL unchanged.
    pub fn set_resolved_address(&mut self, address: &[u8]) -> Result<(), ResolveError> {
        if address.is_empty() {
            self.resolved_url.clone_from(&self.share_url);
            debug!(url = %self.resolved_url, "Cleared resolved address");
            return Ok(());
        }

        let Ok(octets) = <[u8; 4]>::try_from(address) else {
            error!(len = address.len(), "Unsupported resolved address, only IPv4 is supported");
            return Err(ResolveError::UnsupportedAddress(address.len()));
        };
        let ip = Ipv4Addr::from(octets);
        self.resolved_url = format!(
            "{SMB_URL_PREFIX}{ip}{}",
            &self.share_url[self.host_end..]
        );
        debug!(url = %self.resolved_url, "Using resolved share address");
        Ok(())
    }

    /// The URL of the share root as currently resolved.
    pub fn base_url(&self) -> &str {
        &self.resolved_url
    }

    /// The URL as configured, without any override.
    pub fn share_url(&self) -> &str {
        &self.share_url
    }

    /// The backend URL for a path inside the share.
    pub fn url_for(&self, path: &SharePath) -> String {
        if path.is_root() {
            self.resolved_url.clone()
        } else {
            format!("{}{path}", self.resolved_url)
        }
    }
}
