//! Server guessing from an email address
//!
//! Candidates are `<prefix><domain>` on the secure port, probed with a short
//! TLS handshake (no login). When none answers, the domain's best MX host is
//! used on the secure port.

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::config::ConnectionConfig;
use crate::error::{CleanupError, Result};
use crate::models::ServerAddr;
use crate::transport;

/// local@domain with a dotted domain
static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@([A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)+)$").unwrap());

/// Domain part of an email address
pub fn domain_of(email: &str) -> Result<String> {
    EMAIL_REGEX
        .captures(email.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
        .ok_or_else(|| CleanupError::ResolutionError(format!("Invalid email address: {}", email)))
}

/// Reachability check for a candidate server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, addr: &ServerAddr) -> bool;
}

/// Mail-routing lookup for a domain
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MxLookup: Send + Sync {
    /// Host of the most preferred MX record, if any
    async fn best_exchange(&self, domain: &str) -> Option<String>;
}

/// Probes with TCP connect + TLS handshake under a timeout
pub struct TlsProber {
    timeout: Duration,
}

impl TlsProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn handshake(&self, addr: &ServerAddr) -> Result<()> {
        let config = transport::probe_config()?;
        let tcp = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
        transport::tls_handshake(config, &addr.host, tcp).await?;
        Ok(())
    }
}

#[async_trait]
impl Prober for TlsProber {
    async fn probe(&self, addr: &ServerAddr) -> bool {
        match timeout(self.timeout, self.handshake(addr)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Probe {} failed: {}", addr, e);
                false
            }
            Err(_) => {
                debug!("Probe {} timed out after {:?}", addr, self.timeout);
                false
            }
        }
    }
}

/// MX lookup through the system resolver configuration
pub struct DnsMxLookup {
    resolver: TokioAsyncResolver,
}

impl DnsMxLookup {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(Default::default(), Default::default()),
        }
    }
}

impl Default for DnsMxLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MxLookup for DnsMxLookup {
    async fn best_exchange(&self, domain: &str) -> Option<String> {
        let lookup = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(e) => {
                debug!("MX lookup for {} failed: {}", domain, e);
                return None;
            }
        };

        let mut records: Vec<_> = lookup.into_iter().collect();
        records.sort_by_key(|mx| mx.preference());
        debug!("{}: discovered {} MX record(s)", domain, records.len());

        records.into_iter().next().map(|mx| {
            mx.exchange()
                .to_utf8()
                .trim_end_matches('.')
                .to_string()
        })
    }
}

/// Guess the IMAP server for an email address
pub async fn resolve(
    email: &str,
    config: &ConnectionConfig,
    prober: &dyn Prober,
    mx: &dyn MxLookup,
) -> Result<ServerAddr> {
    let domain = domain_of(email)?;

    for prefix in &config.probe_prefixes {
        let candidate = ServerAddr::new(format!("{}{}", prefix, domain), config.secure_port);
        debug!("Probing {}", candidate);
        if prober.probe(&candidate).await {
            info!("Using guessed server {}", candidate);
            return Ok(candidate);
        }
    }

    match mx.best_exchange(&domain).await {
        Some(host) if !host.is_empty() => {
            let addr = ServerAddr::new(host, config.secure_port);
            info!("No conventional host answered, using MX {}", addr);
            Ok(addr)
        }
        _ => Err(CleanupError::ResolutionError(format!(
            "No reachable IMAP server for {} and no MX record",
            domain
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("alice@Example.COM").unwrap(), "example.com");
        assert_eq!(domain_of(" bob@mail.example.org ").unwrap(), "mail.example.org");
        assert!(matches!(
            domain_of("not-an-address"),
            Err(CleanupError::ResolutionError(_))
        ));
        assert!(domain_of("alice@localhost").is_err());
    }

    #[tokio::test]
    async fn test_first_reachable_prefix_wins() {
        let config = ConnectionConfig::default();
        let mut prober = MockProber::new();
        prober
            .expect_probe()
            .with(eq(ServerAddr::new("imap.example.com", 993)))
            .times(1)
            .returning(|_| false);
        prober
            .expect_probe()
            .with(eq(ServerAddr::new("mail.example.com", 993)))
            .times(1)
            .returning(|_| true);
        let mut mx = MockMxLookup::new();
        mx.expect_best_exchange().never();

        let addr = resolve("me@example.com", &config, &prober, &mx)
            .await
            .unwrap();
        assert_eq!(addr, ServerAddr::new("mail.example.com", 993));
    }

    #[tokio::test]
    async fn test_bare_domain_is_last_prefix() {
        let config = ConnectionConfig::default();
        let mut prober = MockProber::new();
        prober
            .expect_probe()
            .returning(|addr| addr.host == "example.com");
        let mx = MockMxLookup::new();

        let addr = resolve("me@example.com", &config, &prober, &mx)
            .await
            .unwrap();
        assert_eq!(addr.host, "example.com");
    }

    #[tokio::test]
    async fn test_mx_fallback_on_secure_port() {
        let config = ConnectionConfig::default();
        let mut prober = MockProber::new();
        prober.expect_probe().times(3).returning(|_| false);
        let mut mx = MockMxLookup::new();
        mx.expect_best_exchange()
            .with(eq("example.com"))
            .returning(|_| Some("mx1.provider.net".to_string()));

        let addr = resolve("me@example.com", &config, &prober, &mx)
            .await
            .unwrap();
        assert_eq!(addr, ServerAddr::new("mx1.provider.net", 993));
    }

    #[tokio::test]
    async fn test_no_candidate_and_no_mx_fails() {
        let config = ConnectionConfig::default();
        let mut prober = MockProber::new();
        prober.expect_probe().returning(|_| false);
        let mut mx = MockMxLookup::new();
        mx.expect_best_exchange().returning(|_| None);

        let result = resolve("me@example.com", &config, &prober, &mx).await;
        assert!(matches!(result, Err(CleanupError::ResolutionError(_))));
    }
}
