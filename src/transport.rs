//! Transport-security negotiation
//!
//! A connection is attempted tier by tier, strictest first:
//!
//! 1. **Modern**: TLS 1.3/1.2 with the provider's full cipher-suite set and
//!    the server certificate verified against the platform trust store.
//! 2. **Legacy**: TLS 1.2 only, ECDHE + AES-GCM suites only, certificate
//!    not verified (self-signed and mismatched hosts are accepted).
//! 3. **Plaintext**: only on the plaintext port and only when the operator
//!    opted in with `--allow-plain`.
//!
//! On the plaintext port the TLS tiers go through STARTTLS; on every other
//! port TLS is implicit.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CipherSuite, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{CleanupError, Result};
use crate::models::ServerAddr;

/// Suites allowed on the legacy tier
const LEGACY_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
];

const STARTTLS_TAG: &str = "A1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityTier {
    Modern,
    Legacy,
    Plaintext,
}

impl SecurityTier {
    /// One-line notice shown once a tier is in use
    pub fn advisory(&self) -> &'static str {
        match self {
            SecurityTier::Modern => "✅ Modern TLS",
            SecurityTier::Legacy => "⚠️  Legacy TLS (certificate not verified)",
            SecurityTier::Plaintext => "⚠️  Plain IMAP (credentials sent unencrypted)",
        }
    }

    pub fn is_downgrade(&self) -> bool {
        !matches!(self, SecurityTier::Modern)
    }
}

impl fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityTier::Modern => f.write_str("modern TLS"),
            SecurityTier::Legacy => f.write_str("legacy TLS"),
            SecurityTier::Plaintext => f.write_str("plaintext"),
        }
    }
}

/// Ordered tiers permitted for a port
pub fn tiers_for(port: u16, plaintext_port: u16, allow_plain: bool) -> Vec<SecurityTier> {
    let mut tiers = vec![SecurityTier::Modern, SecurityTier::Legacy];
    if allow_plain && port == plaintext_port {
        tiers.push(SecurityTier::Plaintext);
    }
    tiers
}

/// Byte stream under an IMAP session, encrypted or not
pub enum ImapStream {
    Tls(Box<TlsStream<TcpStream>>),
    Plain(TcpStream),
}

impl tokio::io::AsyncRead for ImapStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ImapStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_read(cx, buf),
            ImapStream::Plain(s) => std::pin::Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for ImapStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ImapStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_write(cx, buf),
            ImapStream::Plain(s) => std::pin::Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ImapStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_flush(cx),
            ImapStream::Plain(s) => std::pin::Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ImapStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_shutdown(cx),
            ImapStream::Plain(s) => std::pin::Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl fmt::Debug for ImapStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImapStream::Tls(_) => write!(f, "ImapStream::Tls"),
            ImapStream::Plain(_) => write!(f, "ImapStream::Plain"),
        }
    }
}

/// An open stream ready for LOGIN
#[derive(Debug)]
pub struct Connection {
    pub stream: ImapStream,
    pub tier: SecurityTier,
    /// STARTTLS reads the greeting before the upgrade
    pub greeting_consumed: bool,
}

/// Try `attempt` for each tier in order and keep the first success.
///
/// Prints the advisory for the tier in use. Fails with `NegotiationError`
/// listing every tier's failure when none works.
pub async fn negotiate_with<T, F, Fut>(
    tiers: &[SecurityTier],
    mut attempt: F,
) -> Result<(T, SecurityTier)>
where
    F: FnMut(SecurityTier) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures = Vec::new();

    for &tier in tiers {
        debug!("Trying {}", tier);
        match attempt(tier).await {
            Ok(value) => {
                if tier.is_downgrade() {
                    warn!("Connected with {} after stricter tiers failed", tier);
                } else {
                    info!("Connected with {}", tier);
                }
                println!("{}", tier.advisory());
                return Ok((value, tier));
            }
            Err(e) => {
                debug!("{} failed: {}", tier, e);
                failures.push(format!("{}: {}", tier, e));
            }
        }
    }

    Err(CleanupError::NegotiationError(if failures.is_empty() {
        "no security tier permitted".to_string()
    } else {
        failures.join("; ")
    }))
}

/// Open a connection to `addr` using the strongest tier that works
pub async fn negotiate(
    addr: &ServerAddr,
    config: &ConnectionConfig,
    allow_plain: bool,
) -> Result<Connection> {
    let starttls = addr.port == config.plaintext_port;
    let tiers = tiers_for(addr.port, config.plaintext_port, allow_plain);

    info!(
        "Connecting to {} ({})",
        addr,
        if starttls { "STARTTLS" } else { "implicit TLS" }
    );

    let (connection, _) =
        negotiate_with(&tiers, |tier| connect_tier(addr, tier, starttls)).await?;
    Ok(connection)
}

async fn connect_tier(addr: &ServerAddr, tier: SecurityTier, starttls: bool) -> Result<Connection> {
    let mut tcp = TcpStream::connect((addr.host.as_str(), addr.port))
        .await
        .map_err(|e| CleanupError::NegotiationError(format!("TCP connect to {}: {}", addr, e)))?;

    let config = match tier {
        SecurityTier::Plaintext => {
            return Ok(Connection {
                stream: ImapStream::Plain(tcp),
                tier,
                greeting_consumed: false,
            });
        }
        SecurityTier::Modern => modern_config()?,
        SecurityTier::Legacy => legacy_config()?,
    };

    if starttls {
        starttls_upgrade(&mut tcp).await?;
    }

    let stream = tls_handshake(config, &addr.host, tcp).await?;
    Ok(Connection {
        stream: ImapStream::Tls(Box::new(stream)),
        tier,
        greeting_consumed: starttls,
    })
}

pub(crate) async fn tls_handshake(
    config: ClientConfig,
    host: &str,
    tcp: TcpStream,
) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| CleanupError::NegotiationError(format!("Invalid host name: {}", host)))?;
    TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| CleanupError::NegotiationError(format!("TLS handshake with {}: {}", host, e)))
}

/// Issue STARTTLS on a fresh plaintext connection
async fn starttls_upgrade(tcp: &mut TcpStream) -> Result<()> {
    let mut reader = BufReader::new(tcp);

    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if !line.starts_with("* OK") {
        return Err(CleanupError::NegotiationError(format!(
            "Unexpected server greeting: {}",
            line.trim_end()
        )));
    }

    reader
        .get_mut()
        .write_all(format!("{} STARTTLS\r\n", STARTTLS_TAG).as_bytes())
        .await?;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(CleanupError::NegotiationError(
                "Connection closed during STARTTLS".to_string(),
            ));
        }
        // Untagged responses (e.g. CAPABILITY) may precede the tagged one
        if let Some(status) = line.strip_prefix(STARTTLS_TAG) {
            if status.trim_start().starts_with("OK") {
                return Ok(());
            }
            return Err(CleanupError::NegotiationError(format!(
                "STARTTLS rejected: {}",
                line.trim_end()
            )));
        }
    }
}

fn installed_provider() -> Result<Arc<CryptoProvider>> {
    CryptoProvider::get_default()
        .cloned()
        .ok_or_else(|| CleanupError::NegotiationError("No TLS crypto provider installed".to_string()))
}

fn modern_config() -> Result<ClientConfig> {
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        debug!("Skipping native certificate: {}", error);
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!("Loaded {} trusted roots ({} ignored)", added, ignored);
    if roots.is_empty() {
        return Err(CleanupError::NegotiationError(
            "No trusted root certificates found".to_string(),
        ));
    }

    Ok(ClientConfig::builder_with_provider(installed_provider()?)
        .with_safe_default_protocol_versions()
        .map_err(|e| CleanupError::NegotiationError(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn legacy_config() -> Result<ClientConfig> {
    let base = installed_provider()?;
    let provider = CryptoProvider {
        cipher_suites: base
            .cipher_suites
            .iter()
            .filter(|suite| LEGACY_CIPHER_SUITES.contains(&suite.suite()))
            .copied()
            .collect(),
        ..(*base).clone()
    };
    let provider = Arc::new(provider);

    Ok(ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12])
        .map_err(|e| CleanupError::NegotiationError(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        .with_no_client_auth())
}

/// TLS config for reachability probes: any version, any certificate
pub(crate) fn probe_config() -> Result<ClientConfig> {
    let provider = installed_provider()?;
    Ok(ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| CleanupError::NegotiationError(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        .with_no_client_auth())
}

/// Certificate verifier that accepts any server identity
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
