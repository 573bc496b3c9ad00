//! TLS client configuration, handshake and certificate pinning.
//!
//! # Responsibilities
//! - Build a rustls client config: trust roots, optional client certificate,
//!   verification disabled for unsecured or ignore-validation connections
//! - Verify the server against a name that may differ from the SNI value
//! - Compare the server's public key with a locally pinned PEM file

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{MessagingError, TimeoutKind, TlsError};
use crate::net::metadata::ClientAuth;
use crate::resilience::timeouts;

/// Inputs for [`build_client_config`].
#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// Verify the server certificate chain and name.
    pub verify: bool,
    /// Name the certificate must be valid for.
    pub verify_host: String,
    pub client_auth: Option<ClientAuth>,
    pub certificate_chain_path: String,
    pub trusted_ca_dir: Option<String>,
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

pub fn build_client_config(options: &TlsOptions) -> Result<Arc<ClientConfig>, TlsError> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Context(e.to_string()))?;

    let verifier: Arc<dyn ServerCertVerifier> = if options.verify {
        let roots = load_root_store(&options.certificate_chain_path, options.trusted_ca_dir.as_deref())?;
        let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| TlsError::Context(e.to_string()))?;
        Arc::new(HostnameOverrideVerifier {
            inner: webpki,
            name: server_name(&options.verify_host)?,
        })
    } else {
        tracing::debug!("Server certificate verification is disabled");
        Arc::new(NoVerifier)
    };

    let builder = builder.dangerous().with_custom_certificate_verifier(verifier);

    let config = match &options.client_auth {
        Some(auth) => {
            let certs = load_certs(Path::new(&auth.cert_path))?;
            let key = load_private_key(Path::new(&auth.key_path))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| TlsError::Context(format!("invalid client certificate: {e}")))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host.to_string()).map_err(|e| TlsError::Context(format!("invalid server name '{host}': {e}")))
}

/// Trust roots from the certificate chain file and every PEM file in the CA directory.
fn load_root_store(chain_path: &str, ca_dir: Option<&str>) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();

    let chain = Path::new(chain_path);
    if chain.is_file() {
        let (added, ignored) = roots.add_parsable_certificates(load_certs(chain)?);
        tracing::debug!(path = %chain_path, added, ignored, "Loaded certificate chain");
    }

    if let Some(dir) = ca_dir {
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if !path.is_file() {
                        continue;
                    }
                    // Non-certificate files in the directory are skipped.
                    if let Ok(certs) = load_certs(&path) {
                        roots.add_parsable_certificates(certs);
                    }
                }
            }
            Err(e) => tracing::debug!(dir = %dir, error = %e, "Trusted CA directory is not readable"),
        }
    }

    if roots.is_empty() {
        return Err(TlsError::Context(format!(
            "no trusted certificates found in {chain_path} or {}",
            ca_dir.unwrap_or("<none>")
        )));
    }
    Ok(roots)
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Context(format!("{}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Context(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(TlsError::Context(format!("{}: no certificates found", path.display())));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Context(format!("{}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| TlsError::Context(format!("{}: {e}", path.display())))?
        .ok_or_else(|| TlsError::Context(format!("{}: no private key found", path.display())))
}

/// Run the client handshake over `tcp` within `limit`.
pub async fn handshake(
    config: Arc<ClientConfig>,
    sni: ServerName<'static>,
    tcp: TcpStream,
    limit: Duration,
) -> Result<TlsStream<TcpStream>, MessagingError> {
    let connector = TlsConnector::from(config);
    let stream = timeouts::within(TimeoutKind::Handshake, limit, connector.connect(sni, tcp))
        .await?
        .map_err(classify_handshake_error)?;
    Ok(stream)
}

fn classify_handshake_error(err: std::io::Error) -> MessagingError {
    let rustls_error = err.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>());
    match rustls_error {
        Some(rustls::Error::InvalidCertificate(reason)) => TlsError::Verification(format!("{reason:?}")).into(),
        _ => TlsError::Handshake(err.to_string()).into(),
    }
}

/// The server's leaf certificate, if it presented one.
pub fn peer_leaf_certificate(stream: &TlsStream<TcpStream>) -> Option<CertificateDer<'static>> {
    stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| cert.clone().into_owned())
}

/// PEM encoding (LF line endings) of the certificate's SubjectPublicKeyInfo.
pub fn public_key_pem(cert: &CertificateDer<'_>) -> Result<String, TlsError> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| TlsError::Pinning(format!("failed to parse peer certificate: {e}")))?;
    let spki = parsed.public_key().raw.to_vec();
    let encoded = pem::encode_config(
        &pem::Pem::new("PUBLIC KEY", spki),
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    );
    Ok(encoded)
}

/// Compare the certificate's public key with the pinned PEM file, byte for byte.
pub fn verify_pinned_key(cert: &CertificateDer<'_>, pinned_path: &Path) -> Result<(), TlsError> {
    let pinned = std::fs::read(pinned_path)
        .map_err(|e| TlsError::Pinning(format!("failed to read {}: {e}", pinned_path.display())))?;
    let actual = public_key_pem(cert)?;
    if actual.as_bytes() != pinned.as_slice() {
        return Err(TlsError::Pinning("peer public key does not match the pinned key".to_string()));
    }
    Ok(())
}

/// Full webpki verification against a fixed name instead of the SNI value.
#[derive(Debug)]
struct HostnameOverrideVerifier {
    inner: Arc<WebPkiServerVerifier>,
    name: ServerName<'static>,
}

impl ServerCertVerifier for HostnameOverrideVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.inner
            .verify_server_cert(end_entity, intermediates, &self.name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any server certificate.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}
