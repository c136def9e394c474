// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TLS material and QUIC tuning shared by both ends of a daemon session.
//!
//! Both endpoints pin TLS 1.3 on the ring provider and advertise the same
//! ALPN token, so a daemon never completes a handshake with an unrelated
//! QUIC client.

use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::{NoInitialCipherSuite, QuicClientConfig, QuicServerConfig};
use quinn::{IdleTimeout, TransportConfig, VarInt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use thiserror::Error;

/// ALPN token spoken by tributary endpoints.
pub const ALPN_PROTOCOL: &[u8] = b"tributary/1";

/// Application close code for an orderly shutdown.
pub const CLOSE_NORMAL: VarInt = VarInt::from_u32(0);

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("invalid certificate chain: {0}")]
    Certificate(String),

    #[error("no private key in PEM input")]
    MissingKey,

    #[error("invalid private key: {0}")]
    Key(String),

    #[error("self-signed certificate generation failed: {0}")]
    SelfSigned(#[from] rcgen::Error),

    #[error("rustls rejected the configuration: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("TLS setup is not usable for QUIC: {0}")]
    Quic(#[from] NoInitialCipherSuite),

    #[error("idle timeout of {0}ms is out of range")]
    IdleTimeout(u64),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client crypto. With `verify_peer` unset the daemon certificate is
/// accepted as presented, handshake signatures are still checked.
pub(crate) fn client_crypto(verify_peer: bool) -> Result<Arc<QuicClientConfig>, TlsError> {
    let provider = provider();
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13])?;

    let mut crypto = if verify_peer {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AnyCertificate(provider)))
            .with_no_client_auth()
    };
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    Ok(Arc::new(QuicClientConfig::try_from(crypto)?))
}

/// Server crypto from a PEM certificate chain and private key.
pub(crate) fn server_crypto(
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<Arc<QuicServerConfig>, TlsError> {
    let chain = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(e.to_string()))?;
    if chain.is_empty() {
        return Err(TlsError::Certificate("no certificate in PEM input".to_string()));
    }
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| TlsError::Key(e.to_string()))?
        .ok_or(TlsError::MissingKey)?;

    let mut crypto = rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    Ok(Arc::new(QuicServerConfig::try_from(crypto)?))
}

/// PEM certificate and key for the given subject names.
pub fn self_signed(names: &[&str]) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
    let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
    let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(names)?;
    Ok((cert.pem().into_bytes(), key_pair.serialize_pem().into_bytes()))
}

/// Keep-alive and idle limits. Zero disables either one.
pub(crate) fn tuning(
    keep_alive_interval_ms: u64,
    idle_timeout_ms: u64,
) -> Result<TransportConfig, TlsError> {
    let mut transport = TransportConfig::default();
    transport.keep_alive_interval(
        (keep_alive_interval_ms > 0).then(|| Duration::from_millis(keep_alive_interval_ms)),
    );

    let idle: Option<IdleTimeout> = match idle_timeout_ms {
        0 => None,
        ms => Some(
            Duration::from_millis(ms)
                .try_into()
                .map_err(|_| TlsError::IdleTimeout(ms))?,
        ),
    };
    transport.max_idle_timeout(idle);
    Ok(transport)
}

/// Skips chain and name validation for self-signed daemons.
#[derive(Debug)]
struct AnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AnyCertificate {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
