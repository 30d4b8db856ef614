//! A TLS client authenticating with a certificate and a private key held by
//! the token.
//!
//! Handshake signatures are computed by the HSM; trust anchors are the
//! certificate objects of the token.

use std::{
    io::{ErrorKind, Read, Write},
    net::TcpStream,
    path::Path,
    sync::{Arc, Mutex, Once},
};

use clap::Parser;
use cosmian_pkcs11_sys::{
    CK_OBJECT_HANDLE, CKA_CLASS, CKA_EC_PARAMS, CKA_KEY_TYPE, CKA_LABEL, CKA_VALUE, CKK_EC,
    CKK_RSA, CKO_CERTIFICATE, CKO_PRIVATE_KEY,
};
use luna_base_hsm::{EcCurve, Session, Template};
use rustls::{
    ClientConfig, ClientConnection, RootCertStore, StreamOwned,
    client::danger::ServerCertVerifier,
    pki_types::{CertificateDer, ServerName},
    sign::CertifiedKey,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    actions::{load_hsm, open_user_session},
    error::result::{SampleResult, SampleResultHelper},
    sample_bail, sample_ensure, sample_error,
};

mod signer;
mod verifier;

use signer::{TokenCertResolver, TokenKeyKind, TokenSigningKey};
use verifier::{NameIgnoringVerifier, NoVerifier};

static INIT_CRYPTO: Once = Once::new();

/// Install the AWS LC crypto provider as the process default for rustls
fn initialize_aws_lc_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        if let Err(_e) = provider.install_default() {
            error!("Failed to install the aws_lc crypto provider");
        }
    });
}

/// Fetch an HTTPS URL with a client certificate held by the token
///
/// The certificate and the private key are the token objects labelled
/// `--key-label`. Every certificate object of the token is trusted as a root.
/// The server host name is not checked.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct SslClientAction {
    /// The `https://` URL to fetch
    pub url: String,

    #[clap(long, short = 's', default_value_t = 0)]
    pub slot: usize,

    /// User password of the slot
    #[clap(long, short = 'p')]
    pub password: Option<String>,

    /// Label of the client certificate and of its private key
    #[clap(long = "key-label", short = 'k', default_value = "lunassl")]
    pub key_label: String,

    /// Do not verify the server certificate at all
    #[clap(long)]
    pub insecure: bool,
}

impl SslClientAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let target = HttpsTarget::parse(&self.url)?;
        initialize_aws_lc_crypto_provider();

        let hsm = load_hsm(pkcs11_lib)?;
        let session = open_user_session(&hsm, self.slot, self.password.as_deref())?;

        let (certificate, private_key, kind) = client_credentials(&session, &self.key_label)?;
        let verifier: Arc<dyn ServerCertVerifier> = if self.insecure {
            warn!("the server certificate is not verified");
            Arc::new(NoVerifier::new())
        } else {
            Arc::new(NameIgnoringVerifier::new(trust_anchors(&session)?)?)
        };

        let session = Arc::new(Mutex::new(session));
        let signing_key = Arc::new(TokenSigningKey::new(session.clone(), private_key, kind));
        let certified_key = CertifiedKey::new(vec![certificate], signing_key);
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_cert_resolver(Arc::new(TokenCertResolver::new(Arc::new(certified_key))));

        let body = target.get(Arc::new(config))?;
        println!("{}", String::from_utf8_lossy(&body));

        let session = session
            .lock()
            .map_err(|e| sample_error!("session lock poisoned: {e}"))?;
        session.close()?;
        Ok(())
    }
}

/// The client certificate, its private key and the kind of that key
fn client_credentials(
    session: &Session,
    label: &str,
) -> SampleResult<(CertificateDer<'static>, CK_OBJECT_HANDLE, TokenKeyKind)> {
    let certificate = session
        .find_object(
            &Template::new()
                .ulong(CKA_CLASS, CKO_CERTIFICATE)
                .bytes(CKA_LABEL, label),
        )?
        .with_context(|| format!("no single certificate labelled {label} on the token"))?;
    let certificate = CertificateDer::from(session.get_attribute(certificate, CKA_VALUE)?);

    let private_key = session
        .find_object(
            &Template::new()
                .ulong(CKA_CLASS, CKO_PRIVATE_KEY)
                .bytes(CKA_LABEL, label),
        )?
        .with_context(|| format!("no single private key labelled {label} on the token"))?;
    let kind = match session.get_ulong_attribute(private_key, CKA_KEY_TYPE)? {
        CKK_RSA => TokenKeyKind::Rsa,
        CKK_EC => {
            let params = session.get_attribute(private_key, CKA_EC_PARAMS)?;
            TokenKeyKind::Ec(
                EcCurve::from_der_oid(&params).context("unsupported curve for the TLS key")?,
            )
        }
        other => sample_bail!("unsupported key type {other:#x} for the TLS key"),
    };
    debug!("client key {label}: handle {private_key}, {kind:?}");
    Ok((certificate, private_key, kind))
}

/// Every certificate stored on the token
fn trust_anchors(session: &Session) -> SampleResult<RootCertStore> {
    let handles = session.find_objects(&Template::new().ulong(CKA_CLASS, CKO_CERTIFICATE))?;
    let certificates = handles
        .into_iter()
        .map(|handle| {
            session
                .get_attribute(handle, CKA_VALUE)
                .map(CertificateDer::from)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certificates);
    info!("{added} trusted certificates found on the token, {ignored} ignored");
    sample_ensure!(
        !roots.is_empty(),
        "no usable certificate on the token to verify the server with"
    );
    Ok(roots)
}

/// Where to send the request
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct HttpsTarget {
    host: String,
    port: u16,
    path: String,
}

impl HttpsTarget {
    pub(crate) fn parse(url: &str) -> SampleResult<Self> {
        let url = Url::parse(url)?;
        sample_ensure!(
            url.scheme() == "https",
            "expected an https URL, got {}",
            url.scheme()
        );
        let host = url.host_str().context("the URL has no host")?.to_owned();
        let port = url.port_or_known_default().context("the URL has no port")?;
        let path = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        };
        Ok(Self { host, port, path })
    }

    fn request(&self) -> String {
        format!(
            "GET {} HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.path, self.host
        )
    }

    /// Send a GET request and return the body of the response
    fn get(&self, config: Arc<ClientConfig>) -> SampleResult<Vec<u8>> {
        let server_name = ServerName::try_from(self.host.clone())
            .with_context(|| format!("invalid server name {}", self.host))?;
        let connection = ClientConnection::new(config, server_name)?;
        let socket = TcpStream::connect((self.host.as_str(), self.port))
            .with_context(|| format!("cannot connect to {}:{}", self.host, self.port))?;
        let mut stream = StreamOwned::new(connection, socket);

        stream.write_all(self.request().as_bytes())?;
        stream.flush()?;

        let mut response = Vec::new();
        if let Err(e) = stream.read_to_end(&mut response) {
            // servers often close the connection without a close_notify alert
            if e.kind() != ErrorKind::UnexpectedEof {
                return Err(e.into())
            }
        }
        let (status, body) = split_response(&response);
        info!("server answered: {status}");
        Ok(body.to_vec())
    }
}

/// The status line and the body of an HTTP response
pub(crate) fn split_response(response: &[u8]) -> (String, &[u8]) {
    let status_end = response
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(response.len());
    let status = String::from_utf8_lossy(&response[..status_end]).into_owned();
    let body = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map_or(&response[response.len()..], |i| &response[i + 4..]);
    (status, body)
}
