use std::{
    fmt,
    sync::{Arc, Mutex},
};

use cosmian_pkcs11_sys::CK_OBJECT_HANDLE;
use luna_base_hsm::{EcCurve, Mechanism, Session};
use rustls::{
    SignatureAlgorithm, SignatureScheme,
    client::ResolvesClientCert,
    sign::{CertifiedKey, Signer, SigningKey},
};
use tracing::{debug, trace};

use crate::actions::ecdsa_demo::ecdsa_raw_to_der;

/// RSA schemes in order of preference
const RSA_SCHEMES: [(SignatureScheme, Mechanism); 4] = [
    (SignatureScheme::RSA_PSS_SHA256, Mechanism::Sha256RsaPkcsPss),
    (SignatureScheme::RSA_PSS_SHA384, Mechanism::Sha384RsaPkcsPss),
    (SignatureScheme::RSA_PKCS1_SHA256, Mechanism::Sha256RsaPkcs),
    (SignatureScheme::RSA_PKCS1_SHA384, Mechanism::Sha384RsaPkcs),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKeyKind {
    Rsa,
    Ec(EcCurve),
}

/// The scheme to sign the handshake with among those the server offers, and
/// the token mechanism computing it
pub(crate) fn select_scheme(
    kind: TokenKeyKind,
    offered: &[SignatureScheme],
) -> Option<(SignatureScheme, Mechanism)> {
    match kind {
        TokenKeyKind::Rsa => RSA_SCHEMES
            .into_iter()
            .find(|(scheme, _)| offered.contains(scheme)),
        TokenKeyKind::Ec(curve) => {
            let candidate = match curve {
                EcCurve::P256 => (SignatureScheme::ECDSA_NISTP256_SHA256, Mechanism::EcdsaSha256),
                EcCurve::P384 => (SignatureScheme::ECDSA_NISTP384_SHA384, Mechanism::EcdsaSha384),
                // no hash-and-sign mechanism for SHA512 on the token
                EcCurve::P521 => return None,
            };
            offered.contains(&candidate.0).then_some(candidate)
        }
    }
}

/// A private key which never leaves the token
pub(crate) struct TokenSigningKey {
    session: Arc<Mutex<Session>>,
    handle: CK_OBJECT_HANDLE,
    kind: TokenKeyKind,
}

impl TokenSigningKey {
    pub(crate) const fn new(
        session: Arc<Mutex<Session>>,
        handle: CK_OBJECT_HANDLE,
        kind: TokenKeyKind,
    ) -> Self {
        Self {
            session,
            handle,
            kind,
        }
    }
}

impl fmt::Debug for TokenSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigningKey")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl SigningKey for TokenSigningKey {
    fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<Box<dyn Signer>> {
        let (scheme, mechanism) = select_scheme(self.kind, offered)?;
        debug!("signing the handshake with {scheme:?}");
        Some(Box::new(TokenSigner {
            session: self.session.clone(),
            handle: self.handle,
            scheme,
            mechanism,
        }))
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        match self.kind {
            TokenKeyKind::Rsa => SignatureAlgorithm::RSA,
            TokenKeyKind::Ec(_) => SignatureAlgorithm::ECDSA,
        }
    }
}

struct TokenSigner {
    session: Arc<Mutex<Session>>,
    handle: CK_OBJECT_HANDLE,
    scheme: SignatureScheme,
    mechanism: Mechanism,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("handle", &self.handle)
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl Signer for TokenSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, rustls::Error> {
        let session = self
            .session
            .lock()
            .map_err(|e| rustls::Error::General(format!("session lock poisoned: {e}")))?;
        let signature = session
            .sign(self.handle, self.mechanism, message)
            .map_err(|e| rustls::Error::General(format!("signature on the token failed: {e}")))?;
        trace!("{} bytes signed on the token", message.len());
        match self.scheme {
            SignatureScheme::ECDSA_NISTP256_SHA256 | SignatureScheme::ECDSA_NISTP384_SHA384 => {
                ecdsa_raw_to_der(&signature).map_err(|e| rustls::Error::General(e.to_string()))
            }
            _ => Ok(signature),
        }
    }

    fn scheme(&self) -> SignatureScheme {
        self.scheme
    }
}

/// Always presents the same certificate, whatever the server asks for
#[derive(Debug)]
pub(crate) struct TokenCertResolver(Arc<CertifiedKey>);

impl TokenCertResolver {
    pub(crate) const fn new(certified_key: Arc<CertifiedKey>) -> Self {
        Self(certified_key)
    }
}

impl ResolvesClientCert for TokenCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        // the signer is chosen later: refuse early when no scheme fits
        self.0.key.choose_scheme(sigschemes)?;
        Some(self.0.clone())
    }

    fn has_certs(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use luna_base_hsm::{EcCurve, Mechanism};
    use rustls::SignatureScheme;

    use super::{TokenKeyKind, select_scheme};

    #[test]
    fn test_rsa_scheme_preference() {
        let offered = [
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
        ];
        assert_eq!(
            select_scheme(TokenKeyKind::Rsa, &offered),
            Some((SignatureScheme::RSA_PSS_SHA384, Mechanism::Sha384RsaPkcsPss))
        );
        assert_eq!(
            select_scheme(TokenKeyKind::Rsa, &[SignatureScheme::RSA_PKCS1_SHA256]),
            Some((SignatureScheme::RSA_PKCS1_SHA256, Mechanism::Sha256RsaPkcs))
        );
        assert_eq!(
            select_scheme(TokenKeyKind::Rsa, &[SignatureScheme::ED25519]),
            None
        );
    }

    #[test]
    fn test_ec_scheme_follows_curve() {
        let offered = [
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
        ];
        assert_eq!(
            select_scheme(TokenKeyKind::Ec(EcCurve::P256), &offered),
            Some((SignatureScheme::ECDSA_NISTP256_SHA256, Mechanism::EcdsaSha256))
        );
        assert_eq!(
            select_scheme(TokenKeyKind::Ec(EcCurve::P384), &offered),
            Some((SignatureScheme::ECDSA_NISTP384_SHA384, Mechanism::EcdsaSha384))
        );
        assert_eq!(select_scheme(TokenKeyKind::Ec(EcCurve::P521), &offered), None);
        assert_eq!(
            select_scheme(
                TokenKeyKind::Ec(EcCurve::P256),
                &[SignatureScheme::RSA_PSS_SHA256]
            ),
            None
        );
    }
}
