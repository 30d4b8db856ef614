use std::fmt::{self, Display, Formatter};

use cosmian_pkcs11_sys::{
    CK_KEY_TYPE, CK_OBJECT_HANDLE, CK_ULONG, CKA_CLASS, CKA_DECRYPT, CKA_DERIVE, CKA_EC_PARAMS,
    CKA_ENCRYPT, CKA_EXTRACTABLE, CKA_KEY_TYPE, CKA_LABEL, CKA_MODULUS_BITS, CKA_PRIVATE,
    CKA_PUBLIC_EXPONENT, CKA_SENSITIVE, CKA_SIGN, CKA_TOKEN, CKA_UNWRAP, CKA_VALUE_LEN,
    CKA_VERIFY, CKA_WRAP, CKK_AES, CKK_DES, CKK_DES2, CKK_DES3, CKK_EC, CKK_RSA,
    CKO_PRIVATE_KEY, CKO_PUBLIC_KEY, CKO_SECRET_KEY,
};
use tracing::debug;

use crate::{HResult, Mechanism, Template, hsm_call, session::Session};

/// Secret key algorithms and sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmetricKeyType {
    Des,
    Des2,
    Des3,
    Aes128,
    Aes192,
    Aes256,
}

impl SymmetricKeyType {
    #[must_use]
    pub const fn key_type(&self) -> CK_KEY_TYPE {
        match self {
            Self::Des => CKK_DES,
            Self::Des2 => CKK_DES2,
            Self::Des3 => CKK_DES3,
            Self::Aes128 | Self::Aes192 | Self::Aes256 => CKK_AES,
        }
    }

    const fn generation_mechanism(self) -> Mechanism {
        match self {
            Self::Des => Mechanism::DesKeyGen,
            Self::Des2 => Mechanism::Des2KeyGen,
            Self::Des3 => Mechanism::Des3KeyGen,
            Self::Aes128 | Self::Aes192 | Self::Aes256 => Mechanism::AesKeyGen,
        }
    }

    /// `CKA_VALUE_LEN`, only given for variable length keys
    const fn value_len(self) -> Option<CK_ULONG> {
        match self {
            Self::Aes128 => Some(16),
            Self::Aes192 => Some(24),
            Self::Aes256 => Some(32),
            Self::Des | Self::Des2 | Self::Des3 => None,
        }
    }

    /// The ECB mechanism the samples encrypt with
    #[must_use]
    pub const fn ecb_mechanism(&self) -> Mechanism {
        match self {
            Self::Des => Mechanism::DesEcb,
            Self::Des2 | Self::Des3 => Mechanism::Des3Ecb,
            Self::Aes128 | Self::Aes192 | Self::Aes256 => Mechanism::AesEcb,
        }
    }
}

impl Display for SymmetricKeyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Des => write!(f, "des"),
            Self::Des2 => write!(f, "des2"),
            Self::Des3 => write!(f, "des3"),
            Self::Aes128 | Self::Aes192 | Self::Aes256 => write!(f, "aes"),
        }
    }
}

/// Named curves for EC key pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    /// DER encoded object identifier, the `CKA_EC_PARAMS` value
    #[must_use]
    pub const fn der_oid(&self) -> &'static [u8] {
        match self {
            Self::P256 => &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07],
            Self::P384 => &[0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x22],
            Self::P521 => &[0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x23],
        }
    }

    #[must_use]
    pub fn from_der_oid(oid: &[u8]) -> Option<Self> {
        [Self::P256, Self::P384, Self::P521]
            .into_iter()
            .find(|curve| curve.der_oid() == oid)
    }
}

/// Storage and usage attributes common to generated keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAttributes {
    /// Persist the key on the token instead of the session
    pub token: bool,
    /// Only visible to a logged in user
    pub private: bool,
    /// May leave the token wrapped (`CKA_EXTRACTABLE`)
    pub extractable: bool,
    /// May wrap and unwrap other keys
    pub wrapping: bool,
}

impl Default for KeyAttributes {
    fn default() -> Self {
        Self {
            token: true,
            private: false,
            extractable: false,
            wrapping: false,
        }
    }
}

/// Handles of a generated key pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPair {
    pub public: CK_OBJECT_HANDLE,
    pub private: CK_OBJECT_HANDLE,
}

/// The secret key template: the key stays `CKA_SENSITIVE` and may encrypt,
/// decrypt and derive.
#[must_use]
pub fn secret_key_template(
    key_type: SymmetricKeyType,
    label: &str,
    attributes: &KeyAttributes,
) -> Template {
    let template = Template::new()
        .ulong(CKA_CLASS, CKO_SECRET_KEY)
        .ulong(CKA_KEY_TYPE, key_type.key_type())
        .bool(CKA_TOKEN, attributes.token)
        .bool(CKA_SENSITIVE, true)
        .bytes(CKA_LABEL, label)
        .bool(CKA_PRIVATE, attributes.private)
        .bool(CKA_ENCRYPT, true)
        .bool(CKA_DECRYPT, true)
        .bool(CKA_DERIVE, true)
        .bool(CKA_WRAP, attributes.wrapping)
        .bool(CKA_UNWRAP, attributes.wrapping)
        .bool(CKA_EXTRACTABLE, attributes.extractable);
    match key_type.value_len() {
        Some(len) => template.ulong(CKA_VALUE_LEN, len),
        None => template,
    }
}

/// Public and private templates of an RSA key pair. The public key is never
/// private.
#[must_use]
pub fn rsa_key_pair_templates(
    label: &str,
    modulus_bits: CK_ULONG,
    public_exponent: &[u8],
    attributes: &KeyAttributes,
) -> (Template, Template) {
    let public = Template::new()
        .ulong(CKA_CLASS, CKO_PUBLIC_KEY)
        .ulong(CKA_KEY_TYPE, CKK_RSA)
        .bool(CKA_TOKEN, attributes.token)
        .bytes(CKA_LABEL, label)
        .ulong(CKA_MODULUS_BITS, modulus_bits)
        .bytes(CKA_PUBLIC_EXPONENT, public_exponent)
        .bool(CKA_PRIVATE, false)
        .bool(CKA_ENCRYPT, true)
        .bool(CKA_VERIFY, true)
        .bool(CKA_WRAP, attributes.wrapping);
    let private = Template::new()
        .ulong(CKA_CLASS, CKO_PRIVATE_KEY)
        .ulong(CKA_KEY_TYPE, CKK_RSA)
        .bool(CKA_TOKEN, attributes.token)
        .bool(CKA_SENSITIVE, true)
        .bytes(CKA_LABEL, label)
        .bool(CKA_PRIVATE, attributes.private)
        .bool(CKA_DECRYPT, true)
        .bool(CKA_SIGN, true)
        .bool(CKA_UNWRAP, attributes.wrapping)
        .bool(CKA_EXTRACTABLE, attributes.extractable);
    (public, private)
}

#[must_use]
pub fn ec_key_pair_templates(
    label: &str,
    curve: EcCurve,
    attributes: &KeyAttributes,
) -> (Template, Template) {
    let public = Template::new()
        .ulong(CKA_CLASS, CKO_PUBLIC_KEY)
        .ulong(CKA_KEY_TYPE, CKK_EC)
        .bool(CKA_TOKEN, attributes.token)
        .bytes(CKA_LABEL, label)
        .bytes(CKA_EC_PARAMS, curve.der_oid())
        .bool(CKA_PRIVATE, false)
        .bool(CKA_VERIFY, true);
    let private = Template::new()
        .ulong(CKA_CLASS, CKO_PRIVATE_KEY)
        .ulong(CKA_KEY_TYPE, CKK_EC)
        .bool(CKA_TOKEN, attributes.token)
        .bool(CKA_SENSITIVE, true)
        .bytes(CKA_LABEL, label)
        .bool(CKA_PRIVATE, attributes.private)
        .bool(CKA_SIGN, true)
        .bool(CKA_EXTRACTABLE, attributes.extractable);
    (public, private)
}

impl Session {
    /// Generate a DES, double or triple DES, or AES key
    pub fn generate_symmetric_key(
        &self,
        key_type: SymmetricKeyType,
        label: &str,
        attributes: &KeyAttributes,
    ) -> HResult<CK_OBJECT_HANDLE> {
        let template = secret_key_template(key_type, label, attributes);
        let mut ck_template = template.to_ck_attributes()?;
        let mut key_handle = CK_OBJECT_HANDLE::default();
        key_type
            .generation_mechanism()
            .with_ck_mechanism(|mechanism| {
                hsm_call!(
                    self.hsm(),
                    "Failed generating key",
                    C_GenerateKey,
                    self.session_handle(),
                    mechanism,
                    ck_template.as_mut_ptr(),
                    CK_ULONG::try_from(ck_template.len())?,
                    &raw mut key_handle
                );
                Ok(())
            })?;
        debug!("generated {key_type} key {label}: handle {key_handle}");
        Ok(key_handle)
    }

    /// Generate an RSA key pair.
    ///
    /// `public_exponent` is a big-endian integer, e.g. `[0x01, 0x00, 0x01]`.
    pub fn generate_rsa_key_pair(
        &self,
        label: &str,
        modulus_bits: CK_ULONG,
        public_exponent: &[u8],
        attributes: &KeyAttributes,
    ) -> HResult<KeyPair> {
        let (public, private) =
            rsa_key_pair_templates(label, modulus_bits, public_exponent, attributes);
        let key_pair = self.generate_key_pair(Mechanism::RsaPkcsKeyPairGen, &public, &private)?;
        debug!("generated RSA {modulus_bits} key pair {label}: {key_pair:?}");
        Ok(key_pair)
    }

    pub fn generate_ec_key_pair(
        &self,
        label: &str,
        curve: EcCurve,
        attributes: &KeyAttributes,
    ) -> HResult<KeyPair> {
        let (public, private) = ec_key_pair_templates(label, curve, attributes);
        let key_pair = self.generate_key_pair(Mechanism::EcKeyPairGen, &public, &private)?;
        debug!("generated EC {curve:?} key pair {label}: {key_pair:?}");
        Ok(key_pair)
    }

    fn generate_key_pair(
        &self,
        mechanism: Mechanism,
        public: &Template,
        private: &Template,
    ) -> HResult<KeyPair> {
        let mut public_template = public.to_ck_attributes()?;
        let mut private_template = private.to_ck_attributes()?;
        let mut key_pair = KeyPair {
            public: CK_OBJECT_HANDLE::default(),
            private: CK_OBJECT_HANDLE::default(),
        };
        mechanism.with_ck_mechanism(|mechanism| {
            hsm_call!(
                self.hsm(),
                "Failed generating key pair",
                C_GenerateKeyPair,
                self.session_handle(),
                mechanism,
                public_template.as_mut_ptr(),
                CK_ULONG::try_from(public_template.len())?,
                private_template.as_mut_ptr(),
                CK_ULONG::try_from(private_template.len())?,
                &raw mut key_pair.public,
                &raw mut key_pair.private
            );
            Ok(())
        })?;
        Ok(key_pair)
    }
}

#[cfg(test)]
mod tests {
    use cosmian_pkcs11_sys::{
        CK_FALSE, CK_TRUE, CK_ULONG, CKA_CLASS, CKA_EC_PARAMS, CKA_LABEL, CKA_PRIVATE,
        CKA_PUBLIC_EXPONENT, CKA_VALUE_LEN, CKA_WRAP, CKO_PRIVATE_KEY,
    };

    use super::{
        EcCurve, KeyAttributes, SymmetricKeyType, ec_key_pair_templates, rsa_key_pair_templates,
        secret_key_template,
    };
    use crate::Mechanism;

    #[test]
    fn test_des_template_has_no_length() {
        let template = secret_key_template(
            SymmetricKeyType::Des3,
            "des3 key",
            &KeyAttributes {
                private: true,
                ..Default::default()
            },
        );
        assert_eq!(template.get(CKA_VALUE_LEN), None);
        assert_eq!(template.get(CKA_PRIVATE), Some(&[CK_TRUE][..]));
        assert_eq!(template.get(CKA_WRAP), Some(&[CK_FALSE][..]));
        assert_eq!(template.get(CKA_LABEL), Some(&b"des3 key"[..]));
    }

    #[test]
    fn test_aes_template_length() {
        let template =
            secret_key_template(SymmetricKeyType::Aes256, "wrap", &KeyAttributes::default());
        assert_eq!(
            template.get(CKA_VALUE_LEN),
            Some(&CK_ULONG::to_ne_bytes(32)[..])
        );
    }

    #[test]
    fn test_rsa_public_key_is_never_private() {
        let attributes = KeyAttributes {
            private: true,
            ..Default::default()
        };
        let (public, private) = rsa_key_pair_templates("rsa", 1024, &[0x03], &attributes);
        assert_eq!(public.get(CKA_PRIVATE), Some(&[CK_FALSE][..]));
        assert_eq!(public.get(CKA_PUBLIC_EXPONENT), Some(&[0x03_u8][..]));
        assert_eq!(private.get(CKA_PRIVATE), Some(&[CK_TRUE][..]));
        assert_eq!(
            private.get(CKA_CLASS),
            Some(&CK_ULONG::to_ne_bytes(CKO_PRIVATE_KEY)[..])
        );
    }

    #[test]
    fn test_ec_curves() {
        let (public, _) = ec_key_pair_templates("ec", EcCurve::P384, &KeyAttributes::default());
        let oid = public.get(CKA_EC_PARAMS).unwrap_or_default();
        assert_eq!(EcCurve::from_der_oid(oid), Some(EcCurve::P384));
        assert_eq!(EcCurve::from_der_oid(&[0x06, 0x01, 0x00]), None);
    }

    #[test]
    fn test_ecb_mechanisms() {
        assert_eq!(SymmetricKeyType::Des.ecb_mechanism(), Mechanism::DesEcb);
        assert_eq!(SymmetricKeyType::Des2.ecb_mechanism(), Mechanism::Des3Ecb);
        assert_eq!(SymmetricKeyType::Des3.ecb_mechanism(), Mechanism::Des3Ecb);
        assert_eq!(SymmetricKeyType::Aes128.to_string(), "aes");
    }
}
