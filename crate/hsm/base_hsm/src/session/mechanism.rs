use std::ptr;

use cosmian_pkcs11_sys::{
    CK_MECHANISM, CK_MECHANISM_PTR, CK_MECHANISM_TYPE, CK_RSA_PKCS_PSS_PARAMS, CK_ULONG,
    CKG_MGF1_SHA256, CKG_MGF1_SHA384, CKM_AES_CBC_PAD, CKM_AES_ECB, CKM_AES_KEY_GEN,
    CKM_DES_ECB, CKM_DES_KEY_GEN, CKM_DES2_KEY_GEN, CKM_DES3_ECB, CKM_DES3_KEY_GEN, CKM_ECDSA,
    CKM_ECDSA_SHA256, CKM_ECDSA_SHA384, CKM_EC_KEY_PAIR_GEN, CKM_RSA_PKCS,
    CKM_RSA_PKCS_KEY_PAIR_GEN, CKM_RSA_X_509, CKM_SHA256, CKM_SHA256_RSA_PKCS,
    CKM_SHA256_RSA_PKCS_PSS, CKM_SHA384, CKM_SHA384_RSA_PKCS, CKM_SHA384_RSA_PKCS_PSS,
};

use crate::HResult;

pub const AES_CBC_IV_LENGTH: usize = 16;

/// The mechanisms used by the samples, with their parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    DesKeyGen,
    Des2KeyGen,
    Des3KeyGen,
    AesKeyGen,
    RsaPkcsKeyPairGen,
    EcKeyPairGen,
    DesEcb,
    Des3Ecb,
    AesEcb,
    AesCbcPad([u8; AES_CBC_IV_LENGTH]),
    /// PKCS#1 v1.5 encryption or signature
    RsaPkcs,
    /// Raw RSA
    RsaX509,
    Sha256RsaPkcs,
    Sha384RsaPkcs,
    Sha256RsaPkcsPss,
    Sha384RsaPkcsPss,
    /// ECDSA over a pre-computed digest
    Ecdsa,
    EcdsaSha256,
    EcdsaSha384,
}

impl Mechanism {
    #[must_use]
    pub const fn mechanism_type(&self) -> CK_MECHANISM_TYPE {
        match self {
            Self::DesKeyGen => CKM_DES_KEY_GEN,
            Self::Des2KeyGen => CKM_DES2_KEY_GEN,
            Self::Des3KeyGen => CKM_DES3_KEY_GEN,
            Self::AesKeyGen => CKM_AES_KEY_GEN,
            Self::RsaPkcsKeyPairGen => CKM_RSA_PKCS_KEY_PAIR_GEN,
            Self::EcKeyPairGen => CKM_EC_KEY_PAIR_GEN,
            Self::DesEcb => CKM_DES_ECB,
            Self::Des3Ecb => CKM_DES3_ECB,
            Self::AesEcb => CKM_AES_ECB,
            Self::AesCbcPad(_) => CKM_AES_CBC_PAD,
            Self::RsaPkcs => CKM_RSA_PKCS,
            Self::RsaX509 => CKM_RSA_X_509,
            Self::Sha256RsaPkcs => CKM_SHA256_RSA_PKCS,
            Self::Sha384RsaPkcs => CKM_SHA384_RSA_PKCS,
            Self::Sha256RsaPkcsPss => CKM_SHA256_RSA_PKCS_PSS,
            Self::Sha384RsaPkcsPss => CKM_SHA384_RSA_PKCS_PSS,
            Self::Ecdsa => CKM_ECDSA,
            Self::EcdsaSha256 => CKM_ECDSA_SHA256,
            Self::EcdsaSha384 => CKM_ECDSA_SHA384,
        }
    }

    /// Build the `CK_MECHANISM` and its parameters on the stack and hand a
    /// pointer to `f`. The pointer is only valid during the call.
    pub(crate) fn with_ck_mechanism<R, F>(&self, f: F) -> HResult<R>
    where
        F: FnOnce(CK_MECHANISM_PTR) -> HResult<R>,
    {
        let mechanism = self.mechanism_type();
        match self {
            Self::AesCbcPad(iv) => {
                let mut iv = *iv;
                let mut ck_mechanism = CK_MECHANISM {
                    mechanism,
                    pParameter: iv.as_mut_ptr().cast(),
                    ulParameterLen: CK_ULONG::try_from(iv.len())?,
                };
                f(&raw mut ck_mechanism)
            }
            Self::Sha256RsaPkcsPss | Self::Sha384RsaPkcsPss => {
                // TLS requires the salt to be as long as the digest
                let (hash_alg, mgf, salt_len) = if *self == Self::Sha256RsaPkcsPss {
                    (CKM_SHA256, CKG_MGF1_SHA256, 32)
                } else {
                    (CKM_SHA384, CKG_MGF1_SHA384, 48)
                };
                let mut params = CK_RSA_PKCS_PSS_PARAMS {
                    hashAlg: hash_alg,
                    mgf,
                    sLen: salt_len,
                };
                let mut ck_mechanism = CK_MECHANISM {
                    mechanism,
                    pParameter: (&raw mut params).cast(),
                    ulParameterLen: CK_ULONG::try_from(size_of::<CK_RSA_PKCS_PSS_PARAMS>())?,
                };
                f(&raw mut ck_mechanism)
            }
            _ => {
                let mut ck_mechanism = CK_MECHANISM {
                    mechanism,
                    pParameter: ptr::null_mut(),
                    ulParameterLen: 0,
                };
                f(&raw mut ck_mechanism)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cosmian_pkcs11_sys::{
        CK_RSA_PKCS_PSS_PARAMS, CKG_MGF1_SHA384, CKM_AES_CBC_PAD, CKM_DES3_ECB, CKM_SHA384,
        CKM_SHA384_RSA_PKCS_PSS,
    };

    use super::Mechanism;

    #[test]
    fn test_mechanism_without_parameter() {
        Mechanism::Des3Ecb
            .with_ck_mechanism(|m| {
                let m = unsafe { &*m };
                assert_eq!(m.mechanism, CKM_DES3_ECB);
                assert!(m.pParameter.is_null());
                assert_eq!(m.ulParameterLen, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_aes_cbc_iv() {
        let iv: [u8; 16] = *b"ABCDEFGHIJKLMNOP";
        Mechanism::AesCbcPad(iv)
            .with_ck_mechanism(|m| {
                let m = unsafe { &*m };
                assert_eq!(m.mechanism, CKM_AES_CBC_PAD);
                assert_eq!(m.ulParameterLen, 16);
                let param = unsafe { std::slice::from_raw_parts(m.pParameter.cast::<u8>(), 16) };
                assert_eq!(param, b"ABCDEFGHIJKLMNOP");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_pss_parameters() {
        Mechanism::Sha384RsaPkcsPss
            .with_ck_mechanism(|m| {
                let m = unsafe { &*m };
                assert_eq!(m.mechanism, CKM_SHA384_RSA_PKCS_PSS);
                let params = unsafe { &*m.pParameter.cast::<CK_RSA_PKCS_PSS_PARAMS>() };
                assert_eq!(params.hashAlg, CKM_SHA384);
                assert_eq!(params.mgf, CKG_MGF1_SHA384);
                assert_eq!(params.sLen, 48);
                Ok(())
            })
            .unwrap();
    }
}
