use std::path::Path;

use clap::{Parser, ValueEnum};
use cosmian_pkcs11_sys::CKA_EC_POINT;
use luna_base_hsm::{EcCurve, KeyAttributes, Mechanism};
use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey, EcPoint},
    ecdsa::EcdsaSig,
    nid::Nid,
    sha::sha256,
};
use tracing::debug;

use crate::{
    actions::{hex_string, load_hsm, open_user_session},
    error::result::SampleResult,
    sample_bail, sample_ensure,
};

const PLAINTEXT: &str = "Some Text to Sign as an Example";

/// DER tag of an OCTET STRING
const OCTET_STRING: u8 = 0x04;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    P256,
    P384,
    P521,
}

impl Curve {
    const fn ec_curve(self) -> EcCurve {
        match self {
            Self::P256 => EcCurve::P256,
            Self::P384 => EcCurve::P384,
            Self::P521 => EcCurve::P521,
        }
    }

    const fn nid(self) -> Nid {
        match self {
            Self::P256 => Nid::X9_62_PRIME256V1,
            Self::P384 => Nid::SECP384R1,
            Self::P521 => Nid::SECP521R1,
        }
    }

    /// Length of an uncompressed point: `04 || x || y`
    const fn point_len(self) -> usize {
        match self {
            Self::P256 => 65,
            Self::P384 => 97,
            Self::P521 => 133,
        }
    }
}

/// Generate an EC key pair, sign a text on the token and verify the
/// signature with the exported public key
///
/// The key pair is made of session objects. The text is hashed with SHA256
/// and the digest is signed with ECDSA.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct EcdsaDemoAction {
    #[clap(long, short = 's', default_value_t = 0)]
    pub slot: usize,

    /// User password of the slot
    #[clap(long, short = 'p')]
    pub password: Option<String>,

    #[clap(long, short = 'c', default_value = "p256")]
    pub curve: Curve,
}

impl EcdsaDemoAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let hsm = load_hsm(pkcs11_lib)?;
        let session = open_user_session(&hsm, self.slot, self.password.as_deref())?;

        println!("Generating ECDSA Keypair");
        let key_pair = session.generate_ec_key_pair(
            "ecdsa demo",
            self.curve.ec_curve(),
            &KeyAttributes {
                token: false,
                private: self.password.is_some(),
                ..KeyAttributes::default()
            },
        )?;

        let plaintext = PLAINTEXT.as_bytes();
        println!("PlainText = {}", hex_string(plaintext));

        println!("Signing encrypted text");
        let digest = sha256(plaintext);
        let signature = session.sign(key_pair.private, Mechanism::Ecdsa, &digest)?;
        debug!("raw signature: {}", hex_string(&signature));

        println!("Verifying signature");
        let ec_point = session.get_attribute(key_pair.public, CKA_EC_POINT)?;
        let public_key = public_key_from_ec_point(self.curve, &ec_point)?;
        let signature = ecdsa_sig_from_raw(&signature)?;
        if signature.verify(&digest, &public_key)? {
            println!("Signature passed verification");
        } else {
            println!("Signature failed verification");
        }

        session.close()?;
        Ok(())
    }
}

/// The uncompressed point inside a `CKA_EC_POINT` value.
///
/// The value is normally a DER OCTET STRING wrapping the point, some tokens
/// return the bare point.
fn uncompressed_point(curve: Curve, ec_point: &[u8]) -> SampleResult<&[u8]> {
    let point_len = curve.point_len();
    if ec_point.len() == point_len {
        return Ok(ec_point)
    }
    let header_len = match ec_point {
        [OCTET_STRING, len, ..] if usize::from(*len) == point_len => 2,
        [OCTET_STRING, 0x81, len, ..] if usize::from(*len) == point_len => 3,
        _ => sample_bail!("unexpected CKA_EC_POINT value of {} bytes", ec_point.len()),
    };
    sample_ensure!(
        ec_point.len() == header_len + point_len,
        "truncated CKA_EC_POINT value"
    );
    Ok(&ec_point[header_len..])
}

fn public_key_from_ec_point(
    curve: Curve,
    ec_point: &[u8],
) -> SampleResult<EcKey<openssl::pkey::Public>> {
    let group = EcGroup::from_curve_name(curve.nid())?;
    let mut ctx = BigNumContext::new()?;
    let point = EcPoint::from_bytes(&group, uncompressed_point(curve, ec_point)?, &mut ctx)?;
    Ok(EcKey::from_public_key(&group, &point)?)
}

/// PKCS#11 returns ECDSA signatures as `r || s`, both of the same size
pub(crate) fn ecdsa_sig_from_raw(raw: &[u8]) -> SampleResult<EcdsaSig> {
    sample_ensure!(
        !raw.is_empty() && raw.len() % 2 == 0,
        "invalid raw ECDSA signature length: {}",
        raw.len()
    );
    let (r, s) = raw.split_at(raw.len() / 2);
    Ok(EcdsaSig::from_private_components(
        BigNum::from_slice(r)?,
        BigNum::from_slice(s)?,
    )?)
}

/// The DER `ECDSA-Sig-Value` of a raw `r || s` signature, as TLS expects it
pub(crate) fn ecdsa_raw_to_der(raw: &[u8]) -> SampleResult<Vec<u8>> {
    Ok(ecdsa_sig_from_raw(raw)?.to_der()?)
}
