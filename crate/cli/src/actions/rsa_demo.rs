use std::path::Path;

use clap::Parser;
use cosmian_pkcs11_sys::CK_ULONG;
use luna_base_hsm::{KeyAttributes, Mechanism};

use crate::{
    actions::{load_hsm, open_user_session},
    error::result::SampleResult,
};

const PLAINTEXT: &str = "Some Text to Encrypt and Sign as an Example";

/// Public exponent of the key pairs generated by the demos: 65537
pub(crate) const F4: [u8; 3] = [0x01, 0x00, 0x01];

/// Generate an RSA key pair, encrypt and decrypt with raw RSA, then sign and
/// verify with SHA256 and PKCS#1 v1.5
///
/// The key pair is made of session objects: it disappears with the session.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct RsaDemoAction {
    #[clap(long, short = 's', default_value_t = 0)]
    pub slot: usize,

    /// User password of the slot
    #[clap(long, short = 'p')]
    pub password: Option<String>,

    /// Size of the RSA modulus in bits
    #[clap(long, default_value_t = 1024)]
    pub modulus_bits: u32,
}

impl RsaDemoAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let hsm = load_hsm(pkcs11_lib)?;
        let session = open_user_session(&hsm, self.slot, self.password.as_deref())?;

        println!("Generating RSA Keypair");
        let key_pair = session.generate_rsa_key_pair(
            "rsa demo",
            CK_ULONG::from(self.modulus_bits),
            &F4,
            &KeyAttributes {
                token: false,
                private: self.password.is_some(),
                ..KeyAttributes::default()
            },
        )?;

        let plaintext = PLAINTEXT.as_bytes();
        println!("PlainText = {PLAINTEXT}");

        println!("Encrypting Text");
        let ciphertext = session.encrypt(key_pair.public, Mechanism::RsaX509, plaintext)?;

        println!("Decrypting Text");
        let decrypted = session.decrypt(key_pair.private, Mechanism::RsaX509, &ciphertext)?;
        // raw RSA gives back the text left padded with zeros to the modulus size
        println!(
            "Decrypted PlainText = {}",
            String::from_utf8_lossy(strip_leading_zeros(&decrypted))
        );

        println!("Signing encrypted text");
        let signature = session.sign(key_pair.private, Mechanism::Sha256RsaPkcs, plaintext)?;

        println!("Verifying signature");
        if session.verify(key_pair.public, Mechanism::Sha256RsaPkcs, plaintext, &signature)? {
            println!("Signature passed verification");
        } else {
            println!("Signature failed verification");
        }

        session.close()?;
        Ok(())
    }
}

pub(crate) fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
