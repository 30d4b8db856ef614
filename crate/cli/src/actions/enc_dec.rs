use std::path::Path;

use clap::Parser;
use cosmian_pkcs11_sys::{CK_OBJECT_HANDLE, CKK_RSA, CKO_PRIVATE_KEY, CKO_PUBLIC_KEY, CKO_SECRET_KEY};
use luna_base_hsm::{Mechanism, Session};
use tracing::debug;

use crate::{
    actions::{generate_key::KeyType, load_hsm, open_user_session},
    error::result::SampleResult,
};

const PLAINTEXT: &str = "this is 16 bytes";

/// Encrypt then decrypt a short text with a key made by `generate-key`
///
/// Secret keys use ECB, RSA key pairs use PKCS#1 v1.5: the public key
/// encrypts and the private key decrypts.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct EncDecAction {
    /// The kind of key to use
    #[clap(long = "key-type", short = 't')]
    pub key_type: KeyType,

    /// Name (label) of the key
    #[clap(long = "key-name", short = 'n')]
    pub key_name: String,

    /// Slot containing the token with the key
    #[clap(long, short = 's', default_value_t = 1)]
    pub slot: usize,

    /// User password of the slot. If specified, a private key is used.
    #[clap(long, short = 'p')]
    pub password: Option<String>,
}

impl EncDecAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let hsm = load_hsm(pkcs11_lib)?;
        let session = open_user_session(&hsm, self.slot, self.password.as_deref())?;
        let private = self.password.is_some();

        if let Some(symmetric) = self.key_type.symmetric() {
            let Some(key) =
                session.find_key(CKO_SECRET_KEY, symmetric.key_type(), &self.key_name, private)?
            else {
                println!("{} key ({}) not found", self.key_type, self.key_name);
                return Ok(())
            };
            let mechanism = symmetric.ecb_mechanism();
            round_trip(&session, mechanism, key, key)?;
        } else {
            // public keys are never private objects
            let Some(public_key) =
                session.find_key(CKO_PUBLIC_KEY, CKK_RSA, &self.key_name, false)?
            else {
                println!("rsa public key ({}) not found", self.key_name);
                return Ok(())
            };
            let Some(private_key) =
                session.find_key(CKO_PRIVATE_KEY, CKK_RSA, &self.key_name, private)?
            else {
                println!("rsa private key ({}) not found", self.key_name);
                return Ok(())
            };
            round_trip(&session, Mechanism::RsaPkcs, public_key, private_key)?;
        }

        session.close()?;
        Ok(())
    }
}

fn round_trip(
    session: &Session,
    mechanism: Mechanism,
    encryption_key: CK_OBJECT_HANDLE,
    decryption_key: CK_OBJECT_HANDLE,
) -> SampleResult<()> {
    let ciphertext = session.encrypt(encryption_key, mechanism, PLAINTEXT.as_bytes())?;
    debug!("{} bytes of ciphertext", ciphertext.len());
    let decrypted = session.decrypt(decryption_key, mechanism, &ciphertext)?;
    if decrypted == PLAINTEXT.as_bytes() {
        println!("Decrypted string matches original string - hurray");
    } else {
        println!("Decrypted string does not match original string - boo");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::{EncDecAction, PLAINTEXT};

    #[test]
    fn test_plaintext_is_one_des_block_pair() {
        assert_eq!(PLAINTEXT.len(), 16);
    }

    #[test]
    fn test_parse() {
        let action = EncDecAction::try_parse_from([
            "enc-dec",
            "--key-type",
            "des3",
            "--key-name",
            "k",
            "--slot",
            "3",
            "--password",
            "userpin",
        ])
        .unwrap();
        assert_eq!(action.slot, 3);
        assert_eq!(action.password.as_deref(), Some("userpin"));
    }
}
