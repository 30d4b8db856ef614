use std::path::Path;

use clap::Parser;
use cosmian_pkcs11_sys::{
    CK_ULONG, CKA_CLASS, CKA_DECRYPT, CKA_EXTRACTABLE, CKA_KEY_TYPE, CKA_LABEL, CKA_PRIVATE,
    CKA_SENSITIVE, CKA_TOKEN, CKK_RSA, CKO_PRIVATE_KEY, CKR_KEY_NOT_WRAPPABLE,
    CKR_KEY_UNEXTRACTABLE,
};
use luna_base_hsm::{
    AES_CBC_IV_LENGTH, KeyAttributes, Mechanism, SymmetricKeyType, Template,
};
use tracing::debug;

use crate::{
    actions::{hex_string, load_hsm, open_user_session, print_decryption_outcome, rsa_demo::F4},
    error::{SampleError, result::SampleResult},
};

const PLAINTEXT: &[u8] = b"Encrypt Me!";

const IV: [u8; AES_CBC_IV_LENGTH] = *b"ABCDEFGHIJKLMNOP";

const LABEL: &str = "private wrap demo";

/// Export an RSA private key wrapped under an AES key, then import it back
///
/// The HSM must allow private key export for the wrap to succeed.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct PrivateWrapAction {
    #[clap(long, short = 's', default_value_t = 0)]
    pub slot: usize,

    /// User password of the slot
    #[clap(long, short = 'p')]
    pub password: Option<String>,

    /// Size of the RSA modulus in bits
    #[clap(long, default_value_t = 1024)]
    pub modulus_bits: u32,
}

impl PrivateWrapAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let hsm = load_hsm(pkcs11_lib)?;
        let session = open_user_session(&hsm, self.slot, self.password.as_deref())?;
        let private = self.password.is_some();

        let key_pair = session.generate_rsa_key_pair(
            LABEL,
            CK_ULONG::from(self.modulus_bits),
            &F4,
            &KeyAttributes {
                token: false,
                private,
                ..KeyAttributes::default()
            },
        )?;
        let wrapping_key = session.generate_symmetric_key(
            SymmetricKeyType::Aes256,
            LABEL,
            &KeyAttributes {
                token: false,
                private,
                extractable: false,
                wrapping: true,
            },
        )?;

        let encrypted = session.encrypt(key_pair.public, Mechanism::RsaPkcs, PLAINTEXT)?;

        session.set_boolean_attribute(key_pair.private, CKA_EXTRACTABLE, true)?;
        let wrapped_key = session
            .wrap_key(wrapping_key, Mechanism::AesCbcPad(IV), key_pair.private)
            .map_err(|e| {
                let e = SampleError::from(e);
                match e.rv() {
                    Some(CKR_KEY_NOT_WRAPPABLE | CKR_KEY_UNEXTRACTABLE) => SampleError::Default(
                        "The private RSA key is not wrappable.  Make sure the HSM is \
                         configured with the key export capability."
                            .to_owned(),
                    ),
                    _ => e,
                }
            })?;
        debug!("wrapped private key: {} bytes", wrapped_key.len());
        session.destroy_object(key_pair.private)?;

        let unwrapped_key = session.unwrap_key(
            wrapping_key,
            Mechanism::AesCbcPad(IV),
            &wrapped_key,
            &unwrapped_private_key_template(private),
        )?;
        let decrypted = session.decrypt(unwrapped_key, Mechanism::RsaPkcs, &encrypted)?;

        println!("\n\n-----------------------");
        println!("original: {}", hex_string(PLAINTEXT));
        println!("encrypted: {}", hex_string(&encrypted));
        println!("decrypted: {}", hex_string(&decrypted));
        print_decryption_outcome(PLAINTEXT, &decrypted);

        session.close()?;
        Ok(())
    }
}

/// The unwrapped key is a session RSA private key able to decrypt
fn unwrapped_private_key_template(private: bool) -> Template {
    Template::new()
        .ulong(CKA_CLASS, CKO_PRIVATE_KEY)
        .ulong(CKA_KEY_TYPE, CKK_RSA)
        .bool(CKA_TOKEN, false)
        .bool(CKA_PRIVATE, private)
        .bool(CKA_SENSITIVE, true)
        .bool(CKA_DECRYPT, true)
        .bytes(CKA_LABEL, LABEL)
}

#[cfg(test)]
mod tests {
    use cosmian_pkcs11_sys::{
        CK_FALSE, CK_TRUE, CKA_CLASS, CKA_DECRYPT, CKA_TOKEN, CKO_PRIVATE_KEY,
    };

    use super::{IV, unwrapped_private_key_template};

    #[test]
    fn test_iv() {
        assert_eq!(IV[0], 65);
        assert_eq!(IV[15], 80);
    }

    #[test]
    fn test_unwrapped_template() {
        let template = unwrapped_private_key_template(true);
        assert_eq!(
            template.get(CKA_CLASS),
            Some(CKO_PRIVATE_KEY.to_ne_bytes().as_slice())
        );
        assert_eq!(template.get(CKA_TOKEN), Some(&[CK_FALSE][..]));
        assert_eq!(template.get(CKA_DECRYPT), Some(&[CK_TRUE][..]));
    }
}
