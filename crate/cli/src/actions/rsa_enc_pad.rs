use std::path::Path;

use clap::Parser;
use cosmian_pkcs11_sys::CK_ULONG;
use luna_base_hsm::{KeyAttributes, Mechanism};

use crate::{
    actions::{
        hex_string, load_hsm, open_user_session, print_decryption_outcome, rsa_demo::F4,
    },
    error::result::SampleResult,
};

const PLAINTEXT: &[u8] = b"10000000008";

/// Encrypt and decrypt a short number with RSA PKCS#1 v1.5 padding
#[derive(Parser, Debug)]
pub struct RsaEncPadAction {
    #[clap(long, short = 's', default_value_t = 0)]
    pub slot: usize,

    /// User password of the slot
    #[clap(long, short = 'p')]
    pub password: Option<String>,

    /// Size of the RSA modulus in bits
    #[clap(long, default_value_t = 1024)]
    pub modulus_bits: u32,
}

impl RsaEncPadAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let hsm = load_hsm(pkcs11_lib)?;
        let session = open_user_session(&hsm, self.slot, self.password.as_deref())?;
        let key_pair = session.generate_rsa_key_pair(
            "rsa pkcs1 demo",
            CK_ULONG::from(self.modulus_bits),
            &F4,
            &KeyAttributes {
                token: false,
                private: self.password.is_some(),
                ..KeyAttributes::default()
            },
        )?;

        let encrypted = session.encrypt(key_pair.public, Mechanism::RsaPkcs, PLAINTEXT)?;
        let decrypted = session.decrypt(key_pair.private, Mechanism::RsaPkcs, &encrypted)?;

        println!("\n\n-----------------------");
        print!("{}", describe("original", PLAINTEXT));
        print!("{}", describe("encrypted", &encrypted));
        print!("{}", describe("decrypted", &decrypted));
        print_decryption_outcome(PLAINTEXT, &decrypted);

        session.close()?;
        Ok(())
    }
}

fn describe(name: &str, bytes: &[u8]) -> String {
    format!(
        "{name}: \n  Size:    {}\n  Content: {}\n",
        bytes.len(),
        hex_string(bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::{PLAINTEXT, describe};

    #[test]
    fn test_describe() {
        assert_eq!(
            describe("original", PLAINTEXT),
            "original: \n  Size:    11\n  Content: 3130303030303030303038\n"
        );
    }
}
