use std::{
    fmt::{self, Display, Formatter},
    path::Path,
};

use clap::{Parser, ValueEnum};
use cosmian_pkcs11_sys::CK_ULONG;
use luna_base_hsm::{KeyAttributes, SymmetricKeyType};

use crate::{
    actions::{load_hsm, open_user_session},
    error::result::SampleResult,
};

/// Public exponent of the generated RSA key pairs
pub(crate) const RSA_PUBLIC_EXPONENT: [u8; 1] = [0x03];

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Des,
    Des2,
    Des3,
    /// AES 256
    Aes,
    Rsa,
}

impl KeyType {
    /// The secret key flavour, `None` for RSA
    #[must_use]
    pub const fn symmetric(self) -> Option<SymmetricKeyType> {
        match self {
            Self::Des => Some(SymmetricKeyType::Des),
            Self::Des2 => Some(SymmetricKeyType::Des2),
            Self::Des3 => Some(SymmetricKeyType::Des3),
            Self::Aes => Some(SymmetricKeyType::Aes256),
            Self::Rsa => None,
        }
    }
}

impl Display for KeyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Des => write!(f, "des"),
            Self::Des2 => write!(f, "des2"),
            Self::Des3 => write!(f, "des3"),
            Self::Aes => write!(f, "aes"),
            Self::Rsa => write!(f, "rsa"),
        }
    }
}

/// Generate a token key, or an RSA key pair
///
/// When a password is given, the user logs in and the key is created as a
/// private object: it will only be visible to a logged in user.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct GenerateKeyAction {
    /// The kind of key to generate
    #[clap(long = "key-type", short = 't')]
    pub key_type: KeyType,

    /// Name (label) of the generated key
    #[clap(long = "key-name", short = 'n')]
    pub key_name: String,

    /// Slot containing the token to create the key on
    #[clap(long, short = 's', default_value_t = 1)]
    pub slot: usize,

    /// User password of the slot
    #[clap(long, short = 'p')]
    pub password: Option<String>,

    /// Size of the RSA modulus in bits
    #[clap(long, default_value_t = 1024)]
    pub modulus_bits: u32,
}

impl GenerateKeyAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let hsm = load_hsm(pkcs11_lib)?;
        let session = open_user_session(&hsm, self.slot, self.password.as_deref())?;
        let attributes = KeyAttributes {
            private: self.password.is_some(),
            ..KeyAttributes::default()
        };

        if let Some(symmetric) = self.key_type.symmetric() {
            let key = session.generate_symmetric_key(symmetric, &self.key_name, &attributes)?;
            println!("{} key ({}) generated", self.key_type, self.key_name);
            println!("handle ({key})");
        } else {
            let key_pair = session.generate_rsa_key_pair(
                &self.key_name,
                CK_ULONG::from(self.modulus_bits),
                &RSA_PUBLIC_EXPONENT,
                &attributes,
            )?;
            println!("rsa key pair ({}) generated", self.key_name);
            println!(
                "handles public({}) private({})",
                key_pair.public, key_pair.private
            );
        }

        session.close()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;
    use luna_base_hsm::SymmetricKeyType;

    use super::{GenerateKeyAction, KeyType};

    #[test]
    fn test_key_type_mapping() {
        assert_eq!(KeyType::Des2.symmetric(), Some(SymmetricKeyType::Des2));
        assert_eq!(KeyType::Aes.symmetric(), Some(SymmetricKeyType::Aes256));
        assert_eq!(KeyType::Rsa.symmetric(), None);
        assert_eq!(KeyType::Des3.to_string(), "des3");
    }

    #[test]
    fn test_defaults() {
        let action =
            GenerateKeyAction::try_parse_from(["generate-key", "-t", "rsa", "-n", "mykey"])
                .unwrap();
        assert_eq!(action.key_type, KeyType::Rsa);
        assert_eq!(action.slot, 1);
        assert_eq!(action.modulus_bits, 1024);
        assert!(action.password.is_none());

        assert!(GenerateKeyAction::try_parse_from(["generate-key", "-t", "idea", "-n", "k"]).is_err());
        assert!(GenerateKeyAction::try_parse_from(["generate-key", "-t", "des"]).is_err());
    }
}
