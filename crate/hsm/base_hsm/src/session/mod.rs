mod crypto;
mod keys;
mod mechanism;
mod session_impl;
mod template;

pub use keys::{
    EcCurve, KeyAttributes, KeyPair, SymmetricKeyType, ec_key_pair_templates,
    rsa_key_pair_templates, secret_key_template,
};
pub use mechanism::{AES_CBC_IV_LENGTH, Mechanism};
pub use session_impl::Session;
pub use template::Template;
