//! One module per sample program.
//!
//! Every sample loads the PKCS#11 library, runs a fixed sequence of calls
//! and prints its results on stdout. The first failure ends the sample.

use std::path::Path;

use cosmian_pkcs11_sys::CKU_USER;
use luna_base_hsm::{LockingModel, Session};
use luna_pkcs11_loader::Luna;
use tracing::debug;

use crate::error::result::SampleResult;

pub mod application_id;
pub mod ecdsa_demo;
pub mod enc_dec;
pub mod generate_key;
pub mod get_info;
pub mod ha_login;
pub mod private_wrap;
pub mod rsa_demo;
pub mod rsa_enc_pad;
pub mod ssl_client;
pub mod threading;

/// Load and initialize the library, letting it use the OS locking primitives
pub(crate) fn load_hsm(pkcs11_lib: &Path) -> SampleResult<Luna> {
    Ok(Luna::instantiate(pkcs11_lib, LockingModel::Os)?)
}

/// Open a read-write session on `slot_id`, logged in as the user when a
/// password is given
pub(crate) fn open_user_session(
    hsm: &Luna,
    slot_id: usize,
    password: Option<&str>,
) -> SampleResult<Session> {
    let session = hsm.get_slot(slot_id)?.open_session(true)?;
    if let Some(password) = password {
        session.login(CKU_USER, Some(password.as_bytes()))?;
        debug!("logged in to slot {slot_id}");
    }
    Ok(session)
}

/// Upper case hexadecimal, two digits per byte
pub(crate) fn hex_string(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Print the closing banner of the samples comparing a decrypted buffer with
/// the original
pub(crate) fn print_decryption_outcome(original: &[u8], decrypted: &[u8]) {
    println!("\n\n-----------------------");
    if original == decrypted {
        println!("Decryption was successful");
    } else {
        println!("*** decryption failed");
    }
    println!("-----------------------\n\n");
}
