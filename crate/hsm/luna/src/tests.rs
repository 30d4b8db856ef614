//! These tests require a connection to a working HSM and are gated behind the `luna` feature.
//! To run a test, cd into this crate directory and run (replace `XXX` with the actual password):
//!
//! ```bash
//! HSM_USER_PASSWORD=XXX HSM_SLOT_ID=0 cargo test --features luna -- --ignored tests::test_hsm_luna_all
//! ```

use cosmian_pkcs11_sys::CKU_USER;
use luna_base_hsm::{
    ApplicationId, HResult, LockingModel,
    test_helpers::{get_hsm_password, get_hsm_slot_id, lib_path},
    tests_shared as shared,
};
use luna_logger::log_init;
use serial_test::serial;
use tracing::info;

use crate::{LUNA_PKCS11_LIB, LunaCapabilityProvider};

const SLOT_ID: usize = 0x00; // Luna fallback slot if HSM_SLOT_ID is not set

fn cfg() -> HResult<shared::HsmTestConfig> {
    Ok(shared::HsmTestConfig {
        lib_path: lib_path("LUNA_PKCS11_LIB", LUNA_PKCS11_LIB),
        slot_id: get_hsm_slot_id().unwrap_or(SLOT_ID),
        user_password: get_hsm_password()?,
        locking: LockingModel::Os,
        threads: 4,
    })
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_all() -> HResult<()> {
    test_hsm_luna_get_info()?;
    test_hsm_luna_login_logout()?;
    test_hsm_luna_symmetric_encrypt_decrypt()?;
    test_hsm_luna_aes_cbc_pad_encrypt()?;
    test_hsm_luna_find_and_destroy()?;
    test_hsm_luna_rsa_sign_verify()?;
    test_hsm_luna_ecdsa_sign_verify()?;
    test_hsm_luna_wrap_unwrap()?;
    test_hsm_luna_private_key_wrap_refused()?;
    test_hsm_luna_multi_threaded_encrypt()?;
    test_hsm_luna_application_id()?;
    Ok(())
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_get_info() -> HResult<()> {
    shared::get_info::<LunaCapabilityProvider>(&cfg()?)
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_login_logout() -> HResult<()> {
    shared::login_logout::<LunaCapabilityProvider>(&cfg()?)
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_symmetric_encrypt_decrypt() -> HResult<()> {
    shared::symmetric_encrypt_decrypt::<LunaCapabilityProvider>(&cfg()?)
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_aes_cbc_pad_encrypt() -> HResult<()> {
    shared::aes_cbc_pad_encrypt::<LunaCapabilityProvider>(&cfg()?)
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_find_and_destroy() -> HResult<()> {
    shared::find_and_destroy::<LunaCapabilityProvider>(&cfg()?)
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_rsa_sign_verify() -> HResult<()> {
    shared::rsa_sign_verify::<LunaCapabilityProvider>(&cfg()?)
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_ecdsa_sign_verify() -> HResult<()> {
    shared::ecdsa_sign_verify::<LunaCapabilityProvider>(&cfg()?)
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_wrap_unwrap() -> HResult<()> {
    shared::wrap_unwrap::<LunaCapabilityProvider>(&cfg()?)
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_private_key_wrap_refused() -> HResult<()> {
    shared::private_key_wrap_refused::<LunaCapabilityProvider>(&cfg()?)
}

#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_multi_threaded_encrypt() -> HResult<()> {
    shared::multi_threaded_encrypt::<LunaCapabilityProvider>(&cfg()?)
}

/// A login made under a shared application ID survives the session closing
#[test]
#[serial]
#[ignore = "Requires Linux, Luna PKCS#11 library, and HSM environment"]
fn test_hsm_luna_application_id() -> HResult<()> {
    log_init(None);
    let cfg = cfg()?;
    let id = ApplicationId {
        major: 0x1234,
        minor: 0x5678,
    };
    let (hsm, slot) = shared::instantiate_and_get_slot::<LunaCapabilityProvider>(&cfg)?;
    hsm.set_application_id(id)?;
    hsm.open_application_id(cfg.slot_id, id)?;
    let session = slot.open_session(false)?;
    session.login(CKU_USER, Some(cfg.user_password.as_bytes()))?;
    session.close_keep_login()?;
    let session = slot.open_session(false)?;
    assert!(session.get_session_info()?.user_logged_in());
    info!("login state shared through application ID {id:?}");
    session.logout()?;
    hsm.close_application_id(cfg.slot_id, id)?;
    Ok(())
}
