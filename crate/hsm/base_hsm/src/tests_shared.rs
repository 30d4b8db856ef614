//! Shared HSM test suite used by vendor crates to avoid duplication.
//! Each vendor crate provides a small config and delegates to these helpers.
#![allow(clippy::panic_in_result_fn)]
#![allow(clippy::missing_panics_doc)]

use std::{sync::Arc, thread};

use cosmian_pkcs11_sys::{
    CKA_LABEL, CKA_MODULUS, CKK_DES3, CKK_RSA, CKO_PRIVATE_KEY, CKO_SECRET_KEY,
    CKR_KEY_NOT_WRAPPABLE, CKR_KEY_UNEXTRACTABLE, CKU_USER,
};
use luna_logger::log_init;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    AES_CBC_IV_LENGTH, BaseHsm, EcCurve, HError, HResult, KeyAttributes, LockingModel, Mechanism,
    Session, SlotManager, SymmetricKeyType, Template, hsm_capabilities::HsmProvider,
};

/// Per-HSM configuration for shared tests
#[derive(Debug)]
pub struct HsmTestConfig {
    pub lib_path: String,
    pub slot_id: usize,
    pub user_password: Zeroizing<String>,
    pub locking: LockingModel,
    /// number of threads for the MT test
    pub threads: usize,
}

pub fn instantiate<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<BaseHsm<P>> {
    info!("instantiating hsm with {} locking", cfg.locking);
    BaseHsm::<P>::instantiate(&cfg.lib_path, cfg.locking)
}

/// Instantiate the HSM and return a slot manager for the configured slot id.
pub fn instantiate_and_get_slot<P: HsmProvider>(
    cfg: &HsmTestConfig,
) -> HResult<(BaseHsm<P>, Arc<SlotManager>)> {
    let hsm: BaseHsm<P> = instantiate(cfg)?;
    let slots = hsm.get_slot_list(true)?;
    debug!("Slots with a token: {slots:?}");
    if !slots.contains(&cfg.slot_id) {
        return Err(HError::Default(format!(
            "Configured slot {} is not available in {slots:?}",
            cfg.slot_id
        )));
    }
    let slot = hsm.get_slot(cfg.slot_id)?;
    Ok((hsm, slot))
}

fn logged_in_session(slot: &SlotManager, cfg: &HsmTestConfig) -> HResult<Session> {
    let session = slot.open_session(true)?;
    session.login(CKU_USER, Some(cfg.user_password.as_bytes()))?;
    Ok(session)
}

fn private_attributes() -> KeyAttributes {
    KeyAttributes {
        token: false,
        private: true,
        ..KeyAttributes::default()
    }
}

pub fn get_info<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<()> {
    log_init(None);
    let hsm = instantiate::<P>(cfg)?;
    let info = hsm.get_info()?;
    info!("Connected to the HSM: {info}");
    assert!(info.cryptoki_version.major >= 2);
    for slot_id in hsm.get_slot_list(false)? {
        let slot_info = hsm.get_slot_info(slot_id)?;
        info!(
            "slot {slot_id}: {} {:?}",
            slot_info.description,
            slot_info.flag_names()
        );
        if slot_info.token_present() {
            let token_info = hsm.get_token_info(slot_id)?;
            info!("token {} flags {:?}", token_info.label, token_info.flag_names());
        }
    }
    Ok(())
}

pub fn login_logout<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<()> {
    log_init(None);
    let (_hsm, slot) = instantiate_and_get_slot::<P>(cfg)?;
    let session = slot.open_session(true)?;
    assert!(!session.get_session_info()?.user_logged_in());
    session.login(CKU_USER, Some(cfg.user_password.as_bytes()))?;
    assert!(session.get_session_info()?.user_logged_in());
    // a second login is tolerated
    session.login(CKU_USER, Some(cfg.user_password.as_bytes()))?;
    session.logout()?;
    assert!(!session.get_session_info()?.user_logged_in());
    session.close()?;
    // closing twice is a no-op
    session.close()?;
    Ok(())
}

pub fn symmetric_encrypt_decrypt<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<()> {
    log_init(None);
    let (_hsm, slot) = instantiate_and_get_slot::<P>(cfg)?;
    let session = logged_in_session(&slot, cfg)?;
    // ECB needs block aligned input
    let plaintext = b"Some text for encryption 1234567";
    for key_type in [SymmetricKeyType::Des3, SymmetricKeyType::Aes256] {
        let label = Uuid::new_v4().to_string();
        let key = session.generate_symmetric_key(key_type, &label, &private_attributes())?;
        let mechanism = key_type.ecb_mechanism();
        let ciphertext = session.encrypt(key, mechanism, plaintext)?;
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_ne!(ciphertext.as_slice(), plaintext.as_slice());
        let decrypted = session.decrypt(key, mechanism, &ciphertext)?;
        assert_eq!(decrypted.as_slice(), plaintext.as_slice());
        info!("{key_type} ECB round trip OK");
    }
    Ok(())
}

pub fn aes_cbc_pad_encrypt<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<()> {
    log_init(None);
    let (_hsm, slot) = instantiate_and_get_slot::<P>(cfg)?;
    let session = logged_in_session(&slot, cfg)?;
    let label = Uuid::new_v4().to_string();
    let key =
        session.generate_symmetric_key(SymmetricKeyType::Aes128, &label, &private_attributes())?;
    let iv: [u8; AES_CBC_IV_LENGTH] = session
        .generate_random(AES_CBC_IV_LENGTH)?
        .try_into()
        .map_err(|_| HError::Default("short random output".to_owned()))?;
    let plaintext = b"not a multiple of the block size";
    let ciphertext = session.encrypt(key, Mechanism::AesCbcPad(iv), &plaintext[..30])?;
    assert_eq!(ciphertext.len(), 32);
    let decrypted = session.decrypt(key, Mechanism::AesCbcPad(iv), &ciphertext)?;
    assert_eq!(decrypted.as_slice(), &plaintext[..30]);
    Ok(())
}

pub fn find_and_destroy<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<()> {
    log_init(None);
    let (_hsm, slot) = instantiate_and_get_slot::<P>(cfg)?;
    let session = logged_in_session(&slot, cfg)?;
    let label = Uuid::new_v4().to_string();
    let attributes = KeyAttributes {
        private: true,
        ..KeyAttributes::default()
    };
    let key = session.generate_symmetric_key(SymmetricKeyType::Des3, &label, &attributes)?;
    assert_eq!(
        session.find_key(CKO_SECRET_KEY, CKK_DES3, &label, true)?,
        Some(key)
    );
    // the PRIVATE attribute is part of the search
    assert_eq!(session.find_key(CKO_SECRET_KEY, CKK_DES3, &label, false)?, None);
    assert_eq!(session.get_object_handle(label.as_bytes())?, key);
    assert_eq!(session.get_attribute(key, CKA_LABEL)?, label.as_bytes());
    session.destroy_object(key)?;
    assert_eq!(session.find_key(CKO_SECRET_KEY, CKK_DES3, &label, true)?, None);
    assert!(
        session
            .find_objects(&Template::new().bytes(CKA_LABEL, label.as_str()))?
            .is_empty()
    );
    Ok(())
}

pub fn rsa_sign_verify<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<()> {
    log_init(None);
    let (_hsm, slot) = instantiate_and_get_slot::<P>(cfg)?;
    let session = logged_in_session(&slot, cfg)?;
    let label = Uuid::new_v4().to_string();
    let key_pair =
        session.generate_rsa_key_pair(&label, 2048, &[0x01, 0x00, 0x01], &private_attributes())?;
    let modulus = session.get_attribute(key_pair.public, CKA_MODULUS)?;
    assert_eq!(modulus.len(), 256);
    let data = b"Hello, World!";
    for mechanism in [Mechanism::Sha256RsaPkcs, Mechanism::Sha256RsaPkcsPss] {
        let signature = session.sign(key_pair.private, mechanism, data)?;
        assert_eq!(signature.len(), 256);
        assert!(session.verify(key_pair.public, mechanism, data, &signature)?);
        assert!(!session.verify(key_pair.public, mechanism, b"Hello, World?", &signature)?);
    }
    let ciphertext = session.encrypt(key_pair.public, Mechanism::RsaPkcs, data)?;
    let plaintext = session.decrypt(key_pair.private, Mechanism::RsaPkcs, &ciphertext)?;
    assert_eq!(plaintext.as_slice(), data);
    Ok(())
}

pub fn ecdsa_sign_verify<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<()> {
    log_init(None);
    let (_hsm, slot) = instantiate_and_get_slot::<P>(cfg)?;
    let session = logged_in_session(&slot, cfg)?;
    for curve in [EcCurve::P256, EcCurve::P384] {
        let label = Uuid::new_v4().to_string();
        let key_pair = session.generate_ec_key_pair(&label, curve, &private_attributes())?;
        // CKM_ECDSA signs a digest computed by the caller
        let digest = [0x5a_u8; 32];
        let signature = session.sign(key_pair.private, Mechanism::Ecdsa, &digest)?;
        assert!(session.verify(key_pair.public, Mechanism::Ecdsa, &digest, &signature)?);
        info!("ECDSA {curve:?} signature: {} bytes", signature.len());
    }
    Ok(())
}

pub fn wrap_unwrap<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<()> {
    log_init(None);
    let (_hsm, slot) = instantiate_and_get_slot::<P>(cfg)?;
    let session = logged_in_session(&slot, cfg)?;
    let wrapping_key = session.generate_symmetric_key(
        SymmetricKeyType::Aes256,
        &Uuid::new_v4().to_string(),
        &KeyAttributes {
            wrapping: true,
            ..private_attributes()
        },
    )?;
    let key = session.generate_symmetric_key(
        SymmetricKeyType::Des3,
        &Uuid::new_v4().to_string(),
        &KeyAttributes {
            extractable: true,
            ..private_attributes()
        },
    )?;
    let iv = [0x42_u8; AES_CBC_IV_LENGTH];
    let wrapped = session.wrap_key(wrapping_key, Mechanism::AesCbcPad(iv), key)?;
    assert!(!wrapped.is_empty());
    let unwrapped_label = Uuid::new_v4().to_string();
    let template = crate::secret_key_template(
        SymmetricKeyType::Des3,
        &unwrapped_label,
        &private_attributes(),
    );
    let unwrapped = session.unwrap_key(wrapping_key, Mechanism::AesCbcPad(iv), &wrapped, &template)?;
    let plaintext = b"12345678";
    assert_eq!(
        session.encrypt(key, Mechanism::Des3Ecb, plaintext)?,
        session.encrypt(unwrapped, Mechanism::Des3Ecb, plaintext)?
    );
    Ok(())
}

/// A private key generated without `CKA_EXTRACTABLE` must not leave the token
pub fn private_key_wrap_refused<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<()> {
    log_init(None);
    let (_hsm, slot) = instantiate_and_get_slot::<P>(cfg)?;
    let session = logged_in_session(&slot, cfg)?;
    let wrapping_key = session.generate_symmetric_key(
        SymmetricKeyType::Des3,
        &Uuid::new_v4().to_string(),
        &KeyAttributes {
            wrapping: true,
            ..private_attributes()
        },
    )?;
    let label = Uuid::new_v4().to_string();
    let attributes = KeyAttributes {
        private: true,
        ..KeyAttributes::default()
    };
    let key_pair = session.generate_rsa_key_pair(&label, 2048, &[0x01, 0x00, 0x01], &attributes)?;
    assert_eq!(
        session.find_key(CKO_PRIVATE_KEY, CKK_RSA, &label, true)?,
        Some(key_pair.private)
    );
    let result = session.wrap_key(wrapping_key, Mechanism::Des3Ecb, key_pair.private);
    session.destroy_object(key_pair.private)?;
    session.destroy_object(key_pair.public)?;
    let err = result
        .err()
        .ok_or_else(|| HError::Default("the private key was wrapped".to_owned()))?;
    assert!(matches!(
        err.rv(),
        Some(CKR_KEY_NOT_WRAPPABLE | CKR_KEY_UNEXTRACTABLE)
    ));
    Ok(())
}

/// Every thread opens its own session on the shared slot
pub fn multi_threaded_encrypt<P: HsmProvider>(cfg: &HsmTestConfig) -> HResult<()> {
    log_init(None);
    let (_hsm, slot) = instantiate_and_get_slot::<P>(cfg)?;
    // the login state is shared by all the sessions of the application
    let login_session = logged_in_session(&slot, cfg)?;

    let mut handles = vec![];
    for i in 0..cfg.threads {
        let slot = slot.clone();
        let handle = thread::spawn(move || {
            let session = slot.open_session(true)?;
            let label = format!("thread-{i}-{}", Uuid::new_v4());
            let key =
                session.generate_symmetric_key(SymmetricKeyType::Des3, &label, &private_attributes())?;
            let data = b"thread data 1234";
            let ciphertext = session.encrypt(key, Mechanism::Des3Ecb, data)?;
            let plaintext = session.decrypt(key, Mechanism::Des3Ecb, &ciphertext)?;
            assert_eq!(plaintext.as_slice(), data);
            Ok::<(), HError>(())
        });
        handles.push(handle);
    }

    for handle in handles {
        handle
            .join()
            .map_err(|e| HError::Default(format!("Thread panicked: {e:?}")))??;
    }
    login_session.close()?;
    info!("Successfully encrypted/decrypted in {} threads", cfg.threads);
    Ok(())
}
