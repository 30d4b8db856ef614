use std::ptr;

use cosmian_pkcs11_sys::*;
use libloading::Library;
use tracing::{debug, warn};

use crate::{
    HError, HResult,
    locking::{LockingModel, create_mutex, destroy_mutex, lock_mutex, unlock_mutex},
    luna::{
        CK_CA_CloseApplicationID, CK_CA_HAAnswerLoginChallenge, CK_CA_HAGetLoginChallenge,
        CK_CA_HAGetMasterPublic, CK_CA_HALogin, CK_CA_OpenApplicationID, CK_CA_SetApplicationID,
    },
};

/// The PKCS#11 function table of a shared library loaded at run time.
///
/// Standard `C_*` entry points are mandatory: loading fails when one is
/// missing. Luna `CA_*` extensions are optional and stay `None` on other
/// vendors' libraries.
///
/// The library is initialized on load with the requested [`LockingModel`]
/// and finalized when this struct is dropped.
#[allow(dead_code)]
pub struct HsmLib {
    _library: Option<Library>,
    pub(crate) C_Initialize: CK_C_Initialize,
    pub(crate) C_Finalize: CK_C_Finalize,
    pub(crate) C_GetInfo: CK_C_GetInfo,
    pub(crate) C_GetSlotList: CK_C_GetSlotList,
    pub(crate) C_GetSlotInfo: CK_C_GetSlotInfo,
    pub(crate) C_GetTokenInfo: CK_C_GetTokenInfo,

    pub(crate) C_OpenSession: CK_C_OpenSession,
    pub(crate) C_CloseSession: CK_C_CloseSession,
    pub(crate) C_GetSessionInfo: CK_C_GetSessionInfo,
    pub(crate) C_Login: CK_C_Login,
    pub(crate) C_Logout: CK_C_Logout,

    pub(crate) C_DestroyObject: CK_C_DestroyObject,
    pub(crate) C_GetAttributeValue: CK_C_GetAttributeValue,
    pub(crate) C_SetAttributeValue: CK_C_SetAttributeValue,
    pub(crate) C_FindObjectsInit: CK_C_FindObjectsInit,
    pub(crate) C_FindObjects: CK_C_FindObjects,
    pub(crate) C_FindObjectsFinal: CK_C_FindObjectsFinal,

    pub(crate) C_EncryptInit: CK_C_EncryptInit,
    pub(crate) C_Encrypt: CK_C_Encrypt,
    pub(crate) C_DecryptInit: CK_C_DecryptInit,
    pub(crate) C_Decrypt: CK_C_Decrypt,
    pub(crate) C_SignInit: CK_C_SignInit,
    pub(crate) C_Sign: CK_C_Sign,
    pub(crate) C_VerifyInit: CK_C_VerifyInit,
    pub(crate) C_Verify: CK_C_Verify,

    pub(crate) C_GenerateKey: CK_C_GenerateKey,
    pub(crate) C_GenerateKeyPair: CK_C_GenerateKeyPair,
    pub(crate) C_WrapKey: CK_C_WrapKey,
    pub(crate) C_UnwrapKey: CK_C_UnwrapKey,
    pub(crate) C_GenerateRandom: CK_C_GenerateRandom,

    pub(crate) CA_SetApplicationID: CK_CA_SetApplicationID,
    pub(crate) CA_OpenApplicationID: CK_CA_OpenApplicationID,
    pub(crate) CA_CloseApplicationID: CK_CA_CloseApplicationID,
    pub(crate) CA_HAGetMasterPublic: CK_CA_HAGetMasterPublic,
    pub(crate) CA_HAGetLoginChallenge: CK_CA_HAGetLoginChallenge,
    pub(crate) CA_HAAnswerLoginChallenge: CK_CA_HAAnswerLoginChallenge,
    pub(crate) CA_HALogin: CK_CA_HALogin,
}

/// Resolve a symbol that not every vendor exports
fn optional_symbol<T: Copy>(library: &Library, name: &[u8]) -> Option<T> {
    match unsafe { library.get::<T>(name) } {
        Ok(symbol) => Some(*symbol),
        Err(e) => {
            debug!(
                "optional symbol {} not found: {e}",
                String::from_utf8_lossy(name)
            );
            None
        }
    }
}

impl HsmLib {
    pub(crate) fn instantiate<P>(path: P, locking: LockingModel) -> HResult<Self>
    where
        P: AsRef<std::ffi::OsStr>,
    {
        unsafe {
            let library = Library::new(path)?;
            let hsm_lib = HsmLib {
                C_Initialize: Some(*library.get(b"C_Initialize")?),
                C_Finalize: Some(*library.get(b"C_Finalize")?),
                C_GetInfo: Some(*library.get(b"C_GetInfo")?),
                C_GetSlotList: Some(*library.get(b"C_GetSlotList")?),
                C_GetSlotInfo: Some(*library.get(b"C_GetSlotInfo")?),
                C_GetTokenInfo: Some(*library.get(b"C_GetTokenInfo")?),
                C_OpenSession: Some(*library.get(b"C_OpenSession")?),
                C_CloseSession: Some(*library.get(b"C_CloseSession")?),
                C_GetSessionInfo: Some(*library.get(b"C_GetSessionInfo")?),
                C_Login: Some(*library.get(b"C_Login")?),
                C_Logout: Some(*library.get(b"C_Logout")?),
                C_DestroyObject: Some(*library.get(b"C_DestroyObject")?),
                C_GetAttributeValue: Some(*library.get(b"C_GetAttributeValue")?),
                C_SetAttributeValue: Some(*library.get(b"C_SetAttributeValue")?),
                C_FindObjectsInit: Some(*library.get(b"C_FindObjectsInit")?),
                C_FindObjects: Some(*library.get(b"C_FindObjects")?),
                C_FindObjectsFinal: Some(*library.get(b"C_FindObjectsFinal")?),
                C_EncryptInit: Some(*library.get(b"C_EncryptInit")?),
                C_Encrypt: Some(*library.get(b"C_Encrypt")?),
                C_DecryptInit: Some(*library.get(b"C_DecryptInit")?),
                C_Decrypt: Some(*library.get(b"C_Decrypt")?),
                C_SignInit: Some(*library.get(b"C_SignInit")?),
                C_Sign: Some(*library.get(b"C_Sign")?),
                C_VerifyInit: Some(*library.get(b"C_VerifyInit")?),
                C_Verify: Some(*library.get(b"C_Verify")?),
                C_GenerateKey: Some(*library.get(b"C_GenerateKey")?),
                C_GenerateKeyPair: Some(*library.get(b"C_GenerateKeyPair")?),
                C_WrapKey: Some(*library.get(b"C_WrapKey")?),
                C_UnwrapKey: Some(*library.get(b"C_UnwrapKey")?),
                C_GenerateRandom: Some(*library.get(b"C_GenerateRandom")?),
                CA_SetApplicationID: optional_symbol(&library, b"CA_SetApplicationID"),
                CA_OpenApplicationID: optional_symbol(&library, b"CA_OpenApplicationID"),
                CA_CloseApplicationID: optional_symbol(&library, b"CA_CloseApplicationID"),
                CA_HAGetMasterPublic: optional_symbol(&library, b"CA_HAGetMasterPublic"),
                CA_HAGetLoginChallenge: optional_symbol(&library, b"CA_HAGetLoginChallenge"),
                CA_HAAnswerLoginChallenge: optional_symbol(
                    &library,
                    b"CA_HAAnswerLoginChallenge",
                ),
                CA_HALogin: optional_symbol(&library, b"CA_HALogin"),
                // we need to keep the library alive
                _library: Some(library),
            };
            hsm_lib.initialize(locking)?;
            Ok(hsm_lib)
        }
    }

    fn initialize(&self, locking: LockingModel) -> HResult<()> {
        debug!("initializing the PKCS#11 library with {locking} locking");
        let rv = match locking {
            LockingModel::None => crate::hsm_raw_call!(self, C_Initialize, ptr::null_mut()),
            LockingModel::Os => {
                let mut init_args = CK_C_INITIALIZE_ARGS {
                    flags: CKF_OS_LOCKING_OK,
                    ..Default::default()
                };
                crate::hsm_raw_call!(
                    self,
                    C_Initialize,
                    (&raw mut init_args).cast::<std::ffi::c_void>()
                )
            }
            LockingModel::Functions => {
                let mut init_args = CK_C_INITIALIZE_ARGS {
                    CreateMutex: Some(create_mutex),
                    DestroyMutex: Some(destroy_mutex),
                    LockMutex: Some(lock_mutex),
                    UnlockMutex: Some(unlock_mutex),
                    flags: 0,
                    pReserved: ptr::null_mut(),
                };
                crate::hsm_raw_call!(
                    self,
                    C_Initialize,
                    (&raw mut init_args).cast::<std::ffi::c_void>()
                )
            }
        };
        match rv {
            CKR_OK => Ok(()),
            CKR_CRYPTOKI_ALREADY_INITIALIZED => {
                warn!("the PKCS#11 library was already initialized in this process");
                Ok(())
            }
            _ => Err(HError::pkcs11(
                "Failed initializing the HSM",
                "C_Initialize",
                rv,
            )),
        }
    }

    fn finalize(&self) -> HResult<()> {
        crate::hsm_call!(
            self,
            "Failed to finalize the HSM",
            C_Finalize,
            ptr::null_mut()
        );
        Ok(())
    }
}

#[cfg(test)]
impl HsmLib {
    /// A function table with no library behind it, for tests plugging in
    /// their own entry points
    pub(crate) const fn unloaded() -> Self {
        Self {
            _library: None,
            C_Initialize: None,
            C_Finalize: None,
            C_GetInfo: None,
            C_GetSlotList: None,
            C_GetSlotInfo: None,
            C_GetTokenInfo: None,
            C_OpenSession: None,
            C_CloseSession: None,
            C_GetSessionInfo: None,
            C_Login: None,
            C_Logout: None,
            C_DestroyObject: None,
            C_GetAttributeValue: None,
            C_SetAttributeValue: None,
            C_FindObjectsInit: None,
            C_FindObjects: None,
            C_FindObjectsFinal: None,
            C_EncryptInit: None,
            C_Encrypt: None,
            C_DecryptInit: None,
            C_Decrypt: None,
            C_SignInit: None,
            C_Sign: None,
            C_VerifyInit: None,
            C_Verify: None,
            C_GenerateKey: None,
            C_GenerateKeyPair: None,
            C_WrapKey: None,
            C_UnwrapKey: None,
            C_GenerateRandom: None,
            CA_SetApplicationID: None,
            CA_OpenApplicationID: None,
            CA_CloseApplicationID: None,
            CA_HAGetMasterPublic: None,
            CA_HAGetLoginChallenge: None,
            CA_HAAnswerLoginChallenge: None,
            CA_HALogin: None,
        }
    }
}

impl Drop for HsmLib {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            debug!("{e}");
        }
    }
}
