//! Luna `CA_*` extensions: shared application IDs and HA login.
//!
//! The application ID lets several processes share the login state of a
//! slot. HA login replicates an SO login from a source token to a target
//! token through a challenge the source answers with its login key.

use std::ptr;

use cosmian_pkcs11_sys::{
    CK_BYTE, CK_BYTE_PTR, CK_FLAGS, CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE, CK_SLOT_ID,
    CK_ULONG, CK_ULONG_PTR, CK_USER_TYPE,
};
use tracing::debug;

use crate::{
    BaseHsm, HError, HResult, Session, hsm_call, hsm_capabilities::HsmProvider, hsm_raw_call,
    probe::probe_and_fill,
};

/// Session flag asking the Luna library for an SO capable session
pub const CKF_SO_SESSION: CK_FLAGS = 0x8000;

#[allow(non_camel_case_types)]
pub type CK_CA_SetApplicationID = Option<unsafe extern "C" fn(CK_ULONG, CK_ULONG) -> CK_RV>;
#[allow(non_camel_case_types)]
pub type CK_CA_OpenApplicationID =
    Option<unsafe extern "C" fn(CK_SLOT_ID, CK_ULONG, CK_ULONG) -> CK_RV>;
#[allow(non_camel_case_types)]
pub type CK_CA_CloseApplicationID =
    Option<unsafe extern "C" fn(CK_SLOT_ID, CK_ULONG, CK_ULONG) -> CK_RV>;
#[allow(non_camel_case_types)]
pub type CK_CA_HAGetMasterPublic =
    Option<unsafe extern "C" fn(CK_SLOT_ID, CK_BYTE_PTR, CK_ULONG_PTR) -> CK_RV>;
#[allow(non_camel_case_types)]
pub type CK_CA_HAGetLoginChallenge = Option<
    unsafe extern "C" fn(
        CK_SESSION_HANDLE,
        CK_USER_TYPE,
        CK_BYTE_PTR,
        CK_ULONG,
        CK_BYTE_PTR,
        CK_ULONG_PTR,
    ) -> CK_RV,
>;
#[allow(non_camel_case_types)]
pub type CK_CA_HAAnswerLoginChallenge = Option<
    unsafe extern "C" fn(
        CK_SESSION_HANDLE,
        CK_OBJECT_HANDLE,
        CK_BYTE_PTR,
        CK_ULONG,
        CK_BYTE_PTR,
        CK_ULONG_PTR,
    ) -> CK_RV,
>;
#[allow(non_camel_case_types)]
pub type CK_CA_HALogin = Option<
    unsafe extern "C" fn(
        CK_SESSION_HANDLE,
        CK_BYTE_PTR,
        CK_ULONG,
        CK_BYTE_PTR,
        CK_ULONG_PTR,
    ) -> CK_RV,
>;

/// A Luna application ID: two 32 bit halves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationId {
    pub major: CK_ULONG,
    pub minor: CK_ULONG,
}

fn ensure_vendor_extensions(supported: bool) -> HResult<()> {
    if supported {
        Ok(())
    } else {
        Err(HError::Default(
            "this HSM provider does not support the Luna CA_* extensions".to_owned(),
        ))
    }
}

impl<P: HsmProvider> BaseHsm<P> {
    /// Set the application ID used by the sessions this process opens
    pub fn set_application_id(&self, id: ApplicationId) -> HResult<()> {
        ensure_vendor_extensions(P::capabilities().vendor_extensions)?;
        hsm_call!(
            self.hsm_lib(),
            "Failed setting the application ID",
            CA_SetApplicationID,
            id.major,
            id.minor
        );
        debug!("application ID set to {}:{}", id.major, id.minor);
        Ok(())
    }

    /// Keep the login state of `id` on `slot_id` after its sessions close
    pub fn open_application_id(&self, slot_id: usize, id: ApplicationId) -> HResult<()> {
        ensure_vendor_extensions(P::capabilities().vendor_extensions)?;
        hsm_call!(
            self.hsm_lib(),
            "Failed opening the application ID",
            CA_OpenApplicationID,
            CK_SLOT_ID::try_from(slot_id)?,
            id.major,
            id.minor
        );
        Ok(())
    }

    /// Release the login state of `id` on `slot_id`
    pub fn close_application_id(&self, slot_id: usize, id: ApplicationId) -> HResult<()> {
        ensure_vendor_extensions(P::capabilities().vendor_extensions)?;
        hsm_call!(
            self.hsm_lib(),
            "Failed closing the application ID",
            CA_CloseApplicationID,
            CK_SLOT_ID::try_from(slot_id)?,
            id.major,
            id.minor
        );
        Ok(())
    }

    /// The token wrapping certificate of `slot_id`, needed by the HA login
    /// challenge
    pub fn ha_get_master_public(&self, slot_id: usize) -> HResult<Vec<u8>> {
        ensure_vendor_extensions(P::capabilities().vendor_extensions)?;
        let slot_id = CK_SLOT_ID::try_from(slot_id)?;
        probe_and_fill::<CK_BYTE, _>(
            "Failed getting the master public certificate",
            "CA_HAGetMasterPublic",
            |buffer, len| {
                Ok(hsm_raw_call!(
                    self.hsm_lib(),
                    CA_HAGetMasterPublic,
                    slot_id,
                    buffer,
                    len
                ))
            },
        )
    }
}

impl Session {
    /// Challenge of this (target) session for `user_type`, encrypted for the
    /// token owning `token_wrapping_cert`
    pub fn ha_get_login_challenge(
        &self,
        user_type: CK_USER_TYPE,
        token_wrapping_cert: &[u8],
    ) -> HResult<Vec<u8>> {
        ensure_vendor_extensions(self.hsm_capabilities().vendor_extensions)?;
        let cert_len = CK_ULONG::try_from(token_wrapping_cert.len())?;
        probe_and_fill::<CK_BYTE, _>(
            "Failed getting the login challenge",
            "CA_HAGetLoginChallenge",
            |buffer, len| {
                Ok(hsm_raw_call!(
                    self.hsm(),
                    CA_HAGetLoginChallenge,
                    self.session_handle(),
                    user_type,
                    token_wrapping_cert.as_ptr().cast_mut(),
                    cert_len,
                    buffer,
                    len
                ))
            },
        )
    }

    /// Answer a challenge from another token with `login_key`; returns the
    /// encrypted PIN to give to [`Session::ha_login`] on that token
    pub fn ha_answer_login_challenge(
        &self,
        login_key: CK_OBJECT_HANDLE,
        challenge: &[u8],
    ) -> HResult<Vec<u8>> {
        ensure_vendor_extensions(self.hsm_capabilities().vendor_extensions)?;
        let challenge_len = CK_ULONG::try_from(challenge.len())?;
        probe_and_fill::<CK_BYTE, _>(
            "Failed answering the login challenge",
            "CA_HAAnswerLoginChallenge",
            |buffer, len| {
                Ok(hsm_raw_call!(
                    self.hsm(),
                    CA_HAAnswerLoginChallenge,
                    self.session_handle(),
                    login_key,
                    challenge.as_ptr().cast_mut(),
                    challenge_len,
                    buffer,
                    len
                ))
            },
        )
    }

    /// Log in with the encrypted PIN produced by the source token
    pub fn ha_login(&self, encrypted_pin: &[u8]) -> HResult<()> {
        ensure_vendor_extensions(self.hsm_capabilities().vendor_extensions)?;
        let mut mofn_len: CK_ULONG = 0;
        hsm_call!(
            self.hsm(),
            "Failed HA login",
            CA_HALogin,
            self.session_handle(),
            encrypted_pin.as_ptr().cast_mut(),
            CK_ULONG::try_from(encrypted_pin.len())?,
            ptr::null_mut(),
            &raw mut mofn_len
        );
        self.mark_logged_in();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ensure_vendor_extensions;

    #[test]
    fn test_vendor_extensions_gate() {
        assert!(ensure_vendor_extensions(true).is_ok());
        let err = ensure_vendor_extensions(false).unwrap_err();
        assert!(err.to_string().contains("CA_*"));
    }
}
