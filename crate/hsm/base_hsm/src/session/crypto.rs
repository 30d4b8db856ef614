//! Single-part cryptographic operations.
//!
//! Outputs of unknown length use the two-call convention: the first call
//! sizes the buffer, the second fills it.

use cosmian_pkcs11_sys::{
    CK_BYTE, CK_OBJECT_HANDLE, CK_ULONG, CKR_OK, CKR_SIGNATURE_INVALID, CKR_SIGNATURE_LEN_RANGE,
};

use crate::{
    HError, HResult, Mechanism, Template, hsm_call, hsm_raw_call, probe::probe_and_fill,
    session::Session,
};

impl Session {
    pub fn encrypt(
        &self,
        key: CK_OBJECT_HANDLE,
        mechanism: Mechanism,
        plaintext: &[u8],
    ) -> HResult<Vec<u8>> {
        mechanism.with_ck_mechanism(|ck_mechanism| {
            hsm_call!(
                self.hsm(),
                "Failed initializing encryption",
                C_EncryptInit,
                self.session_handle(),
                ck_mechanism,
                key
            );
            Ok(())
        })?;
        let data_len = CK_ULONG::try_from(plaintext.len())?;
        probe_and_fill::<CK_BYTE, _>("Failed encrypting", "C_Encrypt", |buffer, len| {
            Ok(hsm_raw_call!(
                self.hsm(),
                C_Encrypt,
                self.session_handle(),
                plaintext.as_ptr().cast_mut(),
                data_len,
                buffer,
                len
            ))
        })
    }

    pub fn decrypt(
        &self,
        key: CK_OBJECT_HANDLE,
        mechanism: Mechanism,
        ciphertext: &[u8],
    ) -> HResult<Vec<u8>> {
        mechanism.with_ck_mechanism(|ck_mechanism| {
            hsm_call!(
                self.hsm(),
                "Failed initializing decryption",
                C_DecryptInit,
                self.session_handle(),
                ck_mechanism,
                key
            );
            Ok(())
        })?;
        let data_len = CK_ULONG::try_from(ciphertext.len())?;
        probe_and_fill::<CK_BYTE, _>("Failed decrypting", "C_Decrypt", |buffer, len| {
            Ok(hsm_raw_call!(
                self.hsm(),
                C_Decrypt,
                self.session_handle(),
                ciphertext.as_ptr().cast_mut(),
                data_len,
                buffer,
                len
            ))
        })
    }

    pub fn sign(&self, key: CK_OBJECT_HANDLE, mechanism: Mechanism, data: &[u8]) -> HResult<Vec<u8>> {
        mechanism.with_ck_mechanism(|ck_mechanism| {
            hsm_call!(
                self.hsm(),
                "Failed initializing signature",
                C_SignInit,
                self.session_handle(),
                ck_mechanism,
                key
            );
            Ok(())
        })?;
        let data_len = CK_ULONG::try_from(data.len())?;
        probe_and_fill::<CK_BYTE, _>("Failed signing", "C_Sign", |buffer, len| {
            Ok(hsm_raw_call!(
                self.hsm(),
                C_Sign,
                self.session_handle(),
                data.as_ptr().cast_mut(),
                data_len,
                buffer,
                len
            ))
        })
    }

    /// Verify a signature. An invalid signature is `Ok(false)`, not an error.
    pub fn verify(
        &self,
        key: CK_OBJECT_HANDLE,
        mechanism: Mechanism,
        data: &[u8],
        signature: &[u8],
    ) -> HResult<bool> {
        mechanism.with_ck_mechanism(|ck_mechanism| {
            hsm_call!(
                self.hsm(),
                "Failed initializing verification",
                C_VerifyInit,
                self.session_handle(),
                ck_mechanism,
                key
            );
            Ok(())
        })?;
        let rv = hsm_raw_call!(
            self.hsm(),
            C_Verify,
            self.session_handle(),
            data.as_ptr().cast_mut(),
            CK_ULONG::try_from(data.len())?,
            signature.as_ptr().cast_mut(),
            CK_ULONG::try_from(signature.len())?
        );
        match rv {
            CKR_OK => Ok(true),
            CKR_SIGNATURE_INVALID | CKR_SIGNATURE_LEN_RANGE => Ok(false),
            _ => Err(HError::pkcs11("Failed verifying", "C_Verify", rv)),
        }
    }

    /// Export `key` encrypted under `wrapping_key`
    pub fn wrap_key(
        &self,
        wrapping_key: CK_OBJECT_HANDLE,
        mechanism: Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> HResult<Vec<u8>> {
        mechanism.with_ck_mechanism(|ck_mechanism| {
            probe_and_fill::<CK_BYTE, _>("Failed wrapping key", "C_WrapKey", |buffer, len| {
                Ok(hsm_raw_call!(
                    self.hsm(),
                    C_WrapKey,
                    self.session_handle(),
                    ck_mechanism,
                    wrapping_key,
                    key,
                    buffer,
                    len
                ))
            })
        })
    }

    /// Import a wrapped key as a new object described by `template`
    pub fn unwrap_key(
        &self,
        unwrapping_key: CK_OBJECT_HANDLE,
        mechanism: Mechanism,
        wrapped_key: &[u8],
        template: &Template,
    ) -> HResult<CK_OBJECT_HANDLE> {
        let mut attributes = template.to_ck_attributes()?;
        let mut key = CK_OBJECT_HANDLE::default();
        mechanism.with_ck_mechanism(|ck_mechanism| {
            hsm_call!(
                self.hsm(),
                "Failed unwrapping key",
                C_UnwrapKey,
                self.session_handle(),
                ck_mechanism,
                unwrapping_key,
                wrapped_key.as_ptr().cast_mut(),
                CK_ULONG::try_from(wrapped_key.len())?,
                attributes.as_mut_ptr(),
                CK_ULONG::try_from(attributes.len())?,
                &raw mut key
            );
            Ok(())
        })?;
        Ok(key)
    }
}
