//! A PKCS#11 session and the object management operations run through it.
//!
//! Key generation lives in `keys.rs`, cryptographic operations in
//! `crypto.rs` and the Luna HA login extensions in `luna.rs`.

use std::{
    ptr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use cosmian_pkcs11_sys::{
    CK_ATTRIBUTE, CK_ATTRIBUTE_TYPE, CK_BYTE, CK_KEY_TYPE, CK_OBJECT_CLASS, CK_OBJECT_HANDLE,
    CK_SESSION_HANDLE, CK_SESSION_INFO, CK_SLOT_ID, CK_ULONG, CK_USER_TYPE, CKA_CLASS,
    CKA_KEY_TYPE, CKA_LABEL, CKA_PRIVATE, CKA_TOKEN, CKR_OK, CKR_USER_ALREADY_LOGGED_IN,
};
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use crate::{
    HError, HResult, ObjectHandlesCache, SessionInfo, Template, hsm_call,
    hsm_capabilities::HsmCapabilities, hsm_lib::HsmLib, hsm_raw_call, probe::probe_and_fill,
};

/// A session opened on a slot of the HSM.
///
/// The session is closed by [`Session::close`], or when dropped. If this
/// session logged in, it logs out before closing.
///
/// PKCS#11 sessions must not be used by two threads at the same time: share
/// a session between threads behind a `Mutex`, or open one session per thread.
pub struct Session {
    hsm: Arc<HsmLib>,
    handle: CK_SESSION_HANDLE,
    slot_id: CK_SLOT_ID,
    object_handles_cache: Arc<ObjectHandlesCache>,
    logged_in: AtomicBool,
    closed: AtomicBool,
    hsm_capabilities: HsmCapabilities,
}

impl Session {
    pub(crate) fn new(
        hsm: Arc<HsmLib>,
        session_handle: CK_SESSION_HANDLE,
        slot_id: CK_SLOT_ID,
        object_handles_cache: Arc<ObjectHandlesCache>,
        hsm_capabilities: HsmCapabilities,
    ) -> Self {
        debug!("Opened session {session_handle} on slot {slot_id}");
        Self {
            hsm,
            handle: session_handle,
            slot_id,
            object_handles_cache,
            logged_in: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            hsm_capabilities,
        }
    }

    /// Get the HSM library interface
    pub(crate) fn hsm(&self) -> &HsmLib {
        &self.hsm
    }

    /// Get the PKCS#11 session handle
    #[must_use]
    pub const fn session_handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    #[must_use]
    pub const fn slot_id(&self) -> CK_SLOT_ID {
        self.slot_id
    }

    pub(crate) const fn hsm_capabilities(&self) -> &HsmCapabilities {
        &self.hsm_capabilities
    }

    /// Log into the token.
    ///
    /// With `pin` set to `None`, a null PIN is sent and the token collects
    /// the credentials itself (PED authentication on Luna).
    /// An already logged in user is not an error.
    pub fn login(&self, user_type: CK_USER_TYPE, pin: Option<&[u8]>) -> HResult<()> {
        let mut pin = pin.map(|p| Zeroizing::new(p.to_vec()));
        let (p_pin, pin_len) = match pin.as_mut() {
            Some(pin) => (pin.as_mut_ptr(), CK_ULONG::try_from(pin.len())?),
            None => (ptr::null_mut(), 0),
        };
        let rv = hsm_raw_call!(self.hsm, C_Login, self.handle, user_type, p_pin, pin_len);
        match rv {
            CKR_OK => {
                self.logged_in.store(true, Ordering::SeqCst);
                Ok(())
            }
            CKR_USER_ALREADY_LOGGED_IN => {
                warn!("user already logged in, ignoring logging");
                Ok(())
            }
            _ => Err(HError::pkcs11("Failed logging in", "C_Login", rv)),
        }
    }

    /// Record a login performed by a vendor call so that closing logs out
    pub(crate) fn mark_logged_in(&self) {
        self.logged_in.store(true, Ordering::SeqCst);
    }

    pub fn logout(&self) -> HResult<()> {
        self.logout_call()?;
        self.logged_in.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn get_session_info(&self) -> HResult<SessionInfo> {
        let mut info = CK_SESSION_INFO::default();
        hsm_call!(
            self.hsm,
            "Failed getting the session info",
            C_GetSessionInfo,
            self.handle,
            &raw mut info
        );
        Ok(info.into())
    }

    /// Close the session and log out if necessary.
    ///
    /// A failed logout is logged and does not prevent closing the session.
    pub fn close(&self) -> HResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.logged_in.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.logout_call() {
                warn!("closing session {} anyway: {e}", self.handle);
            }
        }
        hsm_call!(
            self.hsm,
            "Failed closing a session",
            C_CloseSession,
            self.handle
        );
        debug!("Closed session {}", self.handle);
        Ok(())
    }

    fn logout_call(&self) -> HResult<()> {
        hsm_call!(self.hsm, "Failed logging out", C_Logout, self.handle);
        Ok(())
    }

    /// Close the session but leave the user logged in, for a login state
    /// kept alive by a shared application ID
    pub fn close_keep_login(&self) -> HResult<()> {
        self.logged_in.store(false, Ordering::SeqCst);
        self.close()
    }

    /// Search for the handles of the objects matching `template`.
    ///
    /// The search is always finalized, even when fetching results fails.
    pub fn find_objects(&self, template: &Template) -> HResult<Vec<CK_OBJECT_HANDLE>> {
        let mut attributes = template.to_ck_attributes()?;
        hsm_call!(
            self.hsm,
            "Failed to initialize object search",
            C_FindObjectsInit,
            self.handle,
            attributes.as_mut_ptr(),
            CK_ULONG::try_from(attributes.len())?
        );
        let result = self.fetch_found_objects();
        let finalized = self.finalize_search();
        let object_handles = result?;
        finalized?;
        Ok(object_handles)
    }

    fn finalize_search(&self) -> HResult<()> {
        hsm_call!(
            self.hsm,
            "Failed to finalize object search",
            C_FindObjectsFinal,
            self.handle
        );
        Ok(())
    }

    fn fetch_found_objects(&self) -> HResult<Vec<CK_OBJECT_HANDLE>> {
        let max_object_count = self.hsm_capabilities.find_max_object_count;
        let mut handles_buf = vec![CK_OBJECT_HANDLE::default(); usize::try_from(max_object_count)?];
        let mut object_handles = Vec::new();
        loop {
            let mut object_count: CK_ULONG = 0;
            hsm_call!(
                self.hsm,
                "Failed to find objects",
                C_FindObjects,
                self.handle,
                handles_buf.as_mut_ptr(),
                max_object_count,
                &raw mut object_count
            );
            if object_count == 0 {
                break;
            }
            trace!("Found {object_count} objects");
            object_handles.extend_from_slice(
                handles_buf
                    .get(..usize::try_from(object_count)?)
                    .ok_or_else(|| {
                        HError::Default("More objects returned than requested".to_owned())
                    })?,
            );
        }
        Ok(object_handles)
    }

    /// The handle of the single object matching `template`, `None` when
    /// there is no match or several
    pub fn find_object(&self, template: &Template) -> HResult<Option<CK_OBJECT_HANDLE>> {
        let handles = self.find_objects(template)?;
        match handles.as_slice() {
            [handle] => Ok(Some(*handle)),
            [] => Ok(None),
            _ => {
                debug!("{} objects match the template", handles.len());
                Ok(None)
            }
        }
    }

    /// Locate a token key by class, type and label.
    ///
    /// `private` must match the `CKA_PRIVATE` attribute the key was created
    /// with: keys generated while logged in are private.
    pub fn find_key(
        &self,
        class: CK_OBJECT_CLASS,
        key_type: CK_KEY_TYPE,
        label: &str,
        private: bool,
    ) -> HResult<Option<CK_OBJECT_HANDLE>> {
        let template = Template::new()
            .ulong(CKA_CLASS, class)
            .ulong(CKA_KEY_TYPE, key_type)
            .bool(CKA_TOKEN, true)
            .bytes(CKA_LABEL, label)
            .bool(CKA_PRIVATE, private);
        self.find_object(&template)
    }

    /// The handle of the first object matching `template`, if any
    pub fn find_first_object(&self, template: &Template) -> HResult<Option<CK_OBJECT_HANDLE>> {
        let handles = self.find_objects(template)?;
        if handles.len() > 1 {
            debug!("{} objects match the template, using the first one", handles.len());
        }
        Ok(handles.first().copied())
    }

    /// Retrieve the handle of the first object labelled `label`, caching it
    pub fn get_object_handle(&self, label: &[u8]) -> HResult<CK_OBJECT_HANDLE> {
        if let Some(handle) = self.object_handles_cache.get(label)? {
            return Ok(handle);
        }
        let template = Template::new().bytes(CKA_LABEL, label);
        let handle = self.find_first_object(&template)?.ok_or_else(|| {
            HError::Default(format!(
                "no object labelled {}",
                String::from_utf8_lossy(label)
            ))
        })?;
        self.object_handles_cache.insert(label.to_vec(), handle)?;
        Ok(handle)
    }

    /// Read the value of an attribute
    pub fn get_attribute(
        &self,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
    ) -> HResult<Vec<u8>> {
        probe_and_fill::<CK_BYTE, _>(
            "Failed reading an attribute",
            "C_GetAttributeValue",
            |buffer, len| {
                let mut template = CK_ATTRIBUTE {
                    type_: attribute,
                    pValue: buffer.cast(),
                    ulValueLen: *len,
                };
                let rv = hsm_raw_call!(
                    self.hsm,
                    C_GetAttributeValue,
                    self.handle,
                    object,
                    &raw mut template,
                    1
                );
                *len = template.ulValueLen;
                Ok(rv)
            },
        )
    }

    /// Read a `CK_ULONG` valued attribute such as the class or key type
    pub fn get_ulong_attribute(
        &self,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
    ) -> HResult<CK_ULONG> {
        let value = self.get_attribute(object, attribute)?;
        let bytes: [u8; size_of::<CK_ULONG>()] = value.as_slice().try_into().map_err(|_| {
            HError::Default(format!(
                "attribute {attribute:#x} is {} bytes long, not a CK_ULONG",
                value.len()
            ))
        })?;
        Ok(CK_ULONG::from_ne_bytes(bytes))
    }

    /// Modify attributes of an existing object
    pub fn set_attributes(&self, object: CK_OBJECT_HANDLE, template: &Template) -> HResult<()> {
        let mut attributes = template.to_ck_attributes()?;
        hsm_call!(
            self.hsm,
            "Failed setting attributes",
            C_SetAttributeValue,
            self.handle,
            object,
            attributes.as_mut_ptr(),
            CK_ULONG::try_from(attributes.len())?
        );
        Ok(())
    }

    pub fn set_boolean_attribute(
        &self,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
        value: bool,
    ) -> HResult<()> {
        self.set_attributes(object, &Template::new().bool(attribute, value))
    }

    pub fn destroy_object(&self, object: CK_OBJECT_HANDLE) -> HResult<()> {
        hsm_call!(
            self.hsm,
            "Failed to destroy object",
            C_DestroyObject,
            self.handle,
            object
        );
        self.object_handles_cache.remove_handle(object)?;
        Ok(())
    }

    /// Random bytes from the token's generator
    pub fn generate_random(&self, len: usize) -> HResult<Vec<u8>> {
        let mut values = vec![0_u8; len];
        hsm_call!(
            self.hsm,
            "Failed generating random data",
            C_GenerateRandom,
            self.handle,
            values.as_mut_ptr(),
            CK_ULONG::try_from(len)?
        );
        Ok(values)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{e}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use cosmian_pkcs11_sys::{
        CK_ATTRIBUTE, CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE, CK_ULONG, CK_USER_TYPE,
        CK_UTF8CHAR, CKA_LABEL, CKR_OK, CKR_USER_NOT_LOGGED_IN, CKU_USER,
    };

    use super::Session;
    use crate::{HsmCapabilities, ObjectHandlesCache, Template, hsm_lib::HsmLib};

    static CLOSE_CALLS: AtomicUsize = AtomicUsize::new(0);
    static FIND_PENDING: AtomicBool = AtomicBool::new(false);

    unsafe extern "C" fn login_ok(
        _session: CK_SESSION_HANDLE,
        _user_type: CK_USER_TYPE,
        _pin: *mut CK_UTF8CHAR,
        _pin_len: CK_ULONG,
    ) -> CK_RV {
        CKR_OK
    }

    unsafe extern "C" fn logout_not_logged_in(_session: CK_SESSION_HANDLE) -> CK_RV {
        CKR_USER_NOT_LOGGED_IN
    }

    unsafe extern "C" fn close_counted(_session: CK_SESSION_HANDLE) -> CK_RV {
        CLOSE_CALLS.fetch_add(1, Ordering::SeqCst);
        CKR_OK
    }

    unsafe extern "C" fn close_ok(_session: CK_SESSION_HANDLE) -> CK_RV {
        CKR_OK
    }

    unsafe extern "C" fn find_init(
        _session: CK_SESSION_HANDLE,
        _template: *mut CK_ATTRIBUTE,
        _count: CK_ULONG,
    ) -> CK_RV {
        FIND_PENDING.store(true, Ordering::SeqCst);
        CKR_OK
    }

    /// Two objects share every label: handles 11 and 12
    unsafe extern "C" fn find_two_objects(
        _session: CK_SESSION_HANDLE,
        handles: *mut CK_OBJECT_HANDLE,
        _max_count: CK_ULONG,
        count: *mut CK_ULONG,
    ) -> CK_RV {
        unsafe {
            if FIND_PENDING.swap(false, Ordering::SeqCst) {
                *handles = 11;
                *handles.add(1) = 12;
                *count = 2;
            } else {
                *count = 0;
            }
        }
        CKR_OK
    }

    unsafe extern "C" fn find_final(_session: CK_SESSION_HANDLE) -> CK_RV {
        CKR_OK
    }

    fn session_on(hsm: HsmLib) -> Session {
        Session::new(
            Arc::new(hsm),
            1,
            0,
            Arc::new(ObjectHandlesCache::new()),
            HsmCapabilities::default(),
        )
    }

    #[test]
    fn test_close_survives_failed_logout() {
        let mut hsm = HsmLib::unloaded();
        hsm.C_Login = Some(login_ok);
        hsm.C_Logout = Some(logout_not_logged_in);
        hsm.C_CloseSession = Some(close_counted);
        let session = session_on(hsm);
        session.login(CKU_USER, Some(b"1234")).unwrap();

        session.close().unwrap();
        assert_eq!(CLOSE_CALLS.load(Ordering::SeqCst), 1);

        // closing again, explicitly or on drop, is a no-op
        session.close().unwrap();
        drop(session);
        assert_eq!(CLOSE_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lookup_with_several_matches() {
        let mut hsm = HsmLib::unloaded();
        hsm.C_CloseSession = Some(close_ok);
        hsm.C_FindObjectsInit = Some(find_init);
        hsm.C_FindObjects = Some(find_two_objects);
        hsm.C_FindObjectsFinal = Some(find_final);
        let session = session_on(hsm);

        assert_eq!(session.get_object_handle(b"loginkey").unwrap(), 11);
        // the second lookup is served by the cache
        assert_eq!(session.get_object_handle(b"loginkey").unwrap(), 11);

        let template = Template::new().bytes(CKA_LABEL, "loginkey");
        assert_eq!(session.find_first_object(&template).unwrap(), Some(11));
        assert_eq!(session.find_object(&template).unwrap(), None);
        assert_eq!(session.find_objects(&template).unwrap(), vec![11, 12]);
    }
}
