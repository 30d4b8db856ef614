use std::{
    collections::HashMap,
    ffi::OsStr,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use cosmian_pkcs11_sys::{
    CK_BBOOL, CK_FALSE, CK_INFO, CK_SLOT_ID, CK_SLOT_INFO, CK_TOKEN_INFO, CK_TRUE,
};
use tracing::debug;

use crate::{
    HError, HResult, Info, LockingModel, SlotInfo, SlotManager, TokenInfo, hsm_call,
    hsm_capabilities::{HsmCapabilities, HsmProvider},
    hsm_lib::HsmLib,
    hsm_raw_call,
    probe::probe_and_fill,
};

pub struct DefaultCapabilityProvider;
impl HsmProvider for DefaultCapabilityProvider {
    fn capabilities() -> HsmCapabilities {
        HsmCapabilities::default()
    }
}

/// A loaded and initialized PKCS#11 library.
///
/// The library is finalized when the last reference to it is dropped,
/// which includes the sessions still open.
pub struct BaseHsm<P: HsmProvider = DefaultCapabilityProvider> {
    hsm_lib: Arc<HsmLib>,
    slots: Mutex<HashMap<usize, Arc<SlotManager>>>,
    _provider: PhantomData<P>,
}

impl<P: HsmProvider> BaseHsm<P> {
    /// Load the library at `path` and initialize it with the `locking` model
    pub fn instantiate<Pth: AsRef<OsStr>>(path: Pth, locking: LockingModel) -> HResult<Self> {
        debug!("Using PKCS#11 library with {:?}", P::capabilities());
        let hsm_lib = Arc::new(HsmLib::instantiate(path, locking)?);
        Ok(Self {
            hsm_lib,
            slots: Mutex::new(HashMap::new()),
            _provider: PhantomData,
        })
    }

    pub(crate) fn hsm_lib(&self) -> &HsmLib {
        &self.hsm_lib
    }

    /// Get a slot.
    /// If the slot has already been opened, returns the opened slot.
    pub fn get_slot(&self, slot_id: usize) -> HResult<Arc<SlotManager>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| HError::Lock(format!("Failed to acquire lock on slots: {e}")))?;
        if let Some(slot) = slots.get(&slot_id) {
            return Ok(slot.clone());
        }
        let manager = Arc::new(SlotManager::instantiate(
            self.hsm_lib.clone(),
            slot_id,
            P::capabilities(),
        )?);
        slots.insert(slot_id, manager.clone());
        Ok(manager)
    }

    pub fn close_slot(&self, slot_id: usize) -> HResult<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| HError::Lock(format!("Failed to acquire lock on slots: {e}")))?;
        slots.remove(&slot_id);
        Ok(())
    }

    pub fn get_info(&self) -> HResult<Info> {
        let mut info = CK_INFO::default();
        hsm_call!(
            self.hsm_lib,
            "Failed getting HSM info",
            C_GetInfo,
            &raw mut info
        );
        Ok(info.into())
    }

    /// The IDs of the slots, restricted to those holding a token when
    /// `token_present` is set
    pub fn get_slot_list(&self, token_present: bool) -> HResult<Vec<usize>> {
        let token_present: CK_BBOOL = if token_present { CK_TRUE } else { CK_FALSE };
        let slots = probe_and_fill::<CK_SLOT_ID, _>(
            "Failed listing the slots",
            "C_GetSlotList",
            |buffer, len| {
                Ok(hsm_raw_call!(
                    self.hsm_lib,
                    C_GetSlotList,
                    token_present,
                    buffer,
                    len
                ))
            },
        )?;
        slots
            .into_iter()
            .map(|id| usize::try_from(id).map_err(HError::from))
            .collect()
    }

    pub fn get_slot_info(&self, slot_id: usize) -> HResult<SlotInfo> {
        let slot_id = CK_SLOT_ID::try_from(slot_id)?;
        let mut info = CK_SLOT_INFO::default();
        hsm_call!(
            self.hsm_lib,
            format!("Failed getting the info of slot {slot_id}"),
            C_GetSlotInfo,
            slot_id,
            &raw mut info
        );
        Ok(SlotInfo::new(slot_id, &info))
    }

    pub fn get_token_info(&self, slot_id: usize) -> HResult<TokenInfo> {
        let slot_id = CK_SLOT_ID::try_from(slot_id)?;
        let mut info = CK_TOKEN_INFO::default();
        hsm_call!(
            self.hsm_lib,
            format!("Failed getting the token info of slot {slot_id}"),
            C_GetTokenInfo,
            slot_id,
            &raw mut info
        );
        Ok(TokenInfo::from(&info))
    }
}
