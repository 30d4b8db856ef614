use std::{
    num::NonZeroUsize,
    ptr,
    sync::{Arc, Mutex, MutexGuard},
};

use cosmian_pkcs11_sys::{
    CK_FLAGS, CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CK_SLOT_ID, CKF_RW_SESSION, CKF_SERIAL_SESSION,
};
use lru::LruCache;

use crate::{HError, HResult, Session, hsm_call, hsm_capabilities::HsmCapabilities, hsm_lib::HsmLib};

const OBJECT_HANDLES_CACHE_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(99);

/// An LRU cache mapping object labels to their PKCS#11 handles.
///
/// Shared by all the sessions of a slot: handles of token objects are valid
/// across sessions of the same application.
pub struct ObjectHandlesCache(Mutex<LruCache<Vec<u8>, CK_OBJECT_HANDLE>>);

impl Default for ObjectHandlesCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectHandlesCache {
    #[must_use]
    pub fn new() -> Self {
        Self(Mutex::new(LruCache::new(OBJECT_HANDLES_CACHE_SIZE)))
    }

    fn lock(&self) -> HResult<MutexGuard<'_, LruCache<Vec<u8>, CK_OBJECT_HANDLE>>> {
        self.0
            .lock()
            .map_err(|e| HError::Lock(format!("failed to lock the handles cache: {e}")))
    }

    pub fn get(&self, key: &[u8]) -> HResult<Option<CK_OBJECT_HANDLE>> {
        Ok(self.lock()?.get(key).copied())
    }

    pub fn insert(&self, key: Vec<u8>, value: CK_OBJECT_HANDLE) -> HResult<()> {
        self.lock()?.put(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &[u8]) -> HResult<()> {
        self.lock()?.pop(key);
        Ok(())
    }

    /// Drop every entry pointing to `handle`, typically after it was destroyed
    pub fn remove_handle(&self, handle: CK_OBJECT_HANDLE) -> HResult<()> {
        let mut cache = self.lock()?;
        let stale: Vec<Vec<u8>> = cache
            .iter()
            .filter(|(_, v)| **v == handle)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
        Ok(())
    }

    pub fn len(&self) -> HResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> HResult<bool> {
        Ok(self.lock()?.is_empty())
    }
}

/// Opens sessions on one slot of the HSM.
///
/// Logging in is left to the caller: see [`Session::login`].
pub struct SlotManager {
    hsm_lib: Arc<HsmLib>,
    slot_id: CK_SLOT_ID,
    object_handles_cache: Arc<ObjectHandlesCache>,
    hsm_capabilities: HsmCapabilities,
}

impl SlotManager {
    pub(crate) fn instantiate(
        hsm_lib: Arc<HsmLib>,
        slot_id: usize,
        hsm_capabilities: HsmCapabilities,
    ) -> HResult<Self> {
        Ok(Self {
            hsm_lib,
            slot_id: CK_SLOT_ID::try_from(slot_id)?,
            object_handles_cache: Arc::new(ObjectHandlesCache::new()),
            hsm_capabilities,
        })
    }

    #[must_use]
    pub const fn slot_id(&self) -> CK_SLOT_ID {
        self.slot_id
    }

    /// Open a serial session, read-write if `read_write` is set
    pub fn open_session(&self, read_write: bool) -> HResult<Session> {
        let flags = if read_write {
            CKF_RW_SESSION | CKF_SERIAL_SESSION
        } else {
            CKF_SERIAL_SESSION
        };
        self.open_session_with_flags(flags)
    }

    /// Open a session with explicit flags, for instance a Luna SO session.
    /// `CKF_SERIAL_SESSION` is always added.
    pub fn open_session_with_flags(&self, flags: CK_FLAGS) -> HResult<Session> {
        let mut session_handle: CK_SESSION_HANDLE = 0;
        hsm_call!(
            self.hsm_lib,
            format!("Failed opening a session on slot {}", self.slot_id),
            C_OpenSession,
            self.slot_id,
            flags | CKF_SERIAL_SESSION,
            ptr::null_mut(),
            None,
            &raw mut session_handle
        );
        Ok(Session::new(
            self.hsm_lib.clone(),
            session_handle,
            self.slot_id,
            self.object_handles_cache.clone(),
            self.hsm_capabilities.clone(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::ObjectHandlesCache;

    #[test]
    fn test_cache_insert_get_remove() {
        let cache = ObjectHandlesCache::new();
        assert!(cache.is_empty().unwrap());
        cache.insert(b"key".to_vec(), 42).unwrap();
        assert_eq!(cache.get(b"key").unwrap(), Some(42));
        assert_eq!(cache.get(b"other").unwrap(), None);
        cache.remove(b"key").unwrap();
        assert_eq!(cache.get(b"key").unwrap(), None);
    }

    #[test]
    fn test_cache_remove_handle() {
        let cache = ObjectHandlesCache::new();
        cache.insert(b"a".to_vec(), 7).unwrap();
        cache.insert(b"b".to_vec(), 7).unwrap();
        cache.insert(b"c".to_vec(), 8).unwrap();
        cache.remove_handle(7).unwrap();
        assert_eq!(cache.len().unwrap(), 1);
        assert_eq!(cache.get(b"c").unwrap(), Some(8));
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let cache = ObjectHandlesCache::new();
        for i in 0..101_u64 {
            cache.insert(i.to_be_bytes().to_vec(), i.into()).unwrap();
        }
        assert_eq!(cache.len().unwrap(), 100);
        assert_eq!(cache.get(&0_u64.to_be_bytes()).unwrap(), None);
    }
}
