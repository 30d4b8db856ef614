//! Locking models accepted by `C_Initialize` and the application supplied
//! mutex used by the `functions` model.
//!
//! With [`LockingModel::Functions`] the library receives the four callbacks
//! defined here (create, destroy, lock, unlock). Each library mutex is a boxed
//! [`ReentrantMutex`] whose address is handed to the library as an opaque
//! pointer.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
    sync::{
        Condvar, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, ThreadId},
};

use cosmian_pkcs11_sys::{
    CK_RV, CK_VOID_PTR, CK_VOID_PTR_PTR, CKR_ARGUMENTS_BAD, CKR_CANT_LOCK, CKR_GENERAL_ERROR,
    CKR_MUTEX_BAD, CKR_MUTEX_NOT_LOCKED, CKR_OK,
};
use tracing::trace;

use crate::{HError, HResult};

/// How the PKCS#11 library protects itself against concurrent calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockingModel {
    /// The application promises not to call the library from several threads
    None,
    /// The library uses the operating system primitives
    #[default]
    Os,
    /// The library uses the mutex callbacks supplied by this crate
    Functions,
}

impl Display for LockingModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Os => write!(f, "os"),
            Self::Functions => write!(f, "functions"),
        }
    }
}

impl FromStr for LockingModel {
    type Err = HError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "os" => Ok(Self::Os),
            "functions" => Ok(Self::Functions),
            _ => Err(HError::Default(format!(
                "unknown locking model {s}, expected none, os or functions"
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    holds: usize,
}

/// A mutex that its owning thread may lock several times.
///
/// It is released when the owner has unlocked it as many times as it locked
/// it. Other threads block in [`ReentrantMutex::lock`] until then.
#[derive(Debug, Default)]
pub struct ReentrantMutex {
    state: Mutex<Ownership>,
    released: Condvar,
}

impl ReentrantMutex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> HResult<()> {
        let me = thread::current().id();
        let mut state = self
            .state
            .lock()
            .map_err(|e| HError::Lock(e.to_string()))?;
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.holds = 1;
                    return Ok(());
                }
                Some(owner) if owner == me => {
                    state.holds += 1;
                    return Ok(());
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .map_err(|e| HError::Lock(e.to_string()))?;
                }
            }
        }
    }

    /// Release one hold. Fails with `HError::MutexNotLocked` when the
    /// calling thread is not the owner.
    pub fn unlock(&self) -> HResult<()> {
        let me = thread::current().id();
        let mut state = self
            .state
            .lock()
            .map_err(|e| HError::Lock(e.to_string()))?;
        if state.owner != Some(me) {
            return Err(HError::MutexNotLocked);
        }
        state.holds -= 1;
        if state.holds == 0 {
            state.owner = None;
            self.released.notify_one();
        }
        Ok(())
    }

    /// Number of outstanding holds of the current owner
    pub fn hold_count(&self) -> HResult<usize> {
        let state = self
            .state
            .lock()
            .map_err(|e| HError::Lock(e.to_string()))?;
        Ok(state.holds)
    }
}

static LIVE_MUTEXES: AtomicUsize = AtomicUsize::new(0);

/// Number of mutexes created by the library and not yet destroyed
pub fn live_mutexes() -> usize {
    LIVE_MUTEXES.load(Ordering::SeqCst)
}

pub(crate) unsafe extern "C" fn create_mutex(pp_mutex: CK_VOID_PTR_PTR) -> CK_RV {
    if pp_mutex.is_null() {
        return CKR_ARGUMENTS_BAD;
    }
    let mutex = Box::into_raw(Box::new(ReentrantMutex::new()));
    unsafe {
        *pp_mutex = mutex.cast();
    }
    let live = LIVE_MUTEXES.fetch_add(1, Ordering::SeqCst) + 1;
    trace!("created mutex {mutex:p}, {live} alive");
    CKR_OK
}

pub(crate) unsafe extern "C" fn destroy_mutex(p_mutex: CK_VOID_PTR) -> CK_RV {
    if p_mutex.is_null() {
        return CKR_MUTEX_BAD;
    }
    drop(unsafe { Box::from_raw(p_mutex.cast::<ReentrantMutex>()) });
    let live = LIVE_MUTEXES.fetch_sub(1, Ordering::SeqCst) - 1;
    trace!("destroyed mutex {p_mutex:p}, {live} alive");
    CKR_OK
}

pub(crate) unsafe extern "C" fn lock_mutex(p_mutex: CK_VOID_PTR) -> CK_RV {
    if p_mutex.is_null() {
        return CKR_MUTEX_BAD;
    }
    let mutex = unsafe { &*p_mutex.cast::<ReentrantMutex>() };
    match mutex.lock() {
        Ok(()) => CKR_OK,
        Err(_) => CKR_CANT_LOCK,
    }
}

pub(crate) unsafe extern "C" fn unlock_mutex(p_mutex: CK_VOID_PTR) -> CK_RV {
    if p_mutex.is_null() {
        return CKR_MUTEX_BAD;
    }
    let mutex = unsafe { &*p_mutex.cast::<ReentrantMutex>() };
    match mutex.unlock() {
        Ok(()) => CKR_OK,
        Err(HError::MutexNotLocked) => CKR_MUTEX_NOT_LOCKED,
        Err(_) => CKR_GENERAL_ERROR,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        ptr,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    };

    use cosmian_pkcs11_sys::{
        CK_VOID_PTR, CKR_ARGUMENTS_BAD, CKR_MUTEX_BAD, CKR_MUTEX_NOT_LOCKED, CKR_OK,
    };

    use super::{
        LockingModel, ReentrantMutex, create_mutex, destroy_mutex, live_mutexes, lock_mutex,
        unlock_mutex,
    };
    use crate::HError;

    #[test]
    fn test_same_thread_relocks() {
        let mutex = ReentrantMutex::new();
        mutex.lock().unwrap();
        mutex.lock().unwrap();
        assert_eq!(mutex.hold_count().unwrap(), 2);
        mutex.unlock().unwrap();
        assert_eq!(mutex.hold_count().unwrap(), 1);
        mutex.unlock().unwrap();
        assert_eq!(mutex.hold_count().unwrap(), 0);
        assert!(matches!(mutex.unlock(), Err(HError::MutexNotLocked)));
    }

    #[test]
    fn test_other_thread_cannot_unlock() {
        let mutex = Arc::new(ReentrantMutex::new());
        mutex.lock().unwrap();
        let other = mutex.clone();
        let result = thread::spawn(move || other.unlock()).join().unwrap();
        assert!(matches!(result, Err(HError::MutexNotLocked)));
        mutex.unlock().unwrap();
    }

    #[test]
    fn test_other_thread_waits_for_release() {
        let mutex = Arc::new(ReentrantMutex::new());
        let acquired = Arc::new(AtomicBool::new(false));
        mutex.lock().unwrap();
        mutex.lock().unwrap();

        let waiter = {
            let mutex = mutex.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                mutex.lock().unwrap();
                acquired.store(true, Ordering::SeqCst);
                mutex.unlock().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(50));
        mutex.unlock().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        mutex.unlock().unwrap();
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_callbacks() {
        let before = live_mutexes();
        let mut p_mutex: CK_VOID_PTR = ptr::null_mut();
        unsafe {
            assert_eq!(create_mutex(&raw mut p_mutex), CKR_OK);
            assert!(!p_mutex.is_null());
            assert!(live_mutexes() > before);

            assert_eq!(lock_mutex(p_mutex), CKR_OK);
            assert_eq!(lock_mutex(p_mutex), CKR_OK);
            assert_eq!(unlock_mutex(p_mutex), CKR_OK);
            assert_eq!(unlock_mutex(p_mutex), CKR_OK);
            assert_eq!(unlock_mutex(p_mutex), CKR_MUTEX_NOT_LOCKED);
            assert_eq!(destroy_mutex(p_mutex), CKR_OK);

            assert_eq!(create_mutex(ptr::null_mut()), CKR_ARGUMENTS_BAD);
            assert_eq!(lock_mutex(ptr::null_mut()), CKR_MUTEX_BAD);
            assert_eq!(unlock_mutex(ptr::null_mut()), CKR_MUTEX_BAD);
            assert_eq!(destroy_mutex(ptr::null_mut()), CKR_MUTEX_BAD);
        }
    }

    #[test]
    fn test_locking_model_display() {
        assert_eq!(LockingModel::None.to_string(), "none");
        assert_eq!(LockingModel::Os.to_string(), "os");
        assert_eq!(LockingModel::Functions.to_string(), "functions");
        assert_eq!(LockingModel::default(), LockingModel::Os);
    }

    #[test]
    fn test_locking_model_parsing() {
        assert_eq!("NONE".parse::<LockingModel>().unwrap(), LockingModel::None);
        assert_eq!("Os".parse::<LockingModel>().unwrap(), LockingModel::Os);
        assert_eq!(
            "functions".parse::<LockingModel>().unwrap(),
            LockingModel::Functions
        );
        assert!("mutex".parse::<LockingModel>().is_err());
    }
}
