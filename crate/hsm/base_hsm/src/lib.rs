//! Run-time loaded PKCS#11 access for the Luna sample programs.
//!
//! The vendor library is opened with `libloading`, its entry points are kept
//! in a table of function pointers and wrapped by safe calls returning
//! [`HResult`]. Luna specific `CA_*` entry points are optional: they are only
//! resolved when the library exports them.

#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

mod error;

pub use base_hsm::{BaseHsm, DefaultCapabilityProvider};
pub use error::{HError, HResult, ck_rv_name};
pub use hsm_capabilities::{HsmCapabilities, HsmProvider};
pub use info::{Counter, Info, SessionInfo, SlotInfo, TokenInfo, Version};
pub use locking::{LockingModel, ReentrantMutex, live_mutexes};
pub use luna::{ApplicationId, CKF_SO_SESSION};
pub use session::{
    AES_CBC_IV_LENGTH, EcCurve, KeyAttributes, KeyPair, Mechanism, Session, SymmetricKeyType,
    Template, ec_key_pair_templates, rsa_key_pair_templates, secret_key_template,
};
pub use slots::{ObjectHandlesCache, SlotManager};

mod base_hsm;
mod hsm_capabilities;
mod hsm_lib;
mod info;
mod locking;
mod luna;
mod probe;
mod session;
mod slots;

pub mod test_helpers;
pub mod tests_shared;

/// Crates used by the exported macros
pub mod reexport {
    pub use cosmian_pkcs11_sys;
}
