//! Owned, display-ready copies of the PKCS#11 information structures.

use std::fmt::{self, Display, Formatter};

use cosmian_pkcs11_sys::{
    CK_FLAGS, CK_INFO, CK_SESSION_INFO, CK_SLOT_ID, CK_SLOT_INFO, CK_STATE, CK_TOKEN_INFO,
    CK_ULONG, CK_VERSION, CKF_HW_SLOT, CKF_LOGIN_REQUIRED, CKF_REMOVABLE_DEVICE, CKF_RNG,
    CKF_TOKEN_INITIALIZED, CKF_TOKEN_PRESENT, CKF_USER_PIN_INITIALIZED, CKF_WRITE_PROTECTED,
    CKS_RO_PUBLIC_SESSION, CKS_RO_USER_FUNCTIONS, CKS_RW_PUBLIC_SESSION, CKS_RW_SO_FUNCTIONS,
    CKS_RW_USER_FUNCTIONS,
};

/// Value of a counter the token chose not to report
const UNAVAILABLE_INFORMATION: CK_ULONG = CK_ULONG::MAX;

/// Blank-padded, not NUL-terminated PKCS#11 text fields
pub(crate) fn padded_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
        .trim_end_matches(' ')
        .to_owned()
}

/// A `major.minor` version, the minor part shown on two digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl From<CK_VERSION> for Version {
    fn from(version: CK_VERSION) -> Self {
        Self {
            major: version.major,
            minor: version.minor,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

/// A counter reported by the token, possibly withheld
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter(pub CK_ULONG);

impl Display for Counter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.0 == UNAVAILABLE_INFORMATION {
            write!(f, "unavailable")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn flag_names(flags: CK_FLAGS, names: &[(CK_FLAGS, &'static str)]) -> Vec<&'static str> {
    names
        .iter()
        .filter(|(flag, _)| flags & flag != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// General information about the library
#[derive(Debug, Clone)]
pub struct Info {
    pub cryptoki_version: Version,
    pub manufacturer_id: String,
    pub flags: CK_FLAGS,
    pub library_description: String,
    pub library_version: Version,
}

impl From<CK_INFO> for Info {
    fn from(info: CK_INFO) -> Self {
        Self {
            cryptoki_version: info.cryptokiVersion.into(),
            manufacturer_id: padded_string(&info.manufacturerID),
            flags: info.flags,
            library_description: padded_string(&info.libraryDescription),
            library_version: info.libraryVersion.into(),
        }
    }
}

impl Display for Info {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cryptoki Version: {}, Manufacturer: {}, Library: {} {}",
            self.cryptoki_version,
            self.manufacturer_id,
            self.library_description,
            self.library_version
        )
    }
}

#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub slot_id: CK_SLOT_ID,
    pub description: String,
    pub manufacturer_id: String,
    pub flags: CK_FLAGS,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

impl SlotInfo {
    pub(crate) fn new(slot_id: CK_SLOT_ID, info: &CK_SLOT_INFO) -> Self {
        Self {
            slot_id,
            description: padded_string(&info.slotDescription),
            manufacturer_id: padded_string(&info.manufacturerID),
            flags: info.flags,
            hardware_version: info.hardwareVersion.into(),
            firmware_version: info.firmwareVersion.into(),
        }
    }

    #[must_use]
    pub const fn token_present(&self) -> bool {
        self.flags & CKF_TOKEN_PRESENT != 0
    }

    /// Names of the slot flags that are set
    #[must_use]
    pub fn flag_names(&self) -> Vec<&'static str> {
        flag_names(
            self.flags,
            &[
                (CKF_TOKEN_PRESENT, "TokenPresent"),
                (CKF_REMOVABLE_DEVICE, "RemovableDevice"),
                (CKF_HW_SLOT, "Hardware"),
            ],
        )
    }
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub label: String,
    pub manufacturer_id: String,
    pub model: String,
    pub serial_number: String,
    pub flags: CK_FLAGS,
    pub max_session_count: Counter,
    pub session_count: Counter,
    pub max_rw_session_count: Counter,
    pub rw_session_count: Counter,
    pub max_pin_len: CK_ULONG,
    pub min_pin_len: CK_ULONG,
    pub total_public_memory: Counter,
    pub free_public_memory: Counter,
    pub total_private_memory: Counter,
    pub free_private_memory: Counter,
    pub hardware_version: Version,
    pub firmware_version: Version,
    pub utc_time: String,
}

impl From<&CK_TOKEN_INFO> for TokenInfo {
    fn from(info: &CK_TOKEN_INFO) -> Self {
        Self {
            label: padded_string(&info.label),
            manufacturer_id: padded_string(&info.manufacturerID),
            model: padded_string(&info.model),
            serial_number: padded_string(&info.serialNumber),
            flags: info.flags,
            max_session_count: Counter(info.ulMaxSessionCount),
            session_count: Counter(info.ulSessionCount),
            max_rw_session_count: Counter(info.ulMaxRwSessionCount),
            rw_session_count: Counter(info.ulRwSessionCount),
            max_pin_len: info.ulMaxPinLen,
            min_pin_len: info.ulMinPinLen,
            total_public_memory: Counter(info.ulTotalPublicMemory),
            free_public_memory: Counter(info.ulFreePublicMemory),
            total_private_memory: Counter(info.ulTotalPrivateMemory),
            free_private_memory: Counter(info.ulFreePrivateMemory),
            hardware_version: info.hardwareVersion.into(),
            firmware_version: info.firmwareVersion.into(),
            utc_time: padded_string(&info.utcTime),
        }
    }
}

impl TokenInfo {
    /// Names of the token flags that are set
    #[must_use]
    pub fn flag_names(&self) -> Vec<&'static str> {
        flag_names(
            self.flags,
            &[
                (CKF_TOKEN_INITIALIZED, "TokenInitialised"),
                (CKF_RNG, "RNG"),
                (CKF_WRITE_PROTECTED, "WriteProtected"),
                (CKF_LOGIN_REQUIRED, "LoginRequired"),
                (CKF_USER_PIN_INITIALIZED, "UserPINInitialised"),
            ],
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionInfo {
    pub slot_id: CK_SLOT_ID,
    pub state: CK_STATE,
    pub flags: CK_FLAGS,
    pub device_error: CK_ULONG,
}

impl From<CK_SESSION_INFO> for SessionInfo {
    fn from(info: CK_SESSION_INFO) -> Self {
        Self {
            slot_id: info.slotID,
            state: info.state,
            flags: info.flags,
            device_error: info.ulDeviceError,
        }
    }
}

impl SessionInfo {
    #[must_use]
    pub const fn state_name(&self) -> &'static str {
        match self.state {
            CKS_RO_PUBLIC_SESSION => "CKS_RO_PUBLIC_SESSION",
            CKS_RO_USER_FUNCTIONS => "CKS_RO_USER_FUNCTIONS",
            CKS_RW_PUBLIC_SESSION => "CKS_RW_PUBLIC_SESSION",
            CKS_RW_USER_FUNCTIONS => "CKS_RW_USER_FUNCTIONS",
            CKS_RW_SO_FUNCTIONS => "CKS_RW_SO_FUNCTIONS",
            _ => "unknown session state",
        }
    }

    #[must_use]
    pub const fn user_logged_in(&self) -> bool {
        matches!(
            self.state,
            CKS_RO_USER_FUNCTIONS | CKS_RW_USER_FUNCTIONS
        )
    }
}

#[cfg(test)]
mod tests {
    use cosmian_pkcs11_sys::{
        CK_SESSION_INFO, CK_SLOT_INFO, CK_TOKEN_INFO, CK_ULONG, CK_VERSION, CKF_HW_SLOT, CKF_RNG,
        CKF_TOKEN_INITIALIZED, CKF_TOKEN_PRESENT, CKS_RW_SO_FUNCTIONS, CKS_RW_USER_FUNCTIONS,
    };

    use super::{Counter, SessionInfo, SlotInfo, TokenInfo, Version, padded_string};

    fn padded<const N: usize>(text: &str) -> [u8; N] {
        let mut field = [b' '; N];
        field[..text.len()].copy_from_slice(text.as_bytes());
        field
    }

    #[test]
    fn test_version_display() {
        let v: Version = CK_VERSION { major: 2, minor: 1 }.into();
        assert_eq!(v.to_string(), "2.01");
        let v: Version = CK_VERSION {
            major: 2,
            minor: 20,
        }
        .into();
        assert_eq!(v.to_string(), "2.20");
    }

    #[test]
    fn test_padded_string() {
        assert_eq!(padded_string(b"SafeNet     "), "SafeNet");
        assert_eq!(padded_string(b"token\0garbage"), "token");
        assert_eq!(padded_string(b"    "), "");
    }

    #[test]
    fn test_slot_info() {
        let raw = CK_SLOT_INFO {
            slotDescription: padded("Net Token Slot"),
            manufacturerID: padded("SafeNet"),
            flags: CKF_TOKEN_PRESENT | CKF_HW_SLOT,
            ..Default::default()
        };
        let info = SlotInfo::new(3, &raw);
        assert_eq!(info.slot_id, 3);
        assert_eq!(info.description, "Net Token Slot");
        assert!(info.token_present());
        assert_eq!(info.flag_names(), vec!["TokenPresent", "Hardware"]);
    }

    #[test]
    fn test_token_info() {
        let raw = CK_TOKEN_INFO {
            label: padded("partition1"),
            serialNumber: padded("1234"),
            flags: CKF_RNG | CKF_TOKEN_INITIALIZED,
            ulMaxSessionCount: CK_ULONG::MAX,
            ulSessionCount: 2,
            ..Default::default()
        };
        let info = TokenInfo::from(&raw);
        assert_eq!(info.label, "partition1");
        assert_eq!(info.serial_number, "1234");
        assert_eq!(info.flag_names(), vec!["TokenInitialised", "RNG"]);
        assert_eq!(info.max_session_count.to_string(), "unavailable");
        assert_eq!(info.session_count, Counter(2));
    }

    #[test]
    fn test_session_state() {
        let info: SessionInfo = CK_SESSION_INFO {
            state: CKS_RW_USER_FUNCTIONS,
            ..Default::default()
        }
        .into();
        assert!(info.user_logged_in());
        assert_eq!(info.state_name(), "CKS_RW_USER_FUNCTIONS");

        let info: SessionInfo = CK_SESSION_INFO {
            state: CKS_RW_SO_FUNCTIONS,
            ..Default::default()
        }
        .into();
        assert!(!info.user_logged_in());
    }
}
