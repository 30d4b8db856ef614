use luna_base_hsm::{BaseHsm, HsmCapabilities, HsmProvider};

/// Path to the SoftHSMv2 `PKCS#11` shared library
pub const SOFTHSM2_PKCS11_LIB: &str = "/usr/lib/softhsm/libsofthsm2.so";

pub struct SofthsmCapabilityProvider;

impl HsmProvider for SofthsmCapabilityProvider {
    fn capabilities() -> HsmCapabilities {
        HsmCapabilities {
            find_max_object_count: 32,
            vendor_extensions: false,
        }
    }
}

/// SoftHSMv2 supports everything but the Luna `CA_*` extensions
pub type Softhsm2 = BaseHsm<SofthsmCapabilityProvider>;
