use luna_base_hsm::{BaseHsm, HsmCapabilities, HsmProvider};

/// Path to the Luna `PKCS#11` shared library
pub const LUNA_PKCS11_LIB: &str = "/usr/safenet/lunaclient/lib/libCryptoki2_64.so";

pub struct LunaCapabilityProvider;

impl HsmProvider for LunaCapabilityProvider {
    fn capabilities() -> HsmCapabilities {
        HsmCapabilities {
            find_max_object_count: 64,
            vendor_extensions: true,
        }
    }
}

/// Luna HSMs are driven by the `BaseHsm` implementation, with the `CA_*`
/// extensions enabled
pub type Luna = BaseHsm<LunaCapabilityProvider>;

#[cfg(test)]
#[cfg(feature = "luna")]
mod tests;
