use cosmian_pkcs11_sys::CK_ULONG;

#[derive(Debug, Clone)]
pub struct HsmCapabilities {
    /// Number of handles requested per `C_FindObjects` call
    pub find_max_object_count: CK_ULONG,
    /// Whether the library exposes the Luna `CA_*` extensions
    pub vendor_extensions: bool,
}

impl Default for HsmCapabilities {
    fn default() -> Self {
        Self {
            find_max_object_count: 64,
            vendor_extensions: false,
        }
    }
}

pub trait HsmProvider: Send + Sync + 'static {
    fn capabilities() -> HsmCapabilities;
}
