use cosmian_pkcs11_sys::{
    CK_ATTRIBUTE, CK_ATTRIBUTE_TYPE, CK_FALSE, CK_TRUE, CK_ULONG,
};

use crate::HResult;

/// An attribute template owning its values.
///
/// Values are kept in their own heap buffers so the `CK_ATTRIBUTE` array
/// returned by [`Template::to_ck_attributes`] stays valid while the template
/// is alive and unmodified, even if the template itself is moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    attributes: Vec<(CK_ATTRIBUTE_TYPE, Vec<u8>)>,
}

impl Template {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bool(mut self, attribute: CK_ATTRIBUTE_TYPE, value: bool) -> Self {
        let value = if value { CK_TRUE } else { CK_FALSE };
        self.attributes.push((attribute, vec![value]));
        self
    }

    /// Any `CK_ULONG` based value: class, key type, length, bit size...
    #[must_use]
    pub fn ulong(mut self, attribute: CK_ATTRIBUTE_TYPE, value: CK_ULONG) -> Self {
        self.attributes
            .push((attribute, value.to_ne_bytes().to_vec()));
        self
    }

    #[must_use]
    pub fn bytes(mut self, attribute: CK_ATTRIBUTE_TYPE, value: impl Into<Vec<u8>>) -> Self {
        self.attributes.push((attribute, value.into()));
        self
    }

    #[must_use]
    pub fn get(&self, attribute: CK_ATTRIBUTE_TYPE) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|(t, _)| *t == attribute)
            .map(|(_, v)| v.as_slice())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// The `CK_ATTRIBUTE` array pointing into this template.
    ///
    /// The library only reads through these pointers: they must not be used
    /// after the template is dropped or modified.
    pub(crate) fn to_ck_attributes(&self) -> HResult<Vec<CK_ATTRIBUTE>> {
        self.attributes
            .iter()
            .map(|(attribute, value)| {
                Ok(CK_ATTRIBUTE {
                    type_: *attribute,
                    pValue: value.as_ptr().cast_mut().cast::<std::ffi::c_void>(),
                    ulValueLen: CK_ULONG::try_from(value.len())?,
                })
            })
            .collect()
    }
}
