use std::ptr;

use cosmian_pkcs11_sys::{CK_RV, CK_ULONG, CKR_BUFFER_TOO_SMALL, CKR_OK};
use tracing::debug;

use crate::{HError, HResult};

/// The output may grow between the size query and the fill (e.g. a slot list
/// while a token is inserted), so the fill is retried a few times.
const MAX_FILL_ATTEMPTS: usize = 3;

/// Run the PKCS#11 two-call convention for variable-length output.
///
/// `call` is first invoked with a null buffer to learn the required length,
/// then with a buffer of that length. The result is truncated to the length
/// reported by the second call.
pub(crate) fn probe_and_fill<T, F>(
    context: &str,
    function: &'static str,
    mut call: F,
) -> HResult<Vec<T>>
where
    T: Copy + Default,
    F: FnMut(*mut T, &mut CK_ULONG) -> HResult<CK_RV>,
{
    let mut len: CK_ULONG = 0;
    let rv = call(ptr::null_mut(), &mut len)?;
    if rv != CKR_OK {
        return Err(HError::pkcs11(context, function, rv));
    }
    for _ in 0..MAX_FILL_ATTEMPTS {
        let mut buffer = vec![T::default(); usize::try_from(len)?];
        let rv = call(buffer.as_mut_ptr(), &mut len)?;
        match rv {
            CKR_OK => {
                buffer.truncate(usize::try_from(len)?);
                return Ok(buffer);
            }
            CKR_BUFFER_TOO_SMALL => {
                debug!("{function}: output grew to {len} elements, retrying");
            }
            _ => return Err(HError::pkcs11(context, function, rv)),
        }
    }
    Err(HError::pkcs11(context, function, CKR_BUFFER_TOO_SMALL))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cosmian_pkcs11_sys::{CK_ULONG, CKR_BUFFER_TOO_SMALL, CKR_DEVICE_ERROR, CKR_OK};

    use super::probe_and_fill;

    /// Writes `data` following the two-call convention
    fn fill(data: &[u8], out: *mut u8, len: &mut CK_ULONG) -> CK_ULONG {
        let required = CK_ULONG::try_from(data.len()).unwrap();
        if out.is_null() {
            *len = required;
            return CKR_OK;
        }
        if *len < required {
            *len = required;
            return CKR_BUFFER_TOO_SMALL;
        }
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len()) };
        *len = required;
        CKR_OK
    }

    #[test]
    fn test_probe_then_fill() {
        let data = b"this is 16 bytes";
        let mut calls = 0;
        let out = probe_and_fill::<u8, _>("encrypting", "C_Encrypt", |buf, len| {
            calls += 1;
            Ok(fill(data, buf, len))
        })
        .unwrap();
        assert_eq!(out, data);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_output_shorter_than_announced() {
        // RSA decryption announces the modulus size and returns less
        let out = probe_and_fill::<u8, _>("decrypting", "C_Decrypt", |buf, len| {
            if buf.is_null() {
                *len = 128;
                return Ok(CKR_OK);
            }
            assert_eq!(*len, 128);
            unsafe { *buf = 7 };
            *len = 1;
            Ok(CKR_OK)
        })
        .unwrap();
        assert_eq!(out, vec![7_u8]);
    }

    #[test]
    fn test_output_grows_between_calls() {
        let mut data = vec![1_u64, 2];
        let out = probe_and_fill::<u64, _>("listing slots", "C_GetSlotList", |buf, len| {
            let required = CK_ULONG::try_from(data.len()).unwrap();
            if buf.is_null() {
                *len = required;
                data.push(3);
                return Ok(CKR_OK);
            }
            if *len < required {
                *len = required;
                return Ok(CKR_BUFFER_TOO_SMALL);
            }
            for (i, v) in data.iter().enumerate() {
                unsafe { *buf.add(i) = *v };
            }
            *len = required;
            Ok(CKR_OK)
        })
        .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_failure_is_reported() {
        let err = probe_and_fill::<u8, _>("signing", "C_Sign", |_, _| Ok(CKR_DEVICE_ERROR))
            .unwrap_err();
        assert_eq!(err.rv(), Some(CKR_DEVICE_ERROR));
        assert!(err.to_string().starts_with("signing: C_Sign returned CKR_DEVICE_ERROR"));
    }

    #[test]
    fn test_gives_up_when_buffer_keeps_growing() {
        let mut required: CK_ULONG = 1;
        let err = probe_and_fill::<u8, _>("wrapping", "C_WrapKey", |_, len| {
            required += 1;
            *len = required;
            Ok(if required == 2 { CKR_OK } else { CKR_BUFFER_TOO_SMALL })
        })
        .unwrap_err();
        assert_eq!(err.rv(), Some(CKR_BUFFER_TOO_SMALL));
    }
}
