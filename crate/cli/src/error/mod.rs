use luna_base_hsm::HError;
use thiserror::Error;

pub mod result;

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Default(String),

    #[error(transparent)]
    Hsm(#[from] HError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error(transparent)]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TryFromIntError(#[from] std::num::TryFromIntError),

    #[error(transparent)]
    UrlParsing(#[from] url::ParseError),
}

impl SampleError {
    /// The PKCS#11 return value behind this error, if the HSM produced it
    #[must_use]
    pub const fn rv(&self) -> Option<cosmian_pkcs11_sys::CK_RV> {
        match self {
            Self::Hsm(e) => e.rv(),
            _ => None,
        }
    }
}

/// Return early with an error if a condition is not satisfied.
///
/// This macro is equivalent to `if !$cond { return Err(From::from($err)); }`.
#[macro_export]
macro_rules! sample_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::sample_error!($msg));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::core::result::Result::Err($crate::sample_error!($fmt, $($arg)*));
        }
    };
}

/// Construct a sample error from a string.
#[macro_export]
macro_rules! sample_error {
    ($msg:literal) => {
        $crate::error::SampleError::Default(::core::format_args!($msg).to_string())
    };
    ($err:expr $(,)?) => ({
        $crate::error::SampleError::Default($err.to_string())
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::SampleError::Default(::core::format_args!($fmt, $($arg)*).to_string())
    };
}

/// Return early with an error.
#[macro_export]
macro_rules! sample_bail {
    ($msg:literal) => {
        return ::core::result::Result::Err($crate::sample_error!($msg))
    };
    ($err:expr $(,)?) => {
        return ::core::result::Result::Err($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        return ::core::result::Result::Err($crate::sample_error!($fmt, $($arg)*))
    };
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use cosmian_pkcs11_sys::CKR_KEY_UNEXTRACTABLE;
    use luna_base_hsm::HError;

    use super::SampleError;
    use crate::error::result::SampleResult;

    #[test]
    fn test_sample_error_interpolation() {
        let var = 42;
        let err = sample_error!("interpolate {var}");
        assert_eq!("interpolate 42", err.to_string());

        let err = bail();
        match err {
            Err(e) => assert_eq!("interpolate 43", e.to_string()),
            Ok(()) => panic!("expected error"),
        }

        let err = ensure();
        match err {
            Err(e) => assert_eq!("interpolate 44", e.to_string()),
            Ok(()) => panic!("expected error"),
        }
    }

    fn bail() -> SampleResult<()> {
        let var = 43;
        if true {
            sample_bail!("interpolate {var}");
        }
        Ok(())
    }

    fn ensure() -> SampleResult<()> {
        let var = 44;
        sample_ensure!(false, "interpolate {var}");
        Ok(())
    }

    #[test]
    fn test_rv_of_hsm_errors() {
        let err: SampleError =
            HError::pkcs11("Failed wrapping key", "C_WrapKey", CKR_KEY_UNEXTRACTABLE).into();
        assert_eq!(err.rv(), Some(CKR_KEY_UNEXTRACTABLE));
        assert!(err.to_string().contains("CKR_KEY_UNEXTRACTABLE"));
        assert_eq!(sample_error!("no rv").rv(), None);
    }
}
