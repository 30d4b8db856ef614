use std::{
    fs,
    path::{Path, PathBuf},
};

use luna_pkcs11_loader::LUNA_PKCS11_LIB;
use serde::Deserialize;
use tracing::debug;

use crate::error::{SampleError, result::SampleResult};

pub const LUNA_SAMPLES_CONF_ENV: &str = "LUNA_SAMPLES_CONF";

/// Optional settings of the samples, read from a TOML file
///
/// ```toml
/// pkcs11_lib = "/usr/safenet/lunaclient/lib/libCryptoki2_64.so"
/// rust_log = "info,luna_base_hsm=debug"
/// ```
#[derive(Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SampleConfig {
    /// Path of the PKCS#11 library
    pub pkcs11_lib: Option<PathBuf>,
    /// Log filter used when `RUST_LOG` is not set
    pub rust_log: Option<String>,
}

impl SampleConfig {
    /// Read the configuration file if one is given, the defaults otherwise
    pub fn load(path: Option<&Path>) -> SampleResult<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_toml)
    }

    pub fn from_toml(path: &Path) -> SampleResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SampleError::Configuration(format!(
                "cannot read the configuration file {}: {e}",
                path.display()
            ))
        })?;
        let conf: Self = toml::from_str(&content).map_err(|e| {
            SampleError::Configuration(format!(
                "malformed configuration file {}: {e}",
                path.display()
            ))
        })?;
        debug!("configuration loaded from {}: {conf:?}", path.display());
        Ok(conf)
    }

    /// The library to load: the command line (or its environment variable)
    /// first, then the configuration file, then the Luna client default
    #[must_use]
    pub fn pkcs11_lib(&self, from_command_line: Option<PathBuf>) -> PathBuf {
        from_command_line
            .or_else(|| self.pkcs11_lib.clone())
            .unwrap_or_else(|| PathBuf::from(LUNA_PKCS11_LIB))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{fs, path::PathBuf};

    use luna_pkcs11_loader::LUNA_PKCS11_LIB;
    use tempfile::TempDir;

    use super::SampleConfig;

    #[test]
    fn test_load() {
        let tmp_dir = TempDir::new().unwrap();

        let conf_path = tmp_dir.path().join("samples.toml");
        fs::write(
            &conf_path,
            "pkcs11_lib = \"/opt/luna/libCryptoki2.so\"\nrust_log = \"debug\"\n",
        )
        .unwrap();
        let conf = SampleConfig::load(Some(&conf_path)).unwrap();
        assert_eq!(
            conf.pkcs11_lib,
            Some(PathBuf::from("/opt/luna/libCryptoki2.so"))
        );
        assert_eq!(conf.rust_log.as_deref(), Some("debug"));

        let partial_path = tmp_dir.path().join("partial.toml");
        fs::write(&partial_path, "rust_log = \"warn\"\n").unwrap();
        let conf = SampleConfig::load(Some(&partial_path)).unwrap();
        assert_eq!(conf.pkcs11_lib, None);

        assert_eq!(SampleConfig::load(None).unwrap(), SampleConfig::default());

        let missing = tmp_dir.path().join("not_exist.toml");
        assert!(
            SampleConfig::load(Some(&missing))
                .unwrap_err()
                .to_string()
                .starts_with("cannot read the configuration file")
        );

        let bad_path = tmp_dir.path().join("bad.toml");
        fs::write(&bad_path, "slot = [").unwrap();
        assert!(
            SampleConfig::load(Some(&bad_path))
                .unwrap_err()
                .to_string()
                .starts_with("malformed configuration file")
        );
    }

    #[test]
    fn test_pkcs11_lib_resolution() {
        let conf = SampleConfig {
            pkcs11_lib: Some(PathBuf::from("/from/file.so")),
            rust_log: None,
        };
        assert_eq!(
            conf.pkcs11_lib(Some(PathBuf::from("/from/cli.so"))),
            PathBuf::from("/from/cli.so")
        );
        assert_eq!(conf.pkcs11_lib(None), PathBuf::from("/from/file.so"));
        assert_eq!(
            SampleConfig::default().pkcs11_lib(None),
            PathBuf::from(LUNA_PKCS11_LIB)
        );
    }
}
