use std::path::PathBuf;

use clap::{Parser, Subcommand};
use luna_logger::log_init;
use tracing::{debug, info};

use crate::{
    actions::{
        application_id::{ApplicationIdAction, ChildApplicationIdAction},
        ecdsa_demo::EcdsaDemoAction,
        enc_dec::EncDecAction,
        generate_key::GenerateKeyAction,
        get_info::GetInfoAction,
        ha_login::HaLoginAction,
        private_wrap::PrivateWrapAction,
        rsa_demo::RsaDemoAction,
        rsa_enc_pad::RsaEncPadAction,
        ssl_client::SslClientAction,
        threading::ThreadingAction,
    },
    config::SampleConfig,
    error::result::SampleResult,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file location
    ///
    /// This is an alternative to the env variable `LUNA_SAMPLES_CONF`.
    #[arg(short, long, env = "LUNA_SAMPLES_CONF")]
    conf: Option<PathBuf>,

    /// Path of the PKCS#11 library
    ///
    /// Takes precedence over the `pkcs11_lib` entry of the configuration file.
    /// Defaults to the Luna client library.
    #[arg(long, env = "LUNA_PKCS11_LIB")]
    pub pkcs11_lib: Option<PathBuf>,

    #[command(subcommand)]
    pub command: SampleCommands,
}

#[derive(Subcommand)]
pub enum SampleCommands {
    GetInfo(GetInfoAction),
    GenerateKey(GenerateKeyAction),
    EncDec(EncDecAction),
    Threading(ThreadingAction),
    HaLogin(HaLoginAction),
    ApplicationId(ApplicationIdAction),
    ChildApplicationId(ChildApplicationIdAction),
    RsaDemo(RsaDemoAction),
    EcdsaDemo(EcdsaDemoAction),
    RsaEncPad(RsaEncPadAction),
    PrivateWrap(PrivateWrapAction),
    SslClient(SslClientAction),
}

/// Main function of the `lunasample` binary.
///
/// Parses the command line, loads the configuration, initializes logging
/// and runs the selected sample.
///
/// # Errors
///
/// This function will return an error if:
/// - The configuration file cannot be read or parsed.
/// - The PKCS#11 library cannot be loaded or initialized.
/// - Any call the sample makes to the library fails.
pub fn luna_samples_main() -> SampleResult<()> {
    let cli = Cli::parse();
    let conf = SampleConfig::load(cli.conf.as_deref())?;
    log_init(conf.rust_log.as_deref());

    let pkcs11_lib = conf.pkcs11_lib(cli.pkcs11_lib);
    info!("Using the PKCS#11 library {}", pkcs11_lib.display());
    debug!("Configuration: {conf:?}");

    match cli.command {
        SampleCommands::GetInfo(action) => action.run(&pkcs11_lib),
        SampleCommands::GenerateKey(action) => action.run(&pkcs11_lib),
        SampleCommands::EncDec(action) => action.run(&pkcs11_lib),
        SampleCommands::Threading(action) => action.run(&pkcs11_lib),
        SampleCommands::HaLogin(action) => action.run(&pkcs11_lib),
        SampleCommands::ApplicationId(action) => action.run(&pkcs11_lib),
        SampleCommands::ChildApplicationId(action) => action.run(&pkcs11_lib),
        SampleCommands::RsaDemo(action) => action.run(&pkcs11_lib),
        SampleCommands::EcdsaDemo(action) => action.run(&pkcs11_lib),
        SampleCommands::RsaEncPad(action) => action.run(&pkcs11_lib),
        SampleCommands::PrivateWrap(action) => action.run(&pkcs11_lib),
        SampleCommands::SslClient(action) => action.run(&pkcs11_lib),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use clap::{CommandFactory, Parser};

    use super::{Cli, SampleCommands};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options() {
        let cli = Cli::try_parse_from([
            "lunasample",
            "--pkcs11-lib",
            "/tmp/libfake.so",
            "get-info",
            "--info",
        ])
        .unwrap();
        assert_eq!(cli.pkcs11_lib, Some(PathBuf::from("/tmp/libfake.so")));
        assert!(matches!(cli.command, SampleCommands::GetInfo(_)));
    }

    #[test]
    fn test_unknown_subcommand_is_refused() {
        assert!(Cli::try_parse_from(["lunasample", "format-token"]).is_err());
    }
}
