pub mod actions;
mod commands;
pub mod config;
pub mod error;

pub use commands::{Cli, SampleCommands, luna_samples_main};

pub mod reexport {
    pub use luna_base_hsm;
    pub use luna_pkcs11_loader;
}
