use std::process;

use luna_samples_cli::luna_samples_main;

fn main() {
    if let Some(err) = luna_samples_main().err() {
        eprintln!("ERROR: {err}");
        process::exit(1);
    }
}
